use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use strum_macros::Display;

use crate::error::{ProbeLoggerError, Result};
use crate::frame::parse_mac;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SignalSourceKind {
    /// A GPIO input line, or SIGINT / SIGTERM, whichever comes first.
    #[default]
    Gpio,
    /// SIGINT / SIGTERM delivered to the process.
    Interrupt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GpioBias {
    #[default]
    PullUp,
    PullDown,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterfaceBackend {
    /// `ip` and `iw` command line tools.
    #[default]
    Command,
    /// nl80211 over netlink.
    Netlink,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// BCM pin number polled for the shutdown signal (line offset on `gpio_chip`).
    #[serde(default)]
    pub gpio_pin: Option<u32>,

    #[serde(default = "default_gpio_chip")]
    pub gpio_chip: PathBuf,

    #[serde(default)]
    pub gpio_bias: GpioBias,

    /// Seconds between shutdown signal reads.
    #[serde(default = "default_gpio_check_frequency")]
    pub gpio_check_frequency: f64,

    /// Treat a low pin (shorted to ground) as asserted.
    #[serde(default = "default_true")]
    pub gpio_active_low: bool,

    pub interface_mac: String,

    /// Drop probe requests that carry no SSID.
    #[serde(default)]
    pub ignore_wildcards: bool,

    #[serde(default = "default_probe_request_log_directory")]
    pub probe_request_log_directory: PathBuf,

    #[serde(default = "default_error_log_directory")]
    pub error_log_directory: PathBuf,

    #[serde(default)]
    pub signal_source: SignalSourceKind,

    #[serde(default)]
    pub interface_backend: InterfaceBackend,

    /// Receive timeout of the capture socket. Zero blocks until a frame arrives.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

fn default_gpio_check_frequency() -> f64 {
    1.0
}

fn default_gpio_chip() -> PathBuf {
    PathBuf::from("/dev/gpiochip0")
}

fn default_true() -> bool {
    true
}

fn default_probe_request_log_directory() -> PathBuf {
    PathBuf::from("logs/probe_requests")
}

pub fn default_error_log_directory() -> PathBuf {
    PathBuf::from("logs/errors")
}

fn default_capture_timeout_ms() -> u64 {
    1000
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ProbeLoggerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProbeLoggerError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if parse_mac(&self.interface_mac).is_none() {
            return Err(ProbeLoggerError::Config(format!(
                "interface_mac {:?} is not a hardware address",
                self.interface_mac
            )));
        }

        if !self.gpio_check_frequency.is_finite() || self.gpio_check_frequency <= 0.0 {
            return Err(ProbeLoggerError::Config(format!(
                "gpio_check_frequency must be a positive number of seconds, got {}",
                self.gpio_check_frequency
            )));
        }

        if self.signal_source == SignalSourceKind::Gpio && self.gpio_pin.is_none() {
            return Err(ProbeLoggerError::Config(
                "gpio_pin is required when signal_source is gpio".to_string(),
            ));
        }

        Ok(())
    }

    /// `interface_mac` in lower-case colon form.
    pub fn normalized_mac(&self) -> Result<String> {
        parse_mac(&self.interface_mac)
            .map(|mac| mac.to_string())
            .ok_or_else(|| {
                ProbeLoggerError::Config(format!("invalid interface_mac {:?}", self.interface_mac))
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.gpio_check_frequency)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}
