mod capture;
mod config;
mod error;
mod errorlog;
mod frame;
mod interface;
mod rawsocks;
mod shutdown;
mod signal;
mod sink;

extern crate libc;
extern crate nix;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use libc::EXIT_FAILURE;
use nix::unistd::geteuid;

use std::path::{Path, PathBuf};
use std::process::exit;

use crate::capture::{CaptureLoop, Counters, RawSocketSource};
use crate::config::Config;
use crate::error::ProbeLoggerError;
use crate::frame::FrameClassifier;
use crate::shutdown::{ShutdownMonitor, TerminationFlag};
use crate::sink::RotatingLogSink;

#[derive(Parser)]
#[command(name = "ProbeLogger")]
#[command(about = "Logs 802.11 probe requests until a shutdown signal is asserted.", long_about = None)]
#[command(version)]
struct Arguments {
    #[arg(short, long, default_value = "config.toml")]
    /// Configuration file.
    config: PathBuf,

    #[arg(short, long)]
    /// Optional - Hardware address of the capture interface (overrides the config file).
    interface_mac: Option<String>,

    #[arg(long)]
    /// Optional - Drop probe requests without an SSID.
    ignore_wildcards: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Arguments::parse();

    let mut config = match load_config(&cli.config, &config::default_error_log_directory()) {
        Ok(config) => config,
        Err(_) => exit(EXIT_FAILURE),
    };
    if let Some(mac) = cli.interface_mac {
        config.interface_mac = mac;
    }
    if cli.ignore_wildcards {
        config.ignore_wildcards = true;
    }

    let outcome = config
        .validate()
        .map_err(anyhow::Error::from)
        .and_then(|()| run(&config));

    match outcome {
        Ok(counters) => {
            log::info!(
                "Shutdown signal received, {} probe requests logged.",
                counters.observations
            );
        }
        Err(err) => {
            log::error!("{err:#}");
            record_failure(&config.error_log_directory, &err);
            exit(EXIT_FAILURE);
        }
    }
}

/// Without a config there is no `error_log_directory`, so a failure to load
/// one is recorded in `fallback_errors`.
fn load_config(path: &Path, fallback_errors: &Path) -> Result<Config> {
    Config::from_file(path).map_err(|e| {
        let err = anyhow::Error::from(e);
        log::error!("{err:#}");
        record_failure(fallback_errors, &err);
        err
    })
}

fn record_failure(directory: &Path, err: &anyhow::Error) {
    match errorlog::write_error_log(directory, Local::now(), &format!("{err:#}")) {
        Ok(path) => log::info!("Error written to {}", path.display()),
        Err(e) => log::error!("Could not write error log: {e}"),
    }
}

fn run(config: &Config) -> Result<Counters> {
    if !geteuid().is_root() {
        return Err(ProbeLoggerError::Setup("You need to run as root!".into()).into());
    }

    let mac = config.normalized_mac()?;
    let mut manager = interface::from_backend(config.interface_backend)?;
    let interface = interface::prepare_monitor(manager.as_mut(), &mac)
        .context("Interface setup failed")?;

    let mut source = RawSocketSource::open(&interface, config.capture_timeout())?;

    let flag = TerminationFlag::new();
    let signal = signal::open(config)?;
    let monitor = ShutdownMonitor::new(signal, flag.clone(), config.poll_interval()).spawn()?;
    log::info!(
        "Polling {} shutdown signal every {:?}",
        config.signal_source,
        config.poll_interval()
    );

    let mut sink = RotatingLogSink::new(&config.probe_request_log_directory);
    let classifier = FrameClassifier::new(config.ignore_wildcards);

    let captured = CaptureLoop::new(&mut source, classifier, flag).run(|observation, now| {
        sink.append(&observation, now.date_naive())
    });

    // Capture failed first: stop polling so the signal source is released.
    let counters = match captured {
        Ok(counters) => counters,
        Err(e) => {
            if let Err(monitor_err) = monitor.abandon() {
                log::warn!("Cleanup error: {monitor_err}");
            }
            return Err(e.into());
        }
    };

    monitor.join().context("Shutdown monitor failed")?;
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_unreadable_config_leaves_error_log() {
        let dir = tempfile::tempdir().unwrap();
        let errors = dir.path().join("errors");

        assert!(load_config(&dir.path().join("missing.toml"), &errors).is_err());

        let logs: Vec<_> = fs::read_dir(&errors).unwrap().collect();
        assert_eq!(logs.len(), 1);
        let text = fs::read_to_string(logs[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("missing.toml"));
    }

    #[test]
    fn test_invalid_config_leaves_error_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "gpio_pin = \"twenty one\"").unwrap();
        let errors = dir.path().join("errors");

        assert!(load_config(&path, &errors).is_err());
        assert_eq!(fs::read_dir(&errors).unwrap().count(), 1);
    }

    #[test]
    fn test_readable_config_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "interface_mac = \"aa:bb:cc:dd:ee:ff\"\ngpio_pin = 21").unwrap();
        let errors = dir.path().join("errors");

        let config = load_config(&path, &errors).unwrap();
        assert_eq!(config.gpio_pin, Some(21));
        assert!(!errors.exists());
    }
}
