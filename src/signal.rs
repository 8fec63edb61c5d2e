//! Shutdown signal sources: a GPIO input line, process interrupts, or both.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gpiocdev::line::{Bias, Value};
use gpiocdev::Request;

use crate::config::{Config, GpioBias, SignalSourceKind};
use crate::error::{ProbeLoggerError, Result};
use crate::shutdown::{SignalLevel, SignalSource};

const CONSUMER: &str = "probelogger";

impl From<GpioBias> for Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::PullUp => Bias::PullUp,
            GpioBias::PullDown => Bias::PullDown,
            GpioBias::Disabled => Bias::Disabled,
        }
    }
}

/// A GPIO input line requested through the character device.
///
/// The line offset is the SoC (BCM) number on the chip. The kernel applies
/// the bias and the active-low inversion; the line is released on drop.
pub struct CdevGpio {
    request: Request,
    chip: PathBuf,
    line: u32,
}

impl CdevGpio {
    pub fn open(chip: &Path, line: u32, active_low: bool, bias: GpioBias) -> Result<Self> {
        let mut builder = Request::builder();
        builder
            .on_chip(chip)
            .with_consumer(CONSUMER)
            .with_line(line)
            .as_input()
            .with_bias(Bias::from(bias));
        if active_low {
            builder.as_active_low();
        }

        let request = builder.request().map_err(|e| {
            ProbeLoggerError::SignalSource(format!(
                "cannot request line {} on {}: {e}",
                line,
                chip.display()
            ))
        })?;

        log::info!(
            "GPIO {} on {} configured as input (active {}, bias {})",
            line,
            chip.display(),
            if active_low { "low" } else { "high" },
            bias
        );
        Ok(CdevGpio {
            request,
            chip: chip.to_path_buf(),
            line,
        })
    }
}

fn level(value: Value) -> SignalLevel {
    match value {
        Value::Active => SignalLevel::Asserted,
        Value::Inactive => SignalLevel::Deasserted,
    }
}

impl SignalSource for CdevGpio {
    fn read(&mut self) -> Result<SignalLevel> {
        self.request.value(self.line).map(level).map_err(|e| {
            ProbeLoggerError::SignalSource(format!(
                "cannot read line {} on {}: {e}",
                self.line,
                self.chip.display()
            ))
        })
    }
}

/// Asserted once SIGINT or SIGTERM has been received.
pub struct InterruptSignal {
    received: Arc<AtomicBool>,
}

impl InterruptSignal {
    /// Install the process signal handler. Only one may exist per process.
    pub fn install() -> Result<Self> {
        let received = Arc::new(AtomicBool::new(false));
        let r = received.clone();
        ctrlc::set_handler(move || {
            r.store(true, Ordering::SeqCst);
        })
        .map_err(|e| ProbeLoggerError::SignalSource(format!("cannot set interrupt handler: {e}")))?;
        Ok(InterruptSignal { received })
    }
}

impl SignalSource for InterruptSignal {
    fn read(&mut self) -> Result<SignalLevel> {
        if self.received.load(Ordering::SeqCst) {
            Ok(SignalLevel::Asserted)
        } else {
            Ok(SignalLevel::Deasserted)
        }
    }
}

/// Asserted as soon as any member is. A failing member fails the read.
pub struct AnySignal {
    sources: Vec<Box<dyn SignalSource>>,
}

impl AnySignal {
    pub fn new(sources: Vec<Box<dyn SignalSource>>) -> Self {
        AnySignal { sources }
    }
}

impl SignalSource for AnySignal {
    fn read(&mut self) -> Result<SignalLevel> {
        for source in &mut self.sources {
            if source.read()? == SignalLevel::Asserted {
                return Ok(SignalLevel::Asserted);
            }
        }
        Ok(SignalLevel::Deasserted)
    }
}

/// Open the signal source selected by `config`.
///
/// Interrupts are always watched, so SIGINT and SIGTERM stop the monitor
/// and release the GPIO line instead of killing the process.
pub fn open(config: &Config) -> Result<Box<dyn SignalSource>> {
    match config.signal_source {
        SignalSourceKind::Gpio => {
            let pin = config.gpio_pin.ok_or_else(|| {
                ProbeLoggerError::Config("gpio_pin is required when signal_source is gpio".into())
            })?;
            let gpio = CdevGpio::open(&config.gpio_chip, pin, config.gpio_active_low, config.gpio_bias)?;
            Ok(Box::new(AnySignal::new(vec![
                Box::new(gpio),
                Box::new(InterruptSignal::install()?),
            ])))
        }
        SignalSourceKind::Interrupt => Ok(Box::new(InterruptSignal::install()?)),
    }
}
