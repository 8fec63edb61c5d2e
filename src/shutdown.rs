//! Shutdown signal polling.
//!
//! The monitor runs on its own thread and is the only writer of the
//! [`TerminationFlag`]. The capture loop reads the flag between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{ProbeLoggerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalLevel {
    Asserted,
    Deasserted,
}

/// A binary input that requests termination when asserted.
pub trait SignalSource: Send {
    fn read(&mut self) -> Result<SignalLevel>;
}

/// Process-wide stop request, shared by the monitor and the capture loop.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ShutdownMonitor {
    source: Box<dyn SignalSource>,
    flag: TerminationFlag,
    poll_interval: Duration,
    abandon: Arc<AtomicBool>,
}

impl ShutdownMonitor {
    pub fn new(
        source: Box<dyn SignalSource>,
        flag: TerminationFlag,
        poll_interval: Duration,
    ) -> Self {
        ShutdownMonitor {
            source,
            flag,
            poll_interval,
            abandon: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Poll until the signal is asserted. Returns the number of reads taken.
    ///
    /// A read failure raises the flag before returning so the capture loop
    /// stops too. The signal source is dropped (and released) on return.
    pub fn run(mut self) -> Result<u64> {
        let mut reads = 0u64;

        while !self.flag.is_set() && !self.abandon.load(Ordering::SeqCst) {
            let level = match self.source.read() {
                Ok(level) => level,
                Err(e) => {
                    log::error!("Shutdown signal read failed: {e}");
                    self.flag.raise();
                    return Err(e);
                }
            };
            reads += 1;

            match level {
                SignalLevel::Asserted => {
                    log::info!("Shutdown signal asserted after {reads} reads");
                    self.flag.raise();
                }
                SignalLevel::Deasserted => thread::sleep(self.poll_interval),
            }
        }

        Ok(reads)
    }

    pub fn spawn(self) -> Result<MonitorHandle> {
        let abandon = self.abandon.clone();
        let handle = thread::Builder::new()
            .name("shutdown-monitor".into())
            .spawn(move || self.run())
            .map_err(|e| {
                ProbeLoggerError::SignalSource(format!("cannot start monitor thread: {e}"))
            })?;
        Ok(MonitorHandle { handle, abandon })
    }
}

pub struct MonitorHandle {
    handle: JoinHandle<Result<u64>>,
    abandon: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Wait for the monitor to finish on its own.
    pub fn join(self) -> Result<u64> {
        self.handle
            .join()
            .map_err(|_| ProbeLoggerError::SignalSource("monitor thread panicked".into()))?
    }

    /// Stop polling without touching the termination flag, then wait.
    ///
    /// Used when capture fails first, so the signal source is still released.
    pub fn abandon(self) -> Result<u64> {
        self.abandon.store(true, Ordering::SeqCst);
        self.join()
    }
}
