//! The capture loop: receive, pre-filter, classify, hand off.
//!
//! At most one frame is in flight. The termination flag is checked before
//! every receive, so a frame that was already being received when the flag
//! went up is still processed. A receive timeout returns control to the loop
//! without a frame so the flag is seen on a quiet channel too.

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use chrono::{DateTime, Local};
use nix::net::if_::if_nametoindex;

use crate::error::{ProbeLoggerError, Result};
use crate::frame::{FrameClassifier, ProbeFrame, ProbeObservation};
use crate::rawsocks::{open_socket_rx, read_frame};
use crate::shutdown::TerminationFlag;

const RX_BUFFER_LEN: usize = 6000;

pub trait FrameSource {
    /// Next raw frame, or `None` if the receive timed out.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Monitor-mode frames from an AF_PACKET socket.
pub struct RawSocketSource {
    interface: String,
    rx_socket: OwnedFd,
    buffer: Vec<u8>,
}

impl RawSocketSource {
    pub fn open(interface: &str, timeout: Duration) -> Result<Self> {
        let ifindex = if_nametoindex(interface).map_err(|e| {
            ProbeLoggerError::Capture(format!("Interface {interface} has no index: {e}"))
        })?;
        let rx_socket = open_socket_rx(ifindex as i32, timeout).map_err(|e| {
            ProbeLoggerError::Capture(format!("Failed to open RX socket on {interface}: {e}"))
        })?;

        log::info!(
            "Socket opened on {} (Rx: {})",
            interface,
            rx_socket.as_raw_fd()
        );

        Ok(RawSocketSource {
            interface: interface.to_string(),
            rx_socket,
            buffer: vec![0u8; RX_BUFFER_LEN],
        })
    }
}

impl FrameSource for RawSocketSource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match read_frame(&self.rx_socket, &mut self.buffer) {
            Ok(Some(len)) => Ok(Some(self.buffer[..len].to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(ProbeLoggerError::Capture(format!(
                "Error reading from {}: {e}",
                self.interface
            ))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub frame_count: u64,
    pub probe_requests: u64,
    pub observations: u64,
    pub wildcards_dropped: u64,
    pub error_count: u64,
    pub empty_reads: u64,
}

pub struct CaptureLoop<'a> {
    source: &'a mut dyn FrameSource,
    classifier: FrameClassifier,
    flag: TerminationFlag,
    counters: Counters,
}

impl<'a> CaptureLoop<'a> {
    pub fn new(
        source: &'a mut dyn FrameSource,
        classifier: FrameClassifier,
        flag: TerminationFlag,
    ) -> Self {
        CaptureLoop {
            source,
            classifier,
            flag,
            counters: Counters::default(),
        }
    }

    /// Capture until the termination flag is raised.
    ///
    /// `on_observation` receives every observation with its capture time. An
    /// error from it, or from the frame source, ends the loop.
    pub fn run<F>(mut self, mut on_observation: F) -> Result<Counters>
    where
        F: FnMut(ProbeObservation, DateTime<Local>) -> Result<()>,
    {
        log::info!("Capture started");

        while !self.flag.is_set() {
            match self.source.next_frame()? {
                Some(packet) => {
                    self.counters.frame_count += 1;
                    self.handle(&packet, &mut on_observation)?;
                }
                None => self.counters.empty_reads += 1,
            }
        }

        log::info!(
            "Capture stopped. Frames: {} | Probe requests: {} | Logged: {} | Wildcards dropped: {} | Errors: {}",
            self.counters.frame_count,
            self.counters.probe_requests,
            self.counters.observations,
            self.counters.wildcards_dropped,
            self.counters.error_count
        );
        Ok(self.counters)
    }

    fn handle<F>(&mut self, packet: &[u8], on_observation: &mut F) -> Result<()>
    where
        F: FnMut(ProbeObservation, DateTime<Local>) -> Result<()>,
    {
        let frame = match ProbeFrame::from_radiotap(packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.counters.error_count += 1;
                log::warn!("{e}");
                return Ok(());
            }
        };
        self.counters.probe_requests += 1;

        let now = Local::now();
        match self.classifier.classify(&frame, now.time()) {
            Some(observation) => {
                log::debug!(
                    "Probe request: {} -> {}",
                    observation.source_address(),
                    observation.requested_name()
                );
                on_observation(observation, now)?;
                self.counters.observations += 1;
            }
            None => {
                self.counters.wildcards_dropped += 1;
                log::debug!("Wildcard probe request from {} dropped", frame.source);
            }
        }
        Ok(())
    }
}
