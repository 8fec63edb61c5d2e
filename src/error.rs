use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Every failure that ends a capture run.
///
/// Malformed SSID bytes are not represented here: they are replaced during
/// decoding and never surface as an error.
#[derive(Debug, Error)]
pub enum ProbeLoggerError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Interface resolution or mode switching failed before capture started.
    #[error("setup error: {0}")]
    Setup(String),

    /// The shutdown signal could not be read.
    #[error("signal source error: {0}")]
    SignalSource(String),

    /// A probe request log file could not be created or appended to.
    #[error("log file error at {}: {source}", .path.display())]
    LoggingIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("capture error: {0}")]
    Capture(String),
}

impl ProbeLoggerError {
    pub fn logging(path: &Path, source: impl Into<io::Error>) -> Self {
        ProbeLoggerError::LoggingIo {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeLoggerError>;
