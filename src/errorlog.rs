use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{ProbeLoggerError, Result};

/// Write `description` to `<directory>/<YYYY-MM-DD_HH-MM-SS>.log`.
pub fn write_error_log(
    directory: &Path,
    now: DateTime<Local>,
    description: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(directory).map_err(|e| ProbeLoggerError::logging(directory, e))?;

    let path = directory.join(now.format("%Y-%m-%d_%H-%M-%S.log").to_string());
    fs::write(&path, description).map_err(|e| ProbeLoggerError::logging(&path, e))?;
    Ok(path)
}
