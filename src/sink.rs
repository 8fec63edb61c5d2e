//! Date-partitioned CSV log of probe requests.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{Terminator, Writer, WriterBuilder};

use crate::error::{ProbeLoggerError, Result};
use crate::frame::ProbeObservation;

pub const HEADER: [&str; 5] = ["hour", "minute", "second", "src_mac", "ssid"];

struct DailyLog {
    date: NaiveDate,
    path: PathBuf,
    writer: Writer<File>,
}

/// Appends observations to `<directory>/<YYYY-MM-DD>.csv`.
///
/// The writer for the current day stays open between calls and is flushed
/// after every row. A new day, or a file removed from under us, reopens.
pub struct RotatingLogSink {
    directory: PathBuf,
    current: Option<DailyLog>,
}

impl RotatingLogSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        RotatingLogSink {
            directory: directory.into(),
            current: None,
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(date.format("%Y-%m-%d.csv").to_string())
    }

    pub fn append(&mut self, observation: &ProbeObservation, date: NaiveDate) -> Result<()> {
        let log = match self.current.take() {
            Some(log) if log.date == date && log.path.exists() => log,
            _ => self.open(date)?,
        };
        let log = self.current.insert(log);

        log.writer
            .write_record(observation.record())
            .map_err(|e| ProbeLoggerError::logging(&log.path, e))?;
        log.writer
            .flush()
            .map_err(|e| ProbeLoggerError::logging(&log.path, e))?;
        Ok(())
    }

    fn open(&self, date: NaiveDate) -> Result<DailyLog> {
        let path = self.path_for(date);
        let created = !path.exists();

        if created {
            fs::create_dir_all(&self.directory)
                .map_err(|e| ProbeLoggerError::logging(&self.directory, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ProbeLoggerError::logging(&path, e))?;

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(file);

        if created {
            log::info!("Creating probe request log {}", path.display());
            write_header(&mut writer, &path)?;
        }

        Ok(DailyLog { date, path, writer })
    }
}

fn write_header(writer: &mut Writer<File>, path: &Path) -> Result<()> {
    writer
        .write_record(HEADER)
        .map_err(|e| ProbeLoggerError::logging(path, e))?;
    writer
        .flush()
        .map_err(|e| ProbeLoggerError::logging(path, e))
}
