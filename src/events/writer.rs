//! Lifecycle event log: one JSON object per line, one file per UTC day.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDate;

use super::{LifecycleEvent, NotificationSink};
use crate::{AppError, Result};

/// Day file currently open for appends.
struct DayFile {
    date: NaiveDate,
    file: File,
}

/// Appends events to `<log_dir>/lifecycle-YYYY-MM-DD.jsonl`.
///
/// The file is chosen by the event's own timestamp, so an event is always
/// stored under the day it happened. Each line is written with a single
/// append, which keeps lines whole when several processes share the
/// directory across a restart.
pub struct JsonlEventLog {
    log_dir: PathBuf,
    open: Mutex<Option<DayFile>>,
}

impl JsonlEventLog {
    /// Construct a log that stores files in `log_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Io(format!(
                "failed to create event log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            open: Mutex::new(None),
        })
    }

    /// Path of the file written for `date`.
    #[must_use]
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("lifecycle-{date}.jsonl"))
    }

    fn open_day(&self, date: NaiveDate) -> io::Result<DayFile> {
        let path = self.file_for(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(DayFile { date, file })
    }
}

impl NotificationSink for JsonlEventLog {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).map_err(|e| {
            AppError::Notify(format!("unserializable {} event: {e}", event.kind.as_str()))
        })?;
        line.push(b'\n');
        let date = event.timestamp.date_naive();

        let mut open = self
            .open
            .lock()
            .map_err(|_| AppError::Notify("event log mutex poisoned".into()))?;

        let day = match open.take() {
            Some(day) if day.date == date => day,
            _ => self.open_day(date).map_err(|e| {
                AppError::Notify(format!("event log {}: {e}", self.file_for(date).display()))
            })?,
        };
        let day = open.insert(day);

        day.file.write_all(&line).map_err(|e| {
            AppError::Notify(format!("event log {}: {e}", self.file_for(date).display()))
        })
    }
}
