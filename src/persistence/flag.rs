//! Crash-safe, read-once restart flag.
//!
//! The writer serializes a [`CrashSafeFlagRecord`] into a temporary file
//! next to the canonical path, fsyncs it, and renames it into place, so a
//! reader observes either a complete record or none at all. The reader
//! takes an exclusive advisory lock on the open handle, clears the content,
//! and only then unlinks the file; a second reader that raced in before
//! the unlink finds an empty record instead of a valid one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::fsutil;
use crate::models::flag::{unix_now, CrashSafeFlagRecord, RestartReason};
use crate::models::permission::PermissionId;
use crate::{AppError, Result};

/// What a read found at the canonical path.
#[derive(Debug)]
enum Inspection {
    Absent,
    Valid(CrashSafeFlagRecord),
    Stale { age_secs: f64 },
    Corrupt(String),
}

/// Handle on the flag file at a fixed path.
#[derive(Debug, Clone)]
pub struct CrashSafeFlag {
    path: PathBuf,
    max_age: Duration,
}

impl CrashSafeFlag {
    /// Create a handle; nothing is touched on disk.
    #[must_use]
    pub fn new(path: PathBuf, max_age: Duration) -> Self {
        Self { path, max_age }
    }

    /// Canonical flag path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a fresh record for `reason` and `permissions`.
    ///
    /// Returns `false` on any I/O failure; the canonical path is then
    /// either absent or still holds its previous complete record.
    pub fn write(&self, reason: RestartReason, permissions: &[PermissionId]) -> bool {
        self.write_record(&CrashSafeFlagRecord::new(reason, permissions.to_vec()))
    }

    /// Persist an explicit record (same guarantees as [`write`](Self::write)).
    pub fn write_record(&self, record: &CrashSafeFlagRecord) -> bool {
        match self.try_write(record) {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    reason = %record.reason,
                    permissions = record.permissions.len(),
                    "restart flag written"
                );
                true
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to write restart flag");
                false
            }
        }
    }

    fn try_write(&self, record: &CrashSafeFlagRecord) -> Result<()> {
        fsutil::ensure_parent(&self.path)
            .map_err(|err| AppError::Flag(format!("failed to create flag directory: {err}")))?;
        let parent = self
            .path
            .parent()
            .ok_or_else(|| AppError::Flag("flag path has no parent directory".into()))?;

        let payload = serde_json::to_vec(record)
            .map_err(|err| AppError::Flag(format!("failed to serialize flag: {err}")))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::Flag(format!("failed to create temporary file: {err}")))?;
        tmp.write_all(&payload)
            .map_err(|err| AppError::Flag(format!("failed to write temporary file: {err}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|err| AppError::Flag(format!("failed to sync temporary file: {err}")))?;

        tmp.persist(&self.path).map_err(|err| {
            AppError::Flag(format!(
                "failed to persist flag to {}: {}",
                self.path.display(),
                err.error
            ))
        })?;

        if let Err(err) = fsutil::sync_dir(parent) {
            debug!(%err, "flag directory sync failed");
        }
        Ok(())
    }

    /// Consume the record: read it, then clear and delete the file.
    ///
    /// Returns `None` when the file is missing, unreadable, corrupt, or
    /// older than the maximum age. Corrupt and expired records are cleared
    /// as a side effect.
    pub fn read_and_remove(&self) -> Option<CrashSafeFlagRecord> {
        match self.try_read_and_remove() {
            Ok(inspection) => self.report(inspection, "consumed"),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to read restart flag");
                None
            }
        }
    }

    fn try_read_and_remove(&self) -> Result<Inspection> {
        let Some(mut file) = self.open(true)? else {
            return Ok(Inspection::Absent);
        };

        file.lock_exclusive()
            .map_err(|err| AppError::Flag(format!("failed to lock flag: {err}")))?;

        let inspection = self.inspect_handle(&mut file);

        // Clear under the lock whatever was found, so a racing reader sees nothing.
        if let Err(err) = file.set_len(0).and_then(|()| file.sync_all()) {
            warn!(%err, "failed to clear restart flag content");
        }

        let still_ours = fsutil::same_file(&file, &self.path);
        if let Err(err) = FileExt::unlock(&file) {
            debug!(%err, "failed to unlock restart flag");
        }
        drop(file);

        if still_ours {
            if let Err(err) = fsutil::remove_if_exists(&self.path) {
                warn!(%err, "failed to delete cleared restart flag");
            }
        } else {
            debug!("flag path was replaced concurrently; leaving the new record in place");
        }

        inspection
    }

    /// Non-destructive read applying the same validity rules.
    #[must_use]
    pub fn peek(&self) -> Option<CrashSafeFlagRecord> {
        match self.try_peek() {
            Ok(inspection) => self.report(inspection, "peeked"),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to peek restart flag");
                None
            }
        }
    }

    fn try_peek(&self) -> Result<Inspection> {
        let Some(mut file) = self.open(false)? else {
            return Ok(Inspection::Absent);
        };
        FileExt::lock_shared(&file)
            .map_err(|err| AppError::Flag(format!("failed to lock flag: {err}")))?;
        let inspection = self.inspect_handle(&mut file);
        if let Err(err) = FileExt::unlock(&file) {
            debug!(%err, "failed to unlock restart flag");
        }
        inspection
    }

    /// Whether the flag file exists (regardless of validity).
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Best-effort deletion. Returns `true` if a file was removed.
    pub fn remove(&self) -> bool {
        match fsutil::remove_if_exists(&self.path) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to remove restart flag");
                false
            }
        }
    }

    /// Delete a leftover record that is no longer valid.
    ///
    /// Returns `true` if a stale or corrupt file was discarded.
    pub fn discard_if_invalid(&self) -> bool {
        if !self.exists() || self.peek().is_some() {
            return false;
        }
        info!(path = %self.path.display(), "discarding stale restart flag");
        self.remove()
    }

    fn open(&self, write: bool) -> Result<Option<File>> {
        match OpenOptions::new().read(true).write(write).open(&self.path) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Flag(format!(
                "failed to open {}: {err}",
                self.path.display()
            ))),
        }
    }

    fn inspect_handle(&self, file: &mut File) -> Result<Inspection> {
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|err| AppError::Flag(format!("failed to read flag: {err}")))?;

        if raw.trim().is_empty() {
            return Ok(Inspection::Corrupt("empty record".into()));
        }

        let record: CrashSafeFlagRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => return Ok(Inspection::Corrupt(err.to_string())),
        };

        let now = unix_now();
        if record.is_fresh(now, self.max_age.as_secs_f64()) {
            Ok(Inspection::Valid(record))
        } else {
            Ok(Inspection::Stale {
                age_secs: record.age_secs(now),
            })
        }
    }

    fn report(&self, inspection: Inspection, action: &str) -> Option<CrashSafeFlagRecord> {
        match inspection {
            Inspection::Absent => {
                debug!(path = %self.path.display(), "no restart flag present");
                None
            }
            Inspection::Valid(record) => {
                info!(
                    writer_pid = record.pid,
                    reason = %record.reason,
                    action,
                    "restart flag found"
                );
                Some(record)
            }
            Inspection::Stale { age_secs } => {
                info!(age_secs, action, "ignoring expired restart flag");
                None
            }
            Inspection::Corrupt(reason) => {
                warn!(%reason, action, "ignoring corrupt restart flag");
                None
            }
        }
    }
}
