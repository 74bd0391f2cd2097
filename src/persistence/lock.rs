//! Inter-process restart lock.
//!
//! A well-known file held under a non-blocking exclusive advisory lock
//! while a restart attempt is in flight. The payload `"<pid>:<unix-secs>"`
//! identifies the holder. Staleness is judged only after the advisory lock
//! is held, so two processes can never both decide to reclaim the same
//! record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, info, warn};

use super::fsutil;
use crate::models::flag::unix_now;
use crate::process::process_alive;
use crate::{AppError, Result};

/// Open/lock attempts before giving up on a path that keeps being replaced.
const MAX_OPEN_ATTEMPTS: usize = 3;

/// Holder identity recorded in the lock file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockHolder {
    /// Pid of the process that acquired the lock.
    pub pid: u32,
    /// Unix time in seconds at acquisition.
    pub acquired_at: f64,
}

impl LockHolder {
    /// Holder record for the current process, stamped now.
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: unix_now(),
        }
    }

    /// Parse a `"<pid>:<unix-secs>"` payload.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (pid, ts) = raw.trim().split_once(':')?;
        let pid = pid.trim().parse::<u32>().ok()?;
        let acquired_at = ts.trim().parse::<f64>().ok()?;
        if pid == 0 || !acquired_at.is_finite() {
            return None;
        }
        Some(Self { pid, acquired_at })
    }

    /// Serialize to the on-disk payload.
    #[must_use]
    pub fn to_payload(&self) -> String {
        format!("{}:{}", self.pid, self.acquired_at)
    }

    /// Seconds since acquisition.
    #[must_use]
    pub fn age_secs(&self, now: f64) -> f64 {
        now - self.acquired_at
    }

    /// Whether the holder process still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        process_alive(self.pid)
    }
}

/// Result of a non-blocking acquisition.
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock is ours until released or dropped.
    Acquired(RestartLock),
    /// Another process holds it; carries the recorded holder when readable.
    Contended(Option<LockHolder>),
}

/// A held restart lock. Dropping it releases the advisory lock.
#[derive(Debug)]
pub struct RestartLock {
    file: File,
    path: PathBuf,
    holder: LockHolder,
}

impl RestartLock {
    /// Try to take the lock without blocking.
    ///
    /// A record whose pid is dead is reclaimed by unlinking the file and
    /// locking a fresh one. A record whose pid is alive is respected
    /// regardless of age; one older than `ttl` is only reported.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` if the lock file cannot be opened, locked,
    /// or written for reasons other than contention.
    pub fn try_acquire(path: &Path, ttl: Duration) -> Result<LockAttempt> {
        fsutil::ensure_parent(path)
            .map_err(|err| AppError::Lock(format!("failed to create lock directory: {err}")))?;

        for _ in 0..MAX_OPEN_ATTEMPTS {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)
                .map_err(|err| {
                    AppError::Lock(format!("failed to open {}: {err}", path.display()))
                })?;

            if let Err(err) = file.try_lock_exclusive() {
                if is_contended(&err) {
                    let holder = Self::inspect(path);
                    debug!(holder = ?holder, "restart lock held by another process");
                    return Ok(LockAttempt::Contended(holder));
                }
                return Err(AppError::Lock(format!("failed to lock: {err}")));
            }

            if !fsutil::same_file(&file, path) {
                debug!("lock file was replaced while locking; retrying");
                continue;
            }

            let mut raw = String::new();
            file.read_to_string(&mut raw)
                .map_err(|err| AppError::Lock(format!("failed to read lock payload: {err}")))?;

            let own_pid = std::process::id();
            match LockHolder::parse(&raw) {
                Some(previous) if previous.pid != own_pid => {
                    let age = previous.age_secs(unix_now());
                    if previous.is_alive() {
                        if age > ttl.as_secs_f64() {
                            warn!(
                                pid = previous.pid,
                                age_secs = age,
                                "restart lock holder is alive past ttl; respecting lock"
                            );
                        }
                        release_handle(&file);
                        return Ok(LockAttempt::Contended(Some(previous)));
                    }
                    info!(
                        pid = previous.pid,
                        age_secs = age,
                        "reclaiming stale restart lock"
                    );
                    fsutil::remove_if_exists(path).map_err(|err| {
                        AppError::Lock(format!("failed to unlink stale lock: {err}"))
                    })?;
                    drop(file);
                    continue;
                }
                _ => {}
            }

            let holder = LockHolder::current();
            write_payload(&mut file, &holder.to_payload())?;
            info!(pid = holder.pid, path = %path.display(), "restart lock acquired");
            return Ok(LockAttempt::Acquired(Self {
                file,
                path: path.to_path_buf(),
                holder,
            }));
        }

        Err(AppError::Lock(format!(
            "lock file {} kept changing during acquisition",
            path.display()
        )))
    }

    /// Read the recorded holder without locking (diagnostics only).
    #[must_use]
    pub fn inspect(path: &Path) -> Option<LockHolder> {
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| LockHolder::parse(&raw))
    }

    /// Identity written by this holder.
    #[must_use]
    pub fn holder(&self) -> LockHolder {
        self.holder
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clear the payload and release the lock so a later attempt can run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` if the payload cannot be cleared. The
    /// advisory lock is released either way.
    pub fn release(self) -> Result<()> {
        let cleared = self
            .file
            .set_len(0)
            .map_err(|err| AppError::Lock(format!("failed to clear lock payload: {err}")));
        info!(path = %self.path.display(), "restart lock released");
        // Drop unlocks.
        cleared
    }
}

impl Drop for RestartLock {
    fn drop(&mut self) {
        release_handle(&self.file);
    }
}

fn write_payload(file: &mut File, payload: &str) -> Result<()> {
    file.set_len(0)
        .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
        .and_then(|()| file.write_all(payload.as_bytes()))
        .and_then(|()| file.sync_all())
        .map_err(|err| AppError::Lock(format!("failed to write lock payload: {err}")))
}

fn release_handle(file: &File) {
    if let Err(err) = FileExt::unlock(file) {
        warn!(%err, "failed to unlock restart lock");
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
