//! Sentinel recording that one acquisition cycle has completed.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::fsutil;

/// Existence-only marker file.
#[derive(Debug, Clone)]
pub struct FirstRunMarker {
    path: PathBuf,
}

impl FirstRunMarker {
    /// Create a handle; nothing is touched on disk.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Marker path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a completed cycle has been recorded.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the marker durably. Returns `false` on failure.
    pub fn persist(&self) -> bool {
        let result = fsutil::ensure_parent(&self.path).and_then(|()| {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&self.path)?
                .sync_all()
        });
        match result {
            Ok(()) => {
                debug!(path = %self.path.display(), "first-run marker persisted");
                true
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to persist first-run marker");
                false
            }
        }
    }

    /// Remove the marker so the next boot runs acquisition again.
    pub fn clear(&self) -> bool {
        match fsutil::remove_if_exists(&self.path) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to clear first-run marker");
                false
            }
        }
    }
}
