//! Payload carried across a restart by the crash-safe flag.

use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::permission::PermissionId;

/// Tolerated clock skew for records stamped slightly in the future.
const FUTURE_SKEW_SECS: f64 = 5.0;

/// Why the writing process asked to be replaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RestartReason {
    /// Restart-requiring permissions were granted during acquisition.
    PermissionsGranted,
    /// Restart requested explicitly by an operator.
    Manual,
}

impl Display for RestartReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionsGranted => f.write_str("permissions-granted"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Record handed from a terminating process to its replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashSafeFlagRecord {
    /// Unix time in seconds at which the record was written.
    pub timestamp: f64,
    /// Process id of the writer.
    pub pid: u32,
    /// Restart reason.
    pub reason: RestartReason,
    /// Permissions that motivated the restart.
    pub permissions: Vec<PermissionId>,
}

impl CrashSafeFlagRecord {
    /// Build a record stamped with the current time and process id.
    #[must_use]
    pub fn new(reason: RestartReason, permissions: Vec<PermissionId>) -> Self {
        Self {
            timestamp: unix_now(),
            pid: std::process::id(),
            reason,
            permissions,
        }
    }

    /// Seconds elapsed since the record was written (negative if future-dated).
    #[must_use]
    pub fn age_secs(&self, now: f64) -> f64 {
        now - self.timestamp
    }

    /// Whether the record is still within `max_age_secs` of `now`.
    #[must_use]
    pub fn is_fresh(&self, now: f64, max_age_secs: f64) -> bool {
        let age = self.age_secs(now);
        age.is_finite() && age <= max_age_secs && age >= -FUTURE_SKEW_SECS
    }
}

/// Current wall-clock time as fractional unix seconds.
#[must_use]
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
