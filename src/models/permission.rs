//! Permission identifiers and status values.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Identifier of an OS consent grant (e.g. `microphone`, `screen_capture`).
///
/// Identifiers are lowercase `snake_case` so they can appear unchanged in
/// config files, flag records, and notification payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionId(String);

impl PermissionId {
    /// Parse and validate a permission identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the identifier is empty or contains
    /// characters other than lowercase ASCII letters, digits, and `_`.
    pub fn new(raw: impl Into<String>) -> crate::Result<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(raw))
        } else {
            Err(AppError::Config(format!(
                "invalid permission id '{raw}': expected lowercase snake_case"
            )))
        }
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PermissionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PermissionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PermissionId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PermissionId> for String {
    fn from(value: PermissionId) -> Self {
        value.0
    }
}

/// Result of probing a permission's current state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// The user has not been asked yet.
    NotDetermined,
    /// The grant is held.
    Granted,
    /// The user refused the grant.
    Denied,
    /// The probe itself failed.
    Error,
}

impl PermissionStatus {
    /// Whether a wait on this permission can stop.
    ///
    /// Only `granted` and `denied` end a wait; `not_determined` and
    /// `error` keep polling.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Granted | Self::Denied)
    }

    /// Parse the textual form printed by external probes.
    ///
    /// Unknown text maps to [`PermissionStatus::Error`].
    #[must_use]
    pub fn parse_probe(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "granted" | "authorized" => Self::Granted,
            "denied" | "restricted" => Self::Denied,
            "not_determined" | "notdetermined" | "unknown" => Self::NotDetermined,
            _ => Self::Error,
        }
    }

    /// Stable lowercase name used in logs and payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDetermined => "not_determined",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Error => "error",
        }
    }
}

impl Display for PermissionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
