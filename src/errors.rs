//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering all lifecycle failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Crash-safe flag could not be written, read, or parsed.
    Flag(String),
    /// Restart lock could not be opened, written, or released.
    Lock(String),
    /// A permission capability failed to check, activate, or open settings.
    Permission(String),
    /// Launching or verifying a relaunched process failed.
    Launch(String),
    /// A restart strategy failed or was not applicable.
    Restart(String),
    /// A lifecycle notification could not be delivered.
    Notify(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Flag(msg) => write!(f, "flag: {msg}"),
            Self::Lock(msg) => write!(f, "lock: {msg}"),
            Self::Permission(msg) => write!(f, "permission: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Restart(msg) => write!(f, "restart: {msg}"),
            Self::Notify(msg) => write!(f, "notify: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
