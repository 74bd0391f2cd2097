//! Cross-process state kept on the local filesystem.
//!
//! Three files are shared between a process and its replacement: the
//! crash-safe flag (atomic replace), the restart lock (exclusive advisory
//! lock), and the first-run marker (existence only).

pub mod flag;
pub(crate) mod fsutil;
pub mod lock;
pub mod marker;

pub use flag::CrashSafeFlag;
pub use lock::{LockAttempt, LockHolder, RestartLock};
pub use marker::FirstRunMarker;
