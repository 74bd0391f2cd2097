#![forbid(unsafe_code)]

//! Process-lifecycle layer of a desktop assistant.
//!
//! Acquires the required OS permissions at startup and, when a newly
//! granted permission only applies to a fresh process, restarts the
//! application through a crash-safe handshake on the local filesystem.

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod permissions;
pub mod persistence;
pub mod process;
pub mod restart;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
