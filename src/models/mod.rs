//! Domain model module declarations.

pub mod flag;
pub mod permission;
pub mod restart;
pub mod session;
