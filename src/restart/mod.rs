//! Restart orchestration.
//!
//! Covers the in-process single-flight guard, the OS capabilities used to
//! relaunch (bundle launch, process-table verification, image
//! replacement, detached spawn), and the supervisor that tries each
//! relaunch strategy in priority order.

pub mod guard;
pub mod host;
pub mod launcher;
pub mod supervisor;

pub use guard::{SingleFlight, SingleFlightPermit};
pub use host::{boot_args, ProcessHost, RelaunchCommand, SystemHost};
pub use launcher::{ProcessLauncher, SystemLauncher};
pub use supervisor::RestartSupervisor;
