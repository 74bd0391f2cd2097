//! Launch and verify a packaged application bundle.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::process::find_by_executable;
use crate::{AppError, Result};

/// OS capability used by the bundle relaunch strategy.
///
/// Calls block; the supervisor runs them on a dedicated worker thread.
pub trait ProcessLauncher: Send + Sync {
    /// Ask the OS to start the application at `bundle`, whose main
    /// binary is `executable`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the OS refuses the launch.
    fn launch(&self, bundle: &Path, executable: &Path) -> Result<()>;

    /// Pid of a running process whose executable is `executable`, other
    /// than `exclude_pid`.
    fn find_instance(&self, executable: &Path, exclude_pid: u32) -> Option<u32>;

    /// Poll [`find_instance`](Self::find_instance) until it reports a pid or
    /// `timeout` elapses.
    fn verify(
        &self,
        executable: &Path,
        exclude_pid: u32,
        timeout: Duration,
        poll: Duration,
    ) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pid) = self.find_instance(executable, exclude_pid) {
                return Some(pid);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }
}

/// Launcher backed by the real OS.
///
/// On macOS the bundle is opened with `open -n`; elsewhere the bundle's
/// executable is run directly, detached from this process, so the process
/// that verification looks for is the one that was started.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, bundle: &Path, executable: &Path) -> Result<()> {
        if !bundle.exists() {
            return Err(AppError::Launch(format!(
                "bundle {} does not exist",
                bundle.display()
            )));
        }
        if cfg!(target_os = "macos") {
            open_bundle(bundle)?;
        } else {
            spawn_executable(executable)?;
        }
        info!(bundle = %bundle.display(), "bundle launch requested");
        Ok(())
    }

    fn find_instance(&self, executable: &Path, exclude_pid: u32) -> Option<u32> {
        find_by_executable(executable, exclude_pid).into_iter().next()
    }
}

fn open_bundle(bundle: &Path) -> Result<()> {
    let status = Command::new("open")
        .arg("-n")
        .arg(bundle)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| AppError::Launch(format!("failed to run open: {err}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(AppError::Launch(format!("open exited with {status}")))
    }
}

fn spawn_executable(executable: &Path) -> Result<()> {
    let mut cmd = Command::new(executable);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    detach(&mut cmd);
    let child = cmd.spawn().map_err(|err| {
        AppError::Launch(format!("failed to spawn {}: {err}", executable.display()))
    })?;
    debug!(pid = child.id(), executable = %executable.display(), "bundle executable spawned");
    Ok(())
}

/// Put the child in its own process group so it outlives this one.
#[cfg(unix)]
pub(crate) fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn detach(_cmd: &mut Command) {}
