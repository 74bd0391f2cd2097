//! Operations on the current process: image replacement, detached
//! respawn, and termination.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::info;

use super::launcher::detach;
use crate::config::RESTARTED_ENV;
use crate::{AppError, Result};

/// Command line used to start a replacement of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, without the program name.
    pub args: Vec<OsString>,
    /// Extra environment variables.
    pub env: Vec<(OsString, OsString)>,
}

impl RelaunchCommand {
    /// Same program and arguments, plus the restart marker variable.
    #[must_use]
    pub fn with_restart_marker(program: PathBuf, args: Vec<OsString>) -> Self {
        Self {
            program,
            args,
            env: vec![(OsString::from(RESTARTED_ENV), OsString::from("1"))],
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Arguments that start a normal boot: `--config <path> [--log-format <fmt>] run`.
///
/// A relaunch must never replay a maintenance subcommand such as
/// `restart`, or the replacement would restart again.
#[must_use]
pub fn boot_args(config_path: &Path, log_format: Option<&str>) -> Vec<OsString> {
    let mut args = vec![OsString::from("--config"), config_path.as_os_str().to_owned()];
    if let Some(format) = log_format {
        args.push(OsString::from("--log-format"));
        args.push(OsString::from(format));
    }
    args.push(OsString::from("run"));
    args
}

/// Control over the current process.
pub trait ProcessHost: Send + Sync {
    /// Path of the running executable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Restart` if the path cannot be resolved.
    fn current_executable(&self) -> Result<PathBuf>;

    /// Arguments the process was started with, without the program name.
    fn current_args(&self) -> Vec<OsString>;

    /// Replace the current process image with `command`.
    ///
    /// On a real host this only returns on failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Restart` if the replacement could not happen.
    fn replace_image(&self, command: &RelaunchCommand) -> Result<()>;

    /// Start `command` as an independent process and return its pid.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Restart` if the spawn fails.
    fn spawn_detached(&self, command: &RelaunchCommand) -> Result<u32>;

    /// Terminate the current process with `code`.
    fn exit(&self, code: i32);
}

/// Host backed by the real process.
#[derive(Debug, Default, Clone)]
pub struct SystemHost {
    relaunch_args: Option<Vec<OsString>>,
}

impl SystemHost {
    /// Relaunch with `args` instead of the arguments this process got.
    #[must_use]
    pub fn with_relaunch_args(mut self, args: Vec<OsString>) -> Self {
        self.relaunch_args = Some(args);
        self
    }
}

impl ProcessHost for SystemHost {
    fn current_executable(&self) -> Result<PathBuf> {
        std::env::current_exe()
            .map_err(|err| AppError::Restart(format!("cannot resolve current executable: {err}")))
    }

    fn current_args(&self) -> Vec<OsString> {
        match &self.relaunch_args {
            Some(args) => args.clone(),
            None => std::env::args_os().skip(1).collect(),
        }
    }

    #[cfg(unix)]
    fn replace_image(&self, command: &RelaunchCommand) -> Result<()> {
        use std::os::unix::process::CommandExt;

        info!(program = %command.program.display(), "replacing process image");
        let err = command.to_command().exec();
        Err(AppError::Restart(format!("exec failed: {err}")))
    }

    #[cfg(not(unix))]
    fn replace_image(&self, _command: &RelaunchCommand) -> Result<()> {
        Err(AppError::Restart(
            "process image replacement is not supported on this platform".into(),
        ))
    }

    fn spawn_detached(&self, command: &RelaunchCommand) -> Result<u32> {
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);
        let child = cmd
            .spawn()
            .map_err(|err| AppError::Restart(format!("failed to spawn relaunch: {err}")))?;
        let pid = child.id();
        info!(pid, program = %command.program.display(), "relaunch spawned");
        Ok(pid)
    }

    fn exit(&self, code: i32) {
        info!(code, "terminating current process");
        std::process::exit(code);
    }
}
