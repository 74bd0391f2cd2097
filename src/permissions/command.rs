//! Capability backed by external commands from the config file.
//!
//! The check command prints one of `granted`, `denied`, or
//! `not_determined` on stdout. Activation and settings commands only need
//! to exit successfully.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::{CapabilityFuture, PermissionCapability};
use crate::config::PermissionConfig;
use crate::models::permission::{PermissionId, PermissionStatus};
use crate::{AppError, Result};

/// Permission capability that shells out to configured commands.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    id: PermissionId,
    check: Vec<String>,
    activate: Vec<String>,
    open_settings: Vec<String>,
}

impl CommandCapability {
    /// Build from a `[[permissions]]` entry.
    #[must_use]
    pub fn from_config(entry: &PermissionConfig) -> Self {
        Self {
            id: entry.id.clone(),
            check: entry.check.clone(),
            activate: entry.activate.clone(),
            open_settings: entry.open_settings.clone(),
        }
    }

    async fn run(&self, action: &str, argv: &[String]) -> Result<String> {
        let Some((program, args)) = argv.split_first() else {
            return Err(AppError::Permission(format!(
                "{}: no {action} command configured",
                self.id
            )));
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                AppError::Permission(format!("{}: failed to run {action} command: {err}", self.id))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Permission(format!(
                "{}: {action} command exited with {}: {}",
                self.id,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PermissionCapability for CommandCapability {
    fn check_status(&self) -> CapabilityFuture<'_, PermissionStatus> {
        Box::pin(async move {
            let stdout = self.run("check", &self.check).await?;
            let status = PermissionStatus::parse_probe(&stdout);
            debug!(permission = %self.id, %status, "probe finished");
            Ok(status)
        })
    }

    fn activate(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async move {
            if self.activate.is_empty() {
                debug!(permission = %self.id, "no activation command; waiting for grant");
                return Ok(());
            }
            self.run("activate", &self.activate).await.map(|_| ())
        })
    }

    fn open_settings(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async move {
            self.run("open_settings", &self.open_settings)
                .await
                .map(|_| ())
        })
    }
}
