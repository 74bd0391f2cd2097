//! Restart supervisor.
//!
//! [`RestartSupervisor::trigger_restart`] runs one attempt on a blocking
//! worker so OS launch calls never stall the async scheduler. An attempt
//! takes the inter-process [`RestartLock`], then walks
//! [`RestartStrategy::PRIORITY`]:
//!
//! 1. `bundle_relaunch`: launch the packaged bundle and wait for a new
//!    process to appear, then persist the flag and exit 0.
//! 2. `replace_image`: packaged builds only. Persist the flag, then
//!    replace the process image with itself plus the restart marker env.
//! 3. `dev_relaunch`: only when allowed. Persist the flag, spawn a
//!    detached copy with the restart marker env and exit 0.
//!
//! A failed strategy is never repeated; a failed primary is marked
//! unavailable for the rest of the attempt. When every strategy fails the
//! lock is released and the current process keeps running.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};

use super::guard::SingleFlight;
use super::host::{ProcessHost, RelaunchCommand};
use super::launcher::ProcessLauncher;
use crate::config::{RestartConfig, StatePaths};
use crate::models::flag::RestartReason;
use crate::models::permission::PermissionId;
use crate::models::restart::{
    RestartAttemptState, RestartOutcome, RestartStrategy, StrategyOutcome,
};
use crate::persistence::{CrashSafeFlag, LockAttempt, RestartLock};
use crate::{AppError, Result};

/// Exit code used after a verified relaunch.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Orchestrates one restart per trigger.
pub struct RestartSupervisor {
    inner: Arc<AttemptRunner>,
    guard: SingleFlight,
}

struct AttemptRunner {
    config: RestartConfig,
    flag: CrashSafeFlag,
    lock_path: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    host: Arc<dyn ProcessHost>,
}

impl RestartSupervisor {
    /// Build a supervisor over the state files in `paths`.
    #[must_use]
    pub fn new(
        config: RestartConfig,
        paths: &StatePaths,
        launcher: Arc<dyn ProcessLauncher>,
        host: Arc<dyn ProcessHost>,
    ) -> Self {
        let flag = CrashSafeFlag::new(paths.flag.clone(), config.flag_max_age());
        Self {
            inner: Arc::new(AttemptRunner {
                config,
                flag,
                lock_path: paths.lock.clone(),
                launcher,
                host,
            }),
            guard: SingleFlight::new(),
        }
    }

    /// Share an externally owned single-flight guard.
    #[must_use]
    pub fn with_guard(mut self, guard: SingleFlight) -> Self {
        self.guard = guard;
        self
    }

    /// The guard serializing attempts in this process.
    #[must_use]
    pub fn guard(&self) -> &SingleFlight {
        &self.guard
    }

    /// The flag this supervisor writes before relaunching.
    #[must_use]
    pub fn flag(&self) -> &CrashSafeFlag {
        &self.inner.flag
    }

    /// Start a restart attempt in the background.
    ///
    /// Returns `false` without side effects when restarts are disabled,
    /// another attempt is in flight in this process, or no Tokio runtime
    /// is available.
    pub fn trigger_restart(&self, reason: RestartReason, permissions: &[PermissionId]) -> bool {
        self.dispatch(reason, permissions).is_some()
    }

    /// Like [`trigger_restart`](Self::trigger_restart) but hands back the
    /// worker so the caller can observe the outcome when the process was
    /// not terminated.
    pub fn dispatch(
        &self,
        reason: RestartReason,
        permissions: &[PermissionId],
    ) -> Option<JoinHandle<RestartOutcome>> {
        if self.inner.config.dry_run {
            info!(%reason, "restart skipped: dry run");
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("restart dispatch requires a tokio runtime");
            return None;
        };
        let Some(permit) = self.guard.try_acquire() else {
            info!(%reason, "restart skipped: attempt already in flight");
            return None;
        };

        let runner = Arc::clone(&self.inner);
        let permissions = permissions.to_vec();
        Some(runtime.spawn_blocking(move || {
            let _permit = permit;
            runner.attempt(reason, &permissions)
        }))
    }

    /// Run an attempt on the calling thread.
    ///
    /// Returns `None` under the same conditions as
    /// [`trigger_restart`](Self::trigger_restart) returns `false`.
    pub fn run_blocking(
        &self,
        reason: RestartReason,
        permissions: &[PermissionId],
    ) -> Option<RestartOutcome> {
        if self.inner.config.dry_run {
            info!(%reason, "restart skipped: dry run");
            return None;
        }
        let _permit = self.guard.try_acquire()?;
        Some(self.inner.attempt(reason, permissions))
    }
}

impl AttemptRunner {
    fn attempt(&self, reason: RestartReason, permissions: &[PermissionId]) -> RestartOutcome {
        let span = info_span!("restart_attempt", %reason, pid = std::process::id());
        let _guard = span.enter();

        let lock = match RestartLock::try_acquire(&self.lock_path, self.config.lock_ttl()) {
            Ok(LockAttempt::Acquired(lock)) => lock,
            Ok(LockAttempt::Contended(holder)) => {
                info!(
                    holder_pid = holder.map(|h| h.pid),
                    "restart already in progress in another process"
                );
                return RestartOutcome::Contended;
            }
            Err(err) => {
                error!(%err, "cannot take restart lock; keeping current process");
                return RestartOutcome::Exhausted { tried: Vec::new() };
            }
        };

        self.flag.discard_if_invalid();

        let mut state = RestartAttemptState::default();
        for strategy in RestartStrategy::PRIORITY {
            if !state.may_attempt(strategy) {
                continue;
            }
            if let Err(err) = self.check_applicable(strategy) {
                debug!(%strategy, %err, "restart strategy not applicable");
                state.fail(strategy);
                continue;
            }

            state.begin(strategy);
            info!(%strategy, "attempting restart strategy");
            match self.run_strategy(strategy, reason, permissions) {
                Ok(outcome) => {
                    state.succeed(strategy);
                    info!(%strategy, ?outcome, "restart strategy succeeded");
                    if outcome.requires_exit() {
                        self.host.exit(SUCCESS_EXIT_CODE);
                    }
                    return RestartOutcome::Succeeded { strategy, outcome };
                }
                Err(err) => {
                    warn!(%strategy, %err, "restart strategy failed");
                    state.fail(strategy);
                }
            }
        }

        state.exhaust();
        error!(
            tried = ?state.tried,
            "all restart strategies exhausted; keeping current process"
        );
        if self.flag.remove() {
            debug!("removed flag written by failed strategies");
        }
        if let Err(err) = lock.release() {
            warn!(%err, "failed to release restart lock");
        }
        RestartOutcome::Exhausted { tried: state.tried }
    }

    fn check_applicable(&self, strategy: RestartStrategy) -> Result<()> {
        match strategy {
            RestartStrategy::BundleRelaunch => {
                if self.config.bundle_path.is_none() {
                    return Err(AppError::Restart("no bundle configured".into()));
                }
                if self.config.resolved_bundle_executable().is_none() {
                    return Err(AppError::Restart("bundle executable unknown".into()));
                }
                Ok(())
            }
            RestartStrategy::ReplaceImage => {
                let exe = self.host.current_executable()?;
                if self.config.is_packaged(&exe) {
                    Ok(())
                } else {
                    Err(AppError::Restart("not running from a packaged build".into()))
                }
            }
            RestartStrategy::DevRelaunch => {
                if self.config.allow_dev_relaunch {
                    Ok(())
                } else {
                    Err(AppError::Restart("development relaunch disabled".into()))
                }
            }
        }
    }

    fn run_strategy(
        &self,
        strategy: RestartStrategy,
        reason: RestartReason,
        permissions: &[PermissionId],
    ) -> Result<StrategyOutcome> {
        match strategy {
            RestartStrategy::BundleRelaunch => self.relaunch_bundle(reason, permissions),
            RestartStrategy::ReplaceImage => {
                let command = self.relaunch_command()?;
                self.persist_flag(reason, permissions);
                self.host.replace_image(&command)?;
                Ok(StrategyOutcome::ImageReplaced)
            }
            RestartStrategy::DevRelaunch => {
                let command = self.relaunch_command()?;
                self.persist_flag(reason, permissions);
                let pid = self.host.spawn_detached(&command)?;
                Ok(StrategyOutcome::Spawned { pid })
            }
        }
    }

    fn relaunch_bundle(
        &self,
        reason: RestartReason,
        permissions: &[PermissionId],
    ) -> Result<StrategyOutcome> {
        let (Some(bundle), Some(executable)) = (
            self.config.bundle_path.as_ref(),
            self.config.resolved_bundle_executable(),
        ) else {
            return Err(AppError::Restart("no bundle configured".into()));
        };

        self.launcher.launch(bundle, &executable)?;

        let own_pid = std::process::id();
        let pid = self
            .launcher
            .verify(
                &executable,
                own_pid,
                self.config.verify_timeout(),
                self.config.verify_poll(),
            )
            .ok_or_else(|| {
                AppError::Launch(format!(
                    "no new {} process within {:?}",
                    executable.display(),
                    self.config.verify_timeout()
                ))
            })?;

        info!(pid, "relaunched process verified");
        self.persist_flag(reason, permissions);
        Ok(StrategyOutcome::Relaunched { pid })
    }

    fn relaunch_command(&self) -> Result<RelaunchCommand> {
        Ok(RelaunchCommand::with_restart_marker(
            self.host.current_executable()?,
            self.host.current_args(),
        ))
    }

    fn persist_flag(&self, reason: RestartReason, permissions: &[PermissionId]) {
        if !self.flag.write(reason, permissions) {
            warn!("continuing restart without flag; env and first-run markers remain");
        }
    }
}
