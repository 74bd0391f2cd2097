//! Per-boot permission acquisition session.
//!
//! Boot check: a consumed restart flag, the restart marker env var, or an
//! existing first-run marker all complete the cycle immediately. Otherwise
//! every permission is probed once; missing ones are requested strictly in
//! table order, each polled without a timeout until it is granted or
//! denied. If a restart-requiring permission went from not granted to
//! granted, the first-run marker is persisted and the restart supervisor
//! takes over.
//!
//! Waits are the only suspension points and are cancelled through the
//! coordinator's `CancellationToken`. A cancelled session writes neither
//! the flag nor the marker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{CapabilityDescriptor, CapabilityTable};
use crate::config::{env_flag, GlobalConfig, RESTARTED_ENV};
use crate::events::{publish_quietly, LifecycleEvent, LifecycleEventKind, NotificationSink};
use crate::models::flag::RestartReason;
use crate::models::permission::{PermissionId, PermissionStatus};
use crate::models::restart::RestartOutcome;
use crate::models::session::PermissionRequestSession;
use crate::persistence::{CrashSafeFlag, FirstRunMarker};
use crate::restart::RestartSupervisor;

/// Polling behaviour of the request phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Delay between status probes while waiting for a grant.
    pub poll_interval: Duration,
    /// Publish a `status-checked` event every N probes while waiting.
    pub status_report_every: u32,
}

impl From<&GlobalConfig> for CoordinatorSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            status_report_every: config.status_report_every.max(1),
        }
    }
}

/// Boot-time signals read once from the process environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootSignals {
    /// The restart marker environment variable was set.
    pub restarted_env: bool,
}

impl BootSignals {
    /// Read the restart marker from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            restarted_env: env_flag(RESTARTED_ENV),
        }
    }
}

/// Why a session completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPath {
    /// A restart flag from the previous process was consumed.
    RestartFlag,
    /// The restart marker environment variable was present.
    RestartEnv,
    /// A previous cycle already completed.
    FirstRunMarker,
    /// Every permission was granted at boot.
    AlreadyGranted,
    /// Permissions were requested and no restart was needed.
    Resolved,
}

impl CompletionPath {
    /// Stable name used in payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RestartFlag => "restart_flag",
            Self::RestartEnv => "restart_env",
            Self::FirstRunMarker => "first_run_marker",
            Self::AlreadyGranted => "already_granted",
            Self::Resolved => "resolved",
        }
    }
}

/// How one boot's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The cycle is complete; no restart is needed.
    Completed {
        /// Session identifier used in notifications.
        session_id: String,
        /// Which rule completed the cycle.
        path: CompletionPath,
        /// Resolved statuses in request order (empty when not probed).
        statuses: Vec<(PermissionId, PermissionStatus)>,
    },
    /// A restart was handed to the supervisor.
    RestartPending {
        /// Session identifier used in notifications.
        session_id: String,
        /// Restart-requiring permissions granted during this cycle.
        permissions: Vec<PermissionId>,
        /// Attempt result when one ran and returned; `None` when not dispatched.
        restart: Option<RestartOutcome>,
    },
    /// The supervisor could not restart the process.
    RestartFailed {
        /// Session identifier used in notifications.
        session_id: String,
        /// Restart-requiring permissions granted during this cycle.
        permissions: Vec<PermissionId>,
        /// Human-readable failure.
        reason: String,
    },
    /// The coordinator was stopped during a wait.
    Cancelled {
        /// Session identifier used in notifications.
        session_id: String,
    },
}

/// Top-level acquisition session for one boot.
pub struct PermissionCoordinator {
    table: CapabilityTable,
    settings: CoordinatorSettings,
    flag: CrashSafeFlag,
    marker: FirstRunMarker,
    supervisor: Arc<RestartSupervisor>,
    sink: Arc<dyn NotificationSink>,
    signals: BootSignals,
    cancel: CancellationToken,
}

impl PermissionCoordinator {
    /// Assemble a coordinator. Boot signals default to "none".
    #[must_use]
    pub fn new(
        table: CapabilityTable,
        settings: CoordinatorSettings,
        marker: FirstRunMarker,
        supervisor: Arc<RestartSupervisor>,
        sink: Arc<dyn NotificationSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            table,
            settings,
            flag: supervisor.flag().clone(),
            marker,
            supervisor,
            sink,
            signals: BootSignals::default(),
            cancel,
        }
    }

    /// Use explicit boot signals (normally [`BootSignals::from_env`]).
    #[must_use]
    pub fn with_boot_signals(mut self, signals: BootSignals) -> Self {
        self.signals = signals;
        self
    }

    /// Cancel any outstanding permission wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run the state machine for this boot.
    pub async fn run(&self) -> SessionOutcome {
        if let Some(outcome) = self.boot_check() {
            return outcome;
        }

        let mut session = PermissionRequestSession::new(self.table.ids());
        let span = info_span!("permission_session", session_id = %session.id);
        self.run_session(&mut session).instrument(span).await
    }

    fn boot_check(&self) -> Option<SessionOutcome> {
        let session_id = Uuid::new_v4().to_string();

        if let Some(record) = self.flag.read_and_remove() {
            info!(
                writer_pid = record.pid,
                reason = %record.reason,
                "boot follows a restart; skipping permission checks"
            );
            let extra = json!({
                "restart_reason": record.reason,
                "restart_permissions": record.permissions,
                "writer_pid": record.pid,
            });
            return Some(self.complete(session_id, CompletionPath::RestartFlag, Vec::new(), extra));
        }

        if self.signals.restarted_env {
            info!("restart marker env present; skipping permission checks");
            return Some(self.complete(
                session_id,
                CompletionPath::RestartEnv,
                Vec::new(),
                json!({}),
            ));
        }

        if self.marker.exists() {
            info!("first-run marker present; skipping permission checks");
            return Some(self.complete(
                session_id,
                CompletionPath::FirstRunMarker,
                Vec::new(),
                json!({}),
            ));
        }

        None
    }

    async fn run_session(&self, session: &mut PermissionRequestSession) -> SessionOutcome {
        self.publish(
            LifecycleEvent::new(LifecycleEventKind::SessionStarted, &session.id)
                .with_payload(json!({ "permissions": session.order })),
        );

        // ── CHECKING ────────────────────────────────────
        for entry in self.table.iter() {
            let Some(status) = self.probe(entry).await else {
                return self.cancelled(session);
            };
            session.record_initial(&entry.id, status);
        }
        self.publish_statuses(session, "initial");

        if session.all_granted() {
            info!("all permissions already granted");
            let statuses = session.statuses();
            return self.complete(
                session.id.clone(),
                CompletionPath::AlreadyGranted,
                statuses,
                json!({}),
            );
        }

        // ── REQUESTING ──────────────────────────────────
        for entry in self.table.iter() {
            if session.status_of(&entry.id) == PermissionStatus::Granted {
                continue;
            }
            if self.acquire(entry, session).await.is_none() {
                return self.cancelled(session);
            }
        }

        let restart_permissions: Vec<PermissionId> = session
            .newly_granted()
            .into_iter()
            .filter(|id| self.table.requires_restart(id))
            .collect();
        session.needs_restart = !restart_permissions.is_empty();
        self.publish_statuses(session, "resolved");

        if session.needs_restart {
            return self.hand_off(session, restart_permissions).await;
        }

        let statuses = session.statuses();
        self.complete(
            session.id.clone(),
            CompletionPath::Resolved,
            statuses,
            json!({}),
        )
    }

    /// Request one permission and wait, without a timeout, for it to resolve.
    ///
    /// Returns `None` if the coordinator was stopped.
    async fn acquire(
        &self,
        entry: &CapabilityDescriptor,
        session: &mut PermissionRequestSession,
    ) -> Option<PermissionStatus> {
        if self.cancel.is_cancelled() {
            return None;
        }

        info!(permission = %entry.id, "requesting permission");
        let activation = tokio::select! {
            () = self.cancel.cancelled() => return None,
            result = entry.capability.activate() => result,
        };
        if let Err(err) = activation {
            warn!(permission = %entry.id, %err, "activation failed; still waiting for grant");
        }

        let mut polls: u32 = 0;
        loop {
            let status = self.probe(entry).await?;
            session.record_current(&entry.id, status);
            if status.is_resolved() {
                info!(permission = %entry.id, %status, "permission resolved");
                return Some(status);
            }

            polls = polls.saturating_add(1);
            if polls % self.settings.status_report_every == 0 {
                self.publish(
                    LifecycleEvent::new(LifecycleEventKind::StatusChecked, &session.id)
                        .with_payload(json!({
                            "phase": "waiting",
                            "permission": entry.id,
                            "status": status,
                            "polls": polls,
                        })),
                );
            }

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    /// Probe one permission. A failed probe counts as `error`.
    ///
    /// Returns `None` if the coordinator was stopped.
    async fn probe(&self, entry: &CapabilityDescriptor) -> Option<PermissionStatus> {
        let result = tokio::select! {
            () = self.cancel.cancelled() => return None,
            result = entry.capability.check_status() => result,
        };
        Some(result.unwrap_or_else(|err| {
            warn!(permission = %entry.id, %err, "status check failed");
            PermissionStatus::Error
        }))
    }

    async fn hand_off(
        &self,
        session: &PermissionRequestSession,
        permissions: Vec<PermissionId>,
    ) -> SessionOutcome {
        info!(permissions = ?permissions, "restart required to apply new grants");
        self.marker.persist();

        let handle = self
            .supervisor
            .dispatch(RestartReason::PermissionsGranted, &permissions);
        self.publish(
            LifecycleEvent::new(LifecycleEventKind::RestartPending, &session.id).with_payload(
                json!({
                    "permissions": permissions,
                    "dispatched": handle.is_some(),
                }),
            ),
        );

        let Some(handle) = handle else {
            return SessionOutcome::RestartPending {
                session_id: session.id.clone(),
                permissions,
                restart: None,
            };
        };

        let reason = match handle.await {
            Ok(RestartOutcome::Exhausted { tried }) => {
                format!("all restart strategies failed: {tried:?}")
            }
            Ok(outcome) => {
                return SessionOutcome::RestartPending {
                    session_id: session.id.clone(),
                    permissions,
                    restart: Some(outcome),
                };
            }
            Err(err) => format!("restart worker failed: {err}"),
        };

        warn!(%reason, "restart did not happen; continuing in current process");
        self.publish(
            LifecycleEvent::new(LifecycleEventKind::SessionFailed, &session.id)
                .with_payload(json!({ "reason": reason, "permissions": permissions })),
        );
        SessionOutcome::RestartFailed {
            session_id: session.id.clone(),
            permissions,
            reason,
        }
    }

    fn complete(
        &self,
        session_id: String,
        path: CompletionPath,
        statuses: Vec<(PermissionId, PermissionStatus)>,
        extra: serde_json::Value,
    ) -> SessionOutcome {
        self.marker.persist();
        self.publish(
            LifecycleEvent::new(LifecycleEventKind::SessionCompleted, &session_id).with_payload(
                json!({
                    "path": path.as_str(),
                    "statuses": statuses_payload(&statuses),
                    "detail": extra,
                }),
            ),
        );
        SessionOutcome::Completed {
            session_id,
            path,
            statuses,
        }
    }

    fn cancelled(&self, session: &PermissionRequestSession) -> SessionOutcome {
        info!("permission session cancelled");
        self.publish(
            LifecycleEvent::new(LifecycleEventKind::SessionFailed, &session.id)
                .with_payload(json!({ "reason": "cancelled" })),
        );
        SessionOutcome::Cancelled {
            session_id: session.id.clone(),
        }
    }

    fn publish_statuses(&self, session: &PermissionRequestSession, phase: &str) {
        self.publish(
            LifecycleEvent::new(LifecycleEventKind::StatusChecked, &session.id).with_payload(
                json!({
                    "phase": phase,
                    "statuses": statuses_payload(&session.statuses()),
                }),
            ),
        );
    }

    fn publish(&self, event: LifecycleEvent) {
        publish_quietly(self.sink.as_ref(), &event);
    }
}

fn statuses_payload(statuses: &[(PermissionId, PermissionStatus)]) -> serde_json::Value {
    serde_json::Value::Array(
        statuses
            .iter()
            .map(|(id, status)| json!({ "permission": id, "status": status }))
            .collect(),
    )
}
