//! Shared test doubles for coordinator and supervisor integration tests.
//!
//! Provides scripted permission capabilities, a process host that records
//! instead of exiting or exec'ing, a launcher with a configurable verify
//! result, and a sink that keeps every published event.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use consent_lifecycle::config::{RestartConfig, StatePaths};
use consent_lifecycle::events::{LifecycleEvent, LifecycleEventKind, NotificationSink};
use consent_lifecycle::models::permission::{PermissionId, PermissionStatus};
use consent_lifecycle::permissions::{
    CapabilityFuture, CapabilityTable, CoordinatorSettings, PermissionCapability,
    PermissionCoordinator,
};
use consent_lifecycle::persistence::FirstRunMarker;
use consent_lifecycle::restart::{ProcessHost, ProcessLauncher, RelaunchCommand, RestartSupervisor};
use consent_lifecycle::{AppError, Result};
use tokio_util::sync::CancellationToken;

pub fn pid(raw: &str) -> PermissionId {
    PermissionId::new(raw).expect("valid permission id")
}

// ── permissions ─────────────────────────────────────────

/// Capability whose status changes only after `activate` is called.
///
/// Before activation every probe returns `initial`. After activation the
/// scripted statuses are returned in order; the last one repeats.
pub struct ScriptedCapability {
    id: PermissionId,
    initial: PermissionStatus,
    after_activation: Mutex<VecDeque<PermissionStatus>>,
    activated: Mutex<bool>,
    activation_log: Arc<Mutex<Vec<PermissionId>>>,
    pub checks: AtomicUsize,
    pub activations: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(id: &str, initial: PermissionStatus) -> Self {
        Self {
            id: pid(id),
            initial,
            after_activation: Mutex::new(VecDeque::from([initial])),
            activated: Mutex::new(false),
            activation_log: Arc::new(Mutex::new(Vec::new())),
            checks: AtomicUsize::new(0),
            activations: AtomicUsize::new(0),
        }
    }

    /// Statuses reported after activation, in order.
    pub fn then(self, statuses: &[PermissionStatus]) -> Self {
        *self.after_activation.lock().expect("lock") = statuses.iter().copied().collect();
        self
    }

    /// Record activations into a log shared with other capabilities.
    pub fn logging_to(mut self, log: &Arc<Mutex<Vec<PermissionId>>>) -> Self {
        self.activation_log = Arc::clone(log);
        self
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn activation_count(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

impl PermissionCapability for ScriptedCapability {
    fn check_status(&self) -> CapabilityFuture<'_, PermissionStatus> {
        Box::pin(async move {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if !*self.activated.lock().expect("lock") {
                return Ok(self.initial);
            }
            let mut queue = self.after_activation.lock().expect("lock");
            let status = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().copied()
            };
            Ok(status.unwrap_or(self.initial))
        })
    }

    fn activate(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async move {
            self.activations.fetch_add(1, Ordering::SeqCst);
            *self.activated.lock().expect("lock") = true;
            self.activation_log
                .lock()
                .expect("lock")
                .push(self.id.clone());
            Ok(())
        })
    }

    fn open_settings(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Capability whose probe always fails.
pub struct FailingCapability;

impl PermissionCapability for FailingCapability {
    fn check_status(&self) -> CapabilityFuture<'_, PermissionStatus> {
        Box::pin(async { Err(AppError::Permission("probe crashed".into())) })
    }

    fn activate(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async { Err(AppError::Permission("activation crashed".into())) })
    }

    fn open_settings(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Build a table from `(capability, requires_restart)` pairs.
pub fn table(entries: &[(Arc<ScriptedCapability>, bool)]) -> CapabilityTable {
    entries
        .iter()
        .try_fold(CapabilityTable::new(), |table, (cap, restart)| {
            let capability: Arc<dyn PermissionCapability> = cap.clone();
            table.register(cap.id.clone(), *restart, capability)
        })
        .expect("unique ids")
}

// ── process control ─────────────────────────────────────

/// Host that records requests instead of touching the real process.
pub struct RecordingHost {
    exe: PathBuf,
    args: Vec<OsString>,
    pub fail_replace: bool,
    pub fail_spawn: bool,
    pub exit_codes: Mutex<Vec<i32>>,
    pub replaced: Mutex<Vec<RelaunchCommand>>,
    pub spawned: Mutex<Vec<RelaunchCommand>>,
}

impl RecordingHost {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            args: vec![OsString::from("run")],
            fail_replace: false,
            fail_spawn: false,
            exit_codes: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Arguments handed to every relaunch.
    pub fn with_args(mut self, args: Vec<OsString>) -> Self {
        self.args = args;
        self
    }

    pub fn exits(&self) -> Vec<i32> {
        self.exit_codes.lock().expect("lock").clone()
    }

    pub fn spawns(&self) -> Vec<RelaunchCommand> {
        self.spawned.lock().expect("lock").clone()
    }

    pub fn replacements(&self) -> Vec<RelaunchCommand> {
        self.replaced.lock().expect("lock").clone()
    }
}

impl ProcessHost for RecordingHost {
    fn current_executable(&self) -> Result<PathBuf> {
        Ok(self.exe.clone())
    }

    fn current_args(&self) -> Vec<OsString> {
        self.args.clone()
    }

    fn replace_image(&self, command: &RelaunchCommand) -> Result<()> {
        if self.fail_replace {
            return Err(AppError::Restart("exec refused".into()));
        }
        self.replaced.lock().expect("lock").push(command.clone());
        Ok(())
    }

    fn spawn_detached(&self, command: &RelaunchCommand) -> Result<u32> {
        if self.fail_spawn {
            return Err(AppError::Restart("spawn refused".into()));
        }
        self.spawned.lock().expect("lock").push(command.clone());
        Ok(31_337)
    }

    fn exit(&self, code: i32) {
        self.exit_codes.lock().expect("lock").push(code);
    }
}

/// Launcher with scripted launch and verification results.
pub struct ScriptedLauncher {
    pub launch_fails: bool,
    pub instance: Option<u32>,
    pub launches: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl ScriptedLauncher {
    /// Launch succeeds and a new process is observed.
    pub fn verified(pid: u32) -> Self {
        Self {
            launch_fails: false,
            instance: Some(pid),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Launch succeeds but no new process ever appears.
    pub fn unverified() -> Self {
        Self {
            launch_fails: false,
            instance: None,
            launches: Mutex::new(Vec::new()),
        }
    }

    /// The OS refuses the launch.
    pub fn refusing() -> Self {
        Self {
            launch_fails: true,
            instance: None,
            launches: Mutex::new(Vec::new()),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().expect("lock").len()
    }

    /// `(bundle, executable)` pairs passed to each launch.
    pub fn launched(&self) -> Vec<(PathBuf, PathBuf)> {
        self.launches.lock().expect("lock").clone()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, bundle: &Path, executable: &Path) -> Result<()> {
        self.launches
            .lock()
            .expect("lock")
            .push((bundle.to_path_buf(), executable.to_path_buf()));
        if self.launch_fails {
            return Err(AppError::Launch("launch refused".into()));
        }
        Ok(())
    }

    fn find_instance(&self, _executable: &Path, _exclude_pid: u32) -> Option<u32> {
        self.instance
    }
}

// ── notifications ───────────────────────────────────────

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: LifecycleEventKind) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        self.events.lock().expect("lock").push(event.clone());
        Ok(())
    }
}

/// Sink that rejects every event.
pub struct RejectingSink;

impl NotificationSink for RejectingSink {
    fn publish(&self, _event: &LifecycleEvent) -> Result<()> {
        Err(AppError::Notify("sink offline".into()))
    }
}

// ── configuration ───────────────────────────────────────

/// Restart settings with fast verification and no strategy enabled.
pub fn restart_config() -> RestartConfig {
    RestartConfig {
        verify_timeout_ms: 50,
        verify_poll_ms: 5,
        packaged: Some(false),
        ..RestartConfig::default()
    }
}

/// Restart settings that enable only the bundle relaunch.
pub fn bundle_config(root: &Path) -> RestartConfig {
    RestartConfig {
        bundle_path: Some(root.join("Assistant.app")),
        ..restart_config()
    }
}

/// Fast polling settings for coordinator tests.
pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        poll_interval: Duration::from_millis(2),
        status_report_every: 2,
    }
}

pub fn supervisor(
    config: RestartConfig,
    paths: &StatePaths,
    launcher: &Arc<ScriptedLauncher>,
    host: &Arc<RecordingHost>,
) -> Arc<RestartSupervisor> {
    let launcher: Arc<dyn ProcessLauncher> = launcher.clone();
    let host: Arc<dyn ProcessHost> = host.clone();
    Arc::new(RestartSupervisor::new(config, paths, launcher, host))
}

pub fn coordinator(
    table: CapabilityTable,
    paths: &StatePaths,
    supervisor: Arc<RestartSupervisor>,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) -> PermissionCoordinator {
    PermissionCoordinator::new(
        table,
        fast_settings(),
        FirstRunMarker::new(paths.marker.clone()),
        supervisor,
        sink,
        cancel,
    )
}
