//! Global configuration parsing, validation, and environment overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::models::permission::PermissionId;
use crate::{AppError, Result};

/// Overrides the state directory.
pub const DATA_DIR_ENV: &str = "CONSENT_LIFECYCLE_DATA_DIR";
/// Kill switch: any truthy value turns restarts into no-ops.
pub const NO_RESTART_ENV: &str = "CONSENT_LIFECYCLE_NO_RESTART";
/// Enables the development relaunch strategy.
pub const ALLOW_DEV_RELAUNCH_ENV: &str = "CONSENT_LIFECYCLE_ALLOW_DEV_RELAUNCH";
/// Set on a relaunched process to signal that it follows a restart.
pub const RESTARTED_ENV: &str = "CONSENT_LIFECYCLE_RESTARTED";

const FLAG_FILE: &str = "restart_flag.json";
const LOCK_FILE: &str = "restart.lock";
const MARKER_FILE: &str = ".first_run_complete";
const LOG_DIR: &str = "logs";

/// Restart supervisor settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RestartConfig {
    /// When set, `trigger_restart` does nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Whether the development relaunch strategy may run.
    #[serde(default)]
    pub allow_dev_relaunch: bool,
    /// Packaged application bundle to relaunch.
    #[serde(default)]
    pub bundle_path: Option<PathBuf>,
    /// Executable inside the bundle; derived from `bundle_path` when absent.
    #[serde(default)]
    pub bundle_executable: Option<PathBuf>,
    /// Whether the running binary is the packaged build; auto-detected when absent.
    #[serde(default)]
    pub packaged: Option<bool>,
    /// How long to wait for a relaunched process to appear.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    /// Poll interval while verifying a relaunch.
    #[serde(default = "default_verify_poll_ms")]
    pub verify_poll_ms: u64,
    /// Age after which a live lock holder is reported as long-running.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Maximum age of a crash-safe flag record.
    #[serde(default = "default_flag_max_age_secs")]
    pub flag_max_age_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_dev_relaunch: false,
            bundle_path: None,
            bundle_executable: None,
            packaged: None,
            verify_timeout_ms: default_verify_timeout_ms(),
            verify_poll_ms: default_verify_poll_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
            flag_max_age_secs: default_flag_max_age_secs(),
        }
    }
}

impl RestartConfig {
    /// Verification window for the bundle relaunch.
    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Poll interval inside the verification window.
    #[must_use]
    pub fn verify_poll(&self) -> Duration {
        Duration::from_millis(self.verify_poll_ms)
    }

    /// Age past which a live lock holder is logged as long-running.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Flag validity window.
    #[must_use]
    pub fn flag_max_age(&self) -> Duration {
        Duration::from_secs(self.flag_max_age_secs)
    }

    /// Executable that a relaunched bundle runs.
    ///
    /// A `.app` bundle resolves to `Contents/MacOS/<bundle stem>`; any
    /// other path is taken to be the executable itself.
    #[must_use]
    pub fn resolved_bundle_executable(&self) -> Option<PathBuf> {
        if let Some(ref exe) = self.bundle_executable {
            return Some(exe.clone());
        }
        let bundle = self.bundle_path.as_ref()?;
        if bundle.extension().is_some_and(|ext| ext == "app") {
            let stem = bundle.file_stem()?;
            Some(bundle.join("Contents").join("MacOS").join(stem))
        } else {
            Some(bundle.clone())
        }
    }

    /// Whether `current_exe` is the packaged build.
    #[must_use]
    pub fn is_packaged(&self, current_exe: &Path) -> bool {
        if let Some(packaged) = self.packaged {
            return packaged;
        }
        self.bundle_path
            .as_ref()
            .is_some_and(|bundle| current_exe.starts_with(bundle))
    }
}

fn default_verify_timeout_ms() -> u64 {
    10_000
}

fn default_verify_poll_ms() -> u64 {
    250
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_flag_max_age_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_status_report_every() -> u32 {
    10
}

fn default_app_name() -> String {
    "consent-lifecycle".into()
}

/// One required permission and the external commands backing it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionConfig {
    /// Permission identifier.
    pub id: PermissionId,
    /// Whether a grant only takes effect in a freshly launched process.
    #[serde(default)]
    pub requires_restart: bool,
    /// Probe command; prints `granted`, `denied`, or `not_determined`.
    #[serde(default)]
    pub check: Vec<String>,
    /// Command that triggers the OS consent flow.
    #[serde(default)]
    pub activate: Vec<String>,
    /// Command that opens the matching OS settings pane.
    #[serde(default)]
    pub open_settings: Vec<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Application name; names the default data directory.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// State directory override.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Interval between permission status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Emit a status notification every N polls while waiting.
    #[serde(default = "default_status_report_every")]
    pub status_report_every: u32,
    /// Restart supervisor settings.
    #[serde(default)]
    pub restart: RestartConfig,
    /// Required permissions in request order.
    pub permissions: Vec<PermissionConfig>,
}

impl GlobalConfig {
    /// Load, apply environment overrides, and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// Environment overrides are not applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONSENT_LIFECYCLE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            let dir = dir.trim();
            if !dir.is_empty() {
                info!(data_dir = dir, "data dir overridden from environment");
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if env_flag(NO_RESTART_ENV) {
            warn!("restart kill switch active; restarts will be skipped");
            self.restart.dry_run = true;
        }
        if env_flag(ALLOW_DEV_RELAUNCH_ENV) {
            self.restart.allow_dev_relaunch = true;
        }
    }

    /// Interval between permission status polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolve the on-disk layout of the shared state files.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no data directory is configured and
    /// the platform has no per-user data directory.
    pub fn state_paths(&self) -> Result<StatePaths> {
        let root = match self.data_dir {
            Some(ref dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|dir| dir.join(&self.app_name))
                .ok_or_else(|| {
                    AppError::Config("no per-user data directory available".into())
                })?,
        };
        Ok(StatePaths::new(root))
    }

    fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(AppError::Config("app_name must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.status_report_every == 0 {
            return Err(AppError::Config(
                "status_report_every must be greater than zero".into(),
            ));
        }
        if self.restart.verify_timeout_ms == 0 || self.restart.verify_poll_ms == 0 {
            return Err(AppError::Config(
                "restart verification timings must be greater than zero".into(),
            ));
        }
        if self.restart.flag_max_age_secs == 0 {
            return Err(AppError::Config(
                "flag_max_age_secs must be greater than zero".into(),
            ));
        }
        if self.permissions.is_empty() {
            return Err(AppError::Config("permissions must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for permission in &self.permissions {
            if !seen.insert(permission.id.clone()) {
                return Err(AppError::Config(format!(
                    "duplicate permission id '{}'",
                    permission.id
                )));
            }
            if permission.check.is_empty() {
                return Err(AppError::Config(format!(
                    "permission '{}' has no check command",
                    permission.id
                )));
            }
        }

        Ok(())
    }
}

/// Locations of the three cross-process state files and the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    /// State directory.
    pub root: PathBuf,
    /// Crash-safe flag file.
    pub flag: PathBuf,
    /// Restart advisory lock file.
    pub lock: PathBuf,
    /// First-run marker sentinel.
    pub marker: PathBuf,
    /// Directory for JSONL lifecycle logs.
    pub logs: PathBuf,
}

impl StatePaths {
    /// Derive all paths from the state directory.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            flag: root.join(FLAG_FILE),
            lock: root.join(LOCK_FILE),
            marker: root.join(MARKER_FILE),
            logs: root.join(LOG_DIR),
            root,
        }
    }
}

/// Whether an environment variable holds a truthy value.
#[must_use]
pub fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key),
        Ok(value)
            if value.eq_ignore_ascii_case("1")
                || value.eq_ignore_ascii_case("true")
                || value.eq_ignore_ascii_case("yes")
                || value.eq_ignore_ascii_case("on")
    )
}
