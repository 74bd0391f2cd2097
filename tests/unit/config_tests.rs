use std::path::PathBuf;
use std::time::Duration;

use consent_lifecycle::config::{
    env_flag, GlobalConfig, StatePaths, ALLOW_DEV_RELAUNCH_ENV, DATA_DIR_ENV, NO_RESTART_ENV,
};
use consent_lifecycle::AppError;
use serial_test::serial;

fn sample_toml(data_dir: &str) -> String {
    format!(
        r#"
app_name = "assistant"
data_dir = '{data_dir}'
poll_interval_ms = 250
status_report_every = 4

[restart]
dry_run = false
allow_dev_relaunch = true
bundle_path = "/Applications/Assistant.app"
verify_timeout_ms = 5000
verify_poll_ms = 100
lock_ttl_secs = 15
flag_max_age_secs = 90

[[permissions]]
id = "microphone"
check = ["probe", "microphone"]
activate = ["request", "microphone"]
open_settings = ["open", "x-apple.systempreferences:microphone"]

[[permissions]]
id = "screen_capture"
requires_restart = true
check = ["probe", "screen_capture"]
"#
    )
}

fn minimal_toml() -> &'static str {
    r#"
[[permissions]]
id = "microphone"
check = ["probe"]
"#
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(&sample_toml("/tmp/assistant")).expect("valid");

    assert_eq!(config.app_name, "assistant");
    assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/assistant")));
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.status_report_every, 4);
    assert!(config.restart.allow_dev_relaunch);
    assert_eq!(config.restart.verify_timeout(), Duration::from_secs(5));
    assert_eq!(config.restart.verify_poll(), Duration::from_millis(100));
    assert_eq!(config.restart.lock_ttl(), Duration::from_secs(15));
    assert_eq!(config.restart.flag_max_age(), Duration::from_secs(90));

    assert_eq!(config.permissions.len(), 2);
    assert_eq!(config.permissions[0].id.as_str(), "microphone");
    assert!(!config.permissions[0].requires_restart);
    assert_eq!(config.permissions[1].id.as_str(), "screen_capture");
    assert!(config.permissions[1].requires_restart);
    assert!(config.permissions[1].activate.is_empty());
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(minimal_toml()).expect("valid");

    assert_eq!(config.app_name, "consent-lifecycle");
    assert!(config.data_dir.is_none());
    assert_eq!(config.poll_interval_ms, 500);
    assert_eq!(config.status_report_every, 10);
    assert!(!config.restart.dry_run);
    assert!(!config.restart.allow_dev_relaunch);
    assert_eq!(config.restart.verify_timeout_ms, 10_000);
    assert_eq!(config.restart.verify_poll_ms, 250);
    assert_eq!(config.restart.lock_ttl_secs, 30);
    assert_eq!(config.restart.flag_max_age_secs, 60);
}

// ── validation ──────────────────────────────────────────

#[test]
fn rejects_empty_permission_list() {
    let result = GlobalConfig::from_toml_str("permissions = []");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("permissions")));
}

#[test]
fn rejects_duplicate_permission_ids() {
    let raw = r#"
[[permissions]]
id = "camera"
check = ["probe"]

[[permissions]]
id = "camera"
check = ["probe"]
"#;
    let result = GlobalConfig::from_toml_str(raw);
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("duplicate")));
}

#[test]
fn rejects_missing_check_command() {
    let raw = r#"
[[permissions]]
id = "camera"
"#;
    let result = GlobalConfig::from_toml_str(raw);
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("check")));
}

#[test]
fn rejects_invalid_permission_id() {
    let raw = r#"
[[permissions]]
id = "Screen Capture"
check = ["probe"]
"#;
    assert!(matches!(
        GlobalConfig::from_toml_str(raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_zero_poll_interval() {
    let raw = format!("poll_interval_ms = 0\n{}", minimal_toml());
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(msg)) if msg.contains("poll_interval_ms")
    ));
}

#[test]
fn rejects_zero_flag_age() {
    let raw = format!("{}\n[restart]\nflag_max_age_secs = 0\n", minimal_toml());
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(msg)) if msg.contains("flag_max_age_secs")
    ));
}

#[test]
fn rejects_malformed_toml() {
    let result = GlobalConfig::from_toml_str("permissions = [[");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.starts_with("invalid config")));
}

// ── bundle resolution ───────────────────────────────────

#[test]
fn app_bundle_resolves_inner_executable() {
    let raw = format!(
        "{}\n[restart]\nbundle_path = \"/Applications/Assistant.app\"\n",
        minimal_toml()
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid");
    assert_eq!(
        config.restart.resolved_bundle_executable(),
        Some(PathBuf::from(
            "/Applications/Assistant.app/Contents/MacOS/Assistant"
        ))
    );
}

#[test]
fn explicit_bundle_executable_wins() {
    let raw = format!(
        "{}\n[restart]\nbundle_path = \"/opt/assistant\"\nbundle_executable = \"/opt/assistant/bin/run\"\n",
        minimal_toml()
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid");
    assert_eq!(
        config.restart.resolved_bundle_executable(),
        Some(PathBuf::from("/opt/assistant/bin/run"))
    );
}

#[test]
fn packaged_detection_follows_bundle_prefix() {
    let raw = format!(
        "{}\n[restart]\nbundle_path = \"/Applications/Assistant.app\"\n",
        minimal_toml()
    );
    let mut config = GlobalConfig::from_toml_str(&raw).expect("valid");

    let inside = PathBuf::from("/Applications/Assistant.app/Contents/MacOS/Assistant");
    let outside = PathBuf::from("/home/dev/target/debug/assistant");
    assert!(config.restart.is_packaged(&inside));
    assert!(!config.restart.is_packaged(&outside));

    config.restart.packaged = Some(true);
    assert!(config.restart.is_packaged(&outside));
}

#[test]
fn state_paths_live_under_data_dir() {
    let paths = StatePaths::new(PathBuf::from("/var/lib/assistant"));
    assert_eq!(paths.flag, PathBuf::from("/var/lib/assistant/restart_flag.json"));
    assert_eq!(paths.lock, PathBuf::from("/var/lib/assistant/restart.lock"));
    assert_eq!(
        paths.marker,
        PathBuf::from("/var/lib/assistant/.first_run_complete")
    );
    assert_eq!(paths.logs, PathBuf::from("/var/lib/assistant/logs"));
}

#[test]
fn configured_data_dir_is_used_for_state_paths() {
    let config = GlobalConfig::from_toml_str(&sample_toml("/tmp/assistant")).expect("valid");
    let paths = config.state_paths().expect("paths");
    assert_eq!(paths.root, PathBuf::from("/tmp/assistant"));
}

// ── environment overrides ───────────────────────────────

#[test]
#[serial]
fn load_from_path_applies_env_overrides() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, minimal_toml()).expect("write config");
    let override_dir = temp.path().join("state");

    std::env::set_var(DATA_DIR_ENV, &override_dir);
    std::env::set_var(NO_RESTART_ENV, "1");
    std::env::set_var(ALLOW_DEV_RELAUNCH_ENV, "true");

    let result = GlobalConfig::load_from_path(&config_path);

    std::env::remove_var(DATA_DIR_ENV);
    std::env::remove_var(NO_RESTART_ENV);
    std::env::remove_var(ALLOW_DEV_RELAUNCH_ENV);

    let config = result.expect("valid");
    assert_eq!(config.data_dir, Some(override_dir));
    assert!(config.restart.dry_run);
    assert!(config.restart.allow_dev_relaunch);
}

#[test]
#[serial]
fn load_from_path_reports_missing_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("failed to read")));
}

#[test]
#[serial]
fn env_flag_accepts_truthy_values_only() {
    let key = "CONSENT_LIFECYCLE_TEST_FLAG";
    for value in ["1", "true", "TRUE", "yes", "on"] {
        std::env::set_var(key, value);
        assert!(env_flag(key), "{value} should be truthy");
    }
    for value in ["0", "false", "", "nope"] {
        std::env::set_var(key, value);
        assert!(!env_flag(key), "{value} should be falsy");
    }
    std::env::remove_var(key);
    assert!(!env_flag(key));
}
