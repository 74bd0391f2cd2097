//! Unit tests for relaunch command construction.

use std::ffi::OsString;
use std::path::Path;

use consent_lifecycle::config::RESTARTED_ENV;
use consent_lifecycle::restart::{boot_args, ProcessHost, RelaunchCommand, SystemHost};

fn strings(args: &[OsString]) -> Vec<&str> {
    args.iter().map(|a| a.to_str().expect("utf-8")).collect()
}

#[test]
fn boot_args_start_a_normal_run() {
    let args = boot_args(Path::new("/etc/assistant.toml"), None);
    assert_eq!(strings(&args), ["--config", "/etc/assistant.toml", "run"]);
}

#[test]
fn boot_args_carry_log_format() {
    let args = boot_args(Path::new("cfg.toml"), Some("json"));
    assert_eq!(
        strings(&args),
        ["--config", "cfg.toml", "--log-format", "json", "run"]
    );
}

#[test]
fn system_host_relaunches_with_configured_args() {
    let args = boot_args(Path::new("cfg.toml"), None);
    let host = SystemHost::default().with_relaunch_args(args.clone());
    assert_eq!(host.current_args(), args);
    assert!(!host.current_args().contains(&OsString::from("restart")));
}

#[test]
fn system_host_defaults_to_own_arguments() {
    let own: Vec<OsString> = std::env::args_os().skip(1).collect();
    assert_eq!(SystemHost::default().current_args(), own);
}

#[test]
fn relaunch_command_sets_restart_marker() {
    let cmd = RelaunchCommand::with_restart_marker(
        "/usr/local/bin/assistant".into(),
        boot_args(Path::new("cfg.toml"), None),
    );
    assert_eq!(
        cmd.env,
        vec![(OsString::from(RESTARTED_ENV), OsString::from("1"))]
    );
}
