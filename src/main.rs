#![forbid(unsafe_code)]

//! `consent-lifecycle` binary.
//!
//! Runs the permission acquisition cycle for one boot, and offers
//! diagnostics and maintenance commands for the shared state files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use consent_lifecycle::config::{GlobalConfig, StatePaths};
use consent_lifecycle::events::{FanoutSink, JsonlEventLog, NotificationSink, TracingSink};
use consent_lifecycle::models::flag::{unix_now, RestartReason};
use consent_lifecycle::models::permission::PermissionId;
use consent_lifecycle::models::restart::RestartOutcome;
use consent_lifecycle::permissions::{
    BootSignals, CapabilityTable, CoordinatorSettings, PermissionCoordinator, SessionOutcome,
};
use consent_lifecycle::persistence::{CrashSafeFlag, FirstRunMarker, RestartLock};
use consent_lifecycle::restart::{boot_args, RestartSupervisor, SystemHost, SystemLauncher};
use consent_lifecycle::{AppError, Result};

/// Exit code reported when the session was interrupted by a signal.
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// How a replacement process is started.
struct Relaunch<'a> {
    config_path: &'a Path,
    log_format: LogFormat,
}

#[derive(Debug, Parser)]
#[command(
    name = "consent-lifecycle",
    about = "Permission acquisition and restart orchestration",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the acquisition cycle for this boot.
    Run,
    /// Show flag, marker, lock, and permission status.
    Status,
    /// Remove the restart flag and first-run marker.
    Reset,
    /// Open the OS settings pane for one permission.
    Settings {
        /// Permission identifier from the config file.
        permission: PermissionId,
    },
    /// Restart the application now.
    Restart,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(args)) {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(args: Cli) -> Result<ExitCode> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    let paths = config.state_paths()?;
    info!(data_dir = %paths.root.display(), "configuration loaded");
    let relaunch = Relaunch {
        config_path: &args.config,
        log_format: args.log_format,
    };

    match args.command {
        Command::Run => run(&config, &paths, &relaunch).await,
        Command::Status => status(&config, &paths).await,
        Command::Reset => Ok(reset(&config, &paths)),
        Command::Settings { permission } => settings(&config, &permission).await,
        Command::Restart => restart(&config, &paths, &relaunch).await,
    }
}

async fn run(
    config: &GlobalConfig,
    paths: &StatePaths,
    relaunch: &Relaunch<'_>,
) -> Result<ExitCode> {
    let table = CapabilityTable::from_config(config)?;
    let supervisor = Arc::new(build_supervisor(config, paths, relaunch));
    let ct = CancellationToken::new();

    let coordinator = PermissionCoordinator::new(
        table,
        CoordinatorSettings::from(config),
        FirstRunMarker::new(paths.marker.clone()),
        supervisor,
        build_sink(paths),
        ct.clone(),
    )
    .with_boot_signals(BootSignals::from_env());

    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let outcome = coordinator.run().await;
    signal_handle.abort();

    let code = match outcome {
        SessionOutcome::Completed { path, .. } => {
            info!(path = path.as_str(), "permission cycle complete");
            ExitCode::SUCCESS
        }
        SessionOutcome::RestartPending { restart, .. } => {
            info!(?restart, "restart pending");
            ExitCode::SUCCESS
        }
        SessionOutcome::RestartFailed { reason, .. } => {
            error!(%reason, "restart failed");
            ExitCode::FAILURE
        }
        SessionOutcome::Cancelled { .. } => ExitCode::from(EXIT_CANCELLED),
    };
    Ok(code)
}

async fn status(config: &GlobalConfig, paths: &StatePaths) -> Result<ExitCode> {
    let flag = CrashSafeFlag::new(paths.flag.clone(), config.restart.flag_max_age());
    match flag.peek() {
        Some(record) => println!(
            "restart flag: reason={} pid={} age={:.1}s permissions={:?}",
            record.reason,
            record.pid,
            record.age_secs(unix_now()),
            record.permissions.iter().map(PermissionId::as_str).collect::<Vec<_>>()
        ),
        None if flag.exists() => println!("restart flag: present but invalid"),
        None => println!("restart flag: none"),
    }

    let marker = FirstRunMarker::new(paths.marker.clone());
    println!("first-run marker: {}", if marker.exists() { "present" } else { "absent" });

    match RestartLock::inspect(&paths.lock) {
        Some(holder) => println!(
            "restart lock: pid={} age={:.1}s alive={}",
            holder.pid,
            holder.age_secs(unix_now()),
            holder.is_alive()
        ),
        None => println!("restart lock: free"),
    }

    let table = CapabilityTable::from_config(config)?;
    for entry in table.iter() {
        let status = match entry.capability.check_status().await {
            Ok(status) => status.to_string(),
            Err(err) => format!("error ({err})"),
        };
        let restart = if entry.requires_restart { " [restart]" } else { "" };
        println!("{}{restart}: {status}", entry.id);
    }
    Ok(ExitCode::SUCCESS)
}

fn reset(config: &GlobalConfig, paths: &StatePaths) -> ExitCode {
    let flag = CrashSafeFlag::new(paths.flag.clone(), config.restart.flag_max_age());
    let marker = FirstRunMarker::new(paths.marker.clone());
    let removed_flag = flag.remove();
    let removed_marker = marker.clear();
    info!(removed_flag, removed_marker, "state reset");
    println!("restart flag removed: {removed_flag}");
    println!("first-run marker removed: {removed_marker}");
    ExitCode::SUCCESS
}

async fn settings(config: &GlobalConfig, permission: &PermissionId) -> Result<ExitCode> {
    let table = CapabilityTable::from_config(config)?;
    let entry = table.get(permission).ok_or_else(|| {
        AppError::Config(format!("permission '{permission}' is not configured"))
    })?;
    entry.capability.open_settings().await?;
    Ok(ExitCode::SUCCESS)
}

async fn restart(
    config: &GlobalConfig,
    paths: &StatePaths,
    relaunch: &Relaunch<'_>,
) -> Result<ExitCode> {
    if BootSignals::from_env().restarted_env {
        warn!("process was started by a restart; not restarting again");
        println!("already restarted; run `run` instead");
        return Ok(ExitCode::SUCCESS);
    }
    let supervisor = build_supervisor(config, paths, relaunch);
    let Some(handle) = supervisor.dispatch(RestartReason::Manual, &[]) else {
        println!("restart not started (disabled or already in flight)");
        return Ok(ExitCode::FAILURE);
    };
    let outcome = handle
        .await
        .map_err(|err| AppError::Restart(format!("restart worker failed: {err}")))?;
    match outcome {
        RestartOutcome::Succeeded { strategy, .. } => {
            println!("restarted via {strategy}");
            Ok(ExitCode::SUCCESS)
        }
        RestartOutcome::Contended => {
            println!("another process is already restarting");
            Ok(ExitCode::SUCCESS)
        }
        RestartOutcome::Exhausted { tried } => {
            println!("restart failed; tried {tried:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_supervisor(
    config: &GlobalConfig,
    paths: &StatePaths,
    relaunch: &Relaunch<'_>,
) -> RestartSupervisor {
    let args = boot_args(relaunch.config_path, Some(relaunch.log_format.as_arg()));
    RestartSupervisor::new(
        config.restart.clone(),
        paths,
        Arc::new(SystemLauncher),
        Arc::new(SystemHost::default().with_relaunch_args(args)),
    )
}

fn build_sink(paths: &StatePaths) -> Arc<dyn NotificationSink> {
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    match JsonlEventLog::new(paths.logs.clone()) {
        Ok(log) => sink = sink.with(Arc::new(log)),
        Err(err) => warn!(%err, "lifecycle event log disabled"),
    }
    Arc::new(sink)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
