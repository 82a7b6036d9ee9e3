// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! txprocd — the txProc server daemon.
//!
//! Startup order matters: options, configuration, daemonisation (before
//! any runtime thread exists), pid-file lock, log rotation, logging,
//! then the nucleus loop. Recovery-only mode (`--main.recover`) replays
//! a ledger into the freshly built queues, drains, and exits.

use fs2::FileExt;
use std::io::Write;
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use txp_config::Config;
use txp_core::{Command, Event, SystemClock};
use txp_daemon::gateway::{self, GatewayEndpoint};
use txp_daemon::{Nucleus, Options};

fn main() -> ExitCode {
    let opts = match Options::parse(std::env::args().skip(1)) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("{}", Options::usage());
            return ExitCode::from(2);
        }
    };

    if opts.help {
        println!("txprocd {}", env!("CARGO_PKG_VERSION"));
        println!("{}", Options::usage());
        return ExitCode::SUCCESS;
    }
    if opts.version {
        println!("txprocd {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let mut config = match Config::load(opts.config_file.as_deref(), &opts.overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    if opts.rotate {
        config.recovery.rotate_on_start = true;
    }
    if opts.flushlogs {
        config.main.flush_logs = true;
    }

    if opts.display_options {
        println!("{}", config.display());
        return ExitCode::SUCCESS;
    }

    // Detach before any runtime thread exists.
    if opts.daemonise {
        if let Err(e) = nix::unistd::daemon(false, false) {
            eprintln!("error: failed to daemonise: {}", e);
            return ExitCode::FAILURE;
        }
    }

    // One daemon per pid file.
    let _pid_lock = match acquire_pid_file(&config) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    rotate_log_if_needed(&config.main_log_path());
    let _log_guard = match setup_logging(&config, &opts) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to set up logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("starting txprocd {}", env!("CARGO_PKG_VERSION"));

    if config.recovery.rotate_on_start {
        let state = config.main.log_dir.join("logrotate.status");
        match txp_recovery::rotate_logs(
            &config.recovery.rotate_helper,
            &state,
            &config.recovery.rotate_config,
        )
        .await
        {
            Ok(()) => info!("startup log rotation complete"),
            Err(e) => error!("startup log rotation failed: {}", e),
        }
    }

    if config.main.nonucleus {
        info!("--main.nonucleus set and no gateway configured here, nothing to run");
        return Ok(());
    }

    let recover_file = config.main.recover.clone();
    let (gateway, endpoint) = gateway::endpoint_pair(gateway::ENDPOINT_DEPTH);
    let nucleus = Nucleus::new(config, SystemClock, endpoint)?;
    info!(queues = nucleus.queue_names().len(), "nucleus ready");
    let nucleus_task = tokio::spawn(nucleus.run());

    let GatewayEndpoint { tx, mut rx } = gateway;

    // With the socket listeners out of process, results arriving at the
    // gateway have nowhere to go; log and drop them.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(event = %event, "result at gateway with no listener");
        }
    });

    if let Some(file) = recover_file {
        // Recovery-only mode: replay, drain, exit.
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let submit_tx = tx.clone();
        let summary = txp_recovery::replay(&file, now, move |event| {
            let submit_tx = submit_tx.clone();
            async move { submit_tx.send(event).await.is_ok() }
        })
        .await?;
        info!(
            resubmitted = summary.resubmitted,
            failed = summary.failed,
            ignored = summary.ignored,
            "recovery replay submitted, draining"
        );
        let _ = tx.send(Event::command(Command::ExitWhenDone)).await;
        nucleus_task.await??;
        return Ok(());
    }

    // Translate signals into command events; the loop never touches a
    // signal handler directly.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
            // a second signal during drain escalates inside the nucleus
            if signal_tx.send(Event::command(Command::Shutdown)).await.is_err() {
                break;
            }
        }
    });

    nucleus_task.await??;
    info!("txprocd stopped");
    Ok(())
}

/// Pid-file lock: exclusive flock plus our pid for operators.
fn acquire_pid_file(config: &Config) -> Result<std::fs::File, String> {
    let path = &config.main.pid_file;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("error: cannot create {}: {}", parent.display(), e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| format!("error: cannot open pid file {}: {}", path.display(), e))?;
    if file.try_lock_exclusive().is_err() {
        let pid = std::fs::read_to_string(path).unwrap_or_default().trim().to_string();
        let mut msg = "txprocd is already running".to_string();
        if !pid.is_empty() {
            msg.push_str(&format!("\n  pid: {}", pid));
        }
        return Err(msg);
    }
    file.set_len(0).map_err(|e| format!("error: cannot truncate pid file: {}", e))?;
    writeln!(file, "{}", std::process::id())
        .map_err(|e| format!("error: cannot write pid file: {}", e))?;
    Ok(file)
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Shift `<base>.log` → `.1` → `.2` → `.3` when the current file is too
/// large. Best-effort: a failed rotation must not stop startup.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
    opts: &Options,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.nucleus.log_level.clone()));

    if opts.logstderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all(&config.main.log_dir)?;
    let log_path = config.main_log_path();
    let file_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "txprocd.log".to_string());
    let file_appender = tracing_appender::rolling::never(&config.main.log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console = if opts.nologconsole || opts.daemonise {
        None
    } else {
        Some(fmt::layer().with_writer(std::io::stdout))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(console)
        .init();

    Ok(Some(guard))
}
