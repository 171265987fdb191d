//! `perfusion` binary: config, logging, signal handling, and dispatch.

mod cli;
mod commands;
mod console;
mod error_fmt;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use perfusion_config::Logging;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn init_tracing(json: bool, level: Option<&str>, logging: &Logging) -> Result<()> {
    let level = level
        .or(logging.level.as_deref())
        .unwrap_or("info")
        .to_string();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .wrap_err_with(|| format!("invalid log level '{level}'"))?;

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let file = match &logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name"))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = run::load_config(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::info!(config = %cli.config.display(), "config loaded");

    let calibration = run::load_calibration(cli.calibration.as_deref(), &cfg)?;
    let core = run::core_config(&cfg, calibration.as_ref())?;

    match cli.cmd {
        Commands::Estimate { volume, direction } => {
            run::run_estimate(&core, volume, direction, cli.json)
        }
        Commands::SelfCheck => {
            let outputs = run::open_outputs(&core.pins)?;
            run::self_check(&core, outputs, cli.json)
        }
        Commands::Run { chambers } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            // SIGINT, SIGTERM and SIGHUP all take the cancel-and-reset path.
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .wrap_err("install termination signal handler")?;
            let outputs = run::open_outputs(&core.pins)?;
            run::run_experiments(core, outputs, &chambers, shutdown, cli.json)?;
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }

    if let Err(err) = real_main(cli) {
        tracing::error!(error = %format!("{err:#}"), "fatal");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("error: {err:#}\n\n{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}
