//! Command-line surface of the `perfusion` binary.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Set once from `--json`; read when a fatal error is reported.
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "perfusion", version, about = "Multi-chamber perfusion controller")]
pub struct Cli {
    /// Controller config (TOML)
    #[arg(long, value_name = "FILE", default_value = "etc/perfusion.toml")]
    pub config: PathBuf,

    /// Optional flow calibration CSV (strict header: direction,seconds,ml)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Status, notices and errors as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// What to do
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FlowArg {
    Remove,
    Add,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run experiments, reading operator commands from stdin
    Run {
        /// Preselect chambers (1-8) before the settings stage
        #[arg(long, value_delimiter = ',', value_name = "N,..")]
        chambers: Vec<u8>,
    },
    /// Print the flow model estimate and the duration that would be used
    Estimate {
        /// Tracked reservoir volume in mL
        #[arg(long, value_name = "ML")]
        volume: f32,
        /// Flow direction
        #[arg(long, value_enum, default_value = "remove")]
        direction: FlowArg,
    },
    /// Pulse every configured line once and report (hardware presence / sim ok)
    SelfCheck,
}
