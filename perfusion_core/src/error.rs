//! Typed failures of the control core. Fallible APIs return `eyre::Result`
//! and carry one of these as the root cause.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PerfusionError {
    /// An output line rejected a write.
    #[error("output line error: {0}")]
    Hardware(String),
    /// The output backend reported a fault it cannot recover from.
    #[error("output backend fault: {0}")]
    HardwareFault(String),
    #[error("configuration rejected: {0}")]
    Config(String),
    #[error("i/o failure: {0}")]
    Io(String),
}

/// Reasons `ControllerBuilder::try_build` refuses to build.
#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("no digital outputs were supplied")]
    MissingOutputs,
    #[error("unusable controller config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
