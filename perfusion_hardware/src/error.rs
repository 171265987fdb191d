use thiserror::Error;

/// Failures of the output backends.
#[derive(Debug, Error)]
pub enum HwError {
    /// The GPIO peripheral or a pin could not be acquired or driven.
    #[error("gpio: {0}")]
    Gpio(String),
    /// A write named a pin that was never opened as an output.
    #[error("pin {0} is not configured as an output")]
    UnknownPin(u8),
    #[error("output i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
