//! Maps `Box<dyn Error>` from trait boundaries to typed `PerfusionError`.
//!
//! The traits in `perfusion_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `perfusion_hardware::HwError` downcasting.

use crate::error::PerfusionError;

/// Map a trait-boundary error to a typed `PerfusionError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> PerfusionError {
    #[cfg(feature = "hardware-errors")]
    {
        use perfusion_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Io(io) => PerfusionError::Io(io.to_string()),
                other => PerfusionError::HardwareFault(other.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return PerfusionError::Io(io.to_string());
    }
    PerfusionError::Hardware(e.to_string())
}
