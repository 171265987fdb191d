pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Boxed error used at the hardware trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Addressable boolean outputs (valves, pump enables).
///
/// The core only ever writes; implementations must not require a read-back
/// to stay consistent.
pub trait DigitalOutput {
    fn set(&mut self, pin: u8, active: bool) -> Result<(), BoxError>;
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn set(&mut self, pin: u8, active: bool) -> Result<(), BoxError> {
        (**self).set(pin, active)
    }
}
