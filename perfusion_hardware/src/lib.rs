pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use gpio::GpioOutputs;

use perfusion_traits::{BoxError, DigitalOutput};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::HwError;

#[derive(Debug, Default)]
struct SimState {
    levels: BTreeMap<u8, bool>,
    history: Vec<(u8, bool)>,
    fail_on: Option<u8>,
}

/// Simulated output bank. Every write is recorded so tests and the CLI
/// self-check can inspect what the core would have driven.
#[derive(Debug, Default)]
pub struct SimulatedOutputs {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle sharing this bank's state.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Rc::clone(&self.state),
        }
    }

    /// Make every write to `pin` fail (fault injection for tests).
    pub fn fail_writes_to(&self, pin: u8) {
        self.state.borrow_mut().fail_on = Some(pin);
    }
}

impl DigitalOutput for SimulatedOutputs {
    fn set(&mut self, pin: u8, active: bool) -> Result<(), BoxError> {
        let mut st = self.state.borrow_mut();
        if st.fail_on == Some(pin) {
            return Err(Box::new(HwError::Gpio(format!("simulated write failure on pin {pin}"))));
        }
        st.levels.insert(pin, active);
        st.history.push((pin, active));
        tracing::trace!(pin, active, "output write (simulated)");
        Ok(())
    }
}

/// Observer for a `SimulatedOutputs` bank.
#[derive(Debug, Clone)]
pub struct SimProbe {
    state: Rc<RefCell<SimState>>,
}

impl SimProbe {
    /// Current level of `pin`; never-written pins read inactive.
    pub fn is_active(&self, pin: u8) -> bool {
        self.state.borrow().levels.get(&pin).copied().unwrap_or(false)
    }

    /// Pins currently driven active.
    pub fn active_pins(&self) -> Vec<u8> {
        self.state
            .borrow()
            .levels
            .iter()
            .filter_map(|(pin, on)| on.then_some(*pin))
            .collect()
    }

    /// Every write in order, including redundant ones.
    pub fn history(&self) -> Vec<(u8, bool)> {
        self.state.borrow().history.clone()
    }

    /// Writes that changed a pin's level.
    pub fn transitions(&self) -> Vec<(u8, bool)> {
        let mut seen: BTreeMap<u8, bool> = BTreeMap::new();
        let mut out = Vec::new();
        for &(pin, on) in &self.state.borrow().history {
            let prev = seen.insert(pin, on).unwrap_or(false);
            if prev != on {
                out.push((pin, on));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_outputs_record_levels() {
        let mut out = SimulatedOutputs::new();
        let probe = out.probe();
        out.set(5, true).unwrap();
        out.set(7, false).unwrap();
        assert!(probe.is_active(5));
        assert!(!probe.is_active(7));
        assert!(!probe.is_active(99));
        assert_eq!(probe.active_pins(), vec![5]);
    }

    #[test]
    fn test_transitions_skip_redundant_writes() {
        let mut out = SimulatedOutputs::new();
        let probe = out.probe();
        out.set(3, false).unwrap();
        out.set(3, true).unwrap();
        out.set(3, true).unwrap();
        out.set(3, false).unwrap();
        assert_eq!(probe.history().len(), 4);
        assert_eq!(probe.transitions(), vec![(3, true), (3, false)]);
    }
}
