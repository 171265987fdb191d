use perfusion_traits::{BoxError, DigitalOutput};
use rppal::gpio::{Gpio, OutputPin};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{HwError, Result};

/// Raspberry Pi GPIO outputs addressed by BCM number.
pub struct GpioOutputs {
    pins: BTreeMap<u8, OutputPin>,
}

impl GpioOutputs {
    /// Claim every pin in `pins` as an output, initially low.
    pub fn open(pins: &[u8]) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
        let mut out = BTreeMap::new();
        for &pin in pins {
            let p = gpio
                .get(pin)
                .map_err(|e| HwError::Gpio(format!("claim pin {pin}: {e}")))?
                .into_output_low();
            debug!(pin, "output claimed");
            out.insert(pin, p);
        }
        Ok(Self { pins: out })
    }
}

impl DigitalOutput for GpioOutputs {
    fn set(&mut self, pin: u8, active: bool) -> std::result::Result<(), BoxError> {
        let p = self.pins.get_mut(&pin).ok_or(HwError::UnknownPin(pin))?;
        if active {
            p.set_high();
        } else {
            p.set_low();
        }
        Ok(())
    }
}

impl Drop for GpioOutputs {
    fn drop(&mut self) {
        for (pin, p) in &mut self.pins {
            if p.is_set_high() {
                warn!(pin, "output still high on release; forcing low");
            }
            p.set_low();
        }
    }
}
