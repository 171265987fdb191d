//! Runtime configuration types for the control core.
//!
//! These are separate from the TOML-deserialized config in `perfusion_config`;
//! see `conversions` for the bridge.

use std::time::Duration;

use crate::registry::CHAMBERS;

/// Pins (BCM numbering) of one chamber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPair {
    pub remove_pin: u8,
    pub add_pin: u8,
}

/// Fixed chamber → pin pair mapping, chamber 1 first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMap(pub [PinPair; CHAMBERS]);

impl PinMap {
    /// Every configured pin, remove line before add line, chamber order.
    pub fn all_pins(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().flat_map(|p| [p.remove_pin, p.add_pin])
    }
}

impl Default for PinMap {
    /// Sequential pins 2..=17; only meaningful for simulation and tests.
    fn default() -> Self {
        let mut pairs = [PinPair {
            remove_pin: 0,
            add_pin: 0,
        }; CHAMBERS];
        for (i, p) in pairs.iter_mut().enumerate() {
            let base = 2 + 2 * i as u8;
            *p = PinPair {
                remove_pin: base,
                add_pin: base + 1,
            };
        }
        Self(pairs)
    }
}

/// Exchange settings.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeCfg {
    /// Volume each exchange must move, and the minimum tracked reservoir
    /// volume for an exchange to start.
    pub target_ml: f32,
}

impl Default for ExchangeCfg {
    fn default() -> Self {
        Self { target_ml: 30.0 }
    }
}

/// Loop timing.
#[derive(Debug, Clone, Copy)]
pub struct TimingCfg {
    pub refresh_interval: Duration,
    /// Max time the controller blocks on operator input per iteration.
    pub poll: Duration,
    /// Settle time after a line is switched off.
    pub debounce: Duration,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(1000),
            poll: Duration::from_millis(50),
            debounce: Duration::from_millis(100),
        }
    }
}

/// Measured volumetric flow rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRates {
    pub remove_ml_per_s: f32,
    pub add_ml_per_s: f32,
}

/// Flow model parameters and duration sources.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorCfg {
    pub remove_diameter: f32,
    pub add_diameter: f32,
    /// Simulated step length.
    pub step: Duration,
    /// Floor on the volume moved per step.
    pub min_step_ml: f32,
    /// Steps advanced per control tick while calculating.
    pub steps_per_tick: u32,
    pub remove_override: Option<Duration>,
    pub add_override: Option<Duration>,
    pub calibration: Option<FlowRates>,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            remove_diameter: 0.2,
            add_diameter: 0.3,
            step: Duration::from_millis(1000),
            min_step_ml: 0.05,
            steps_per_tick: 64,
            remove_override: None,
            add_override: None,
            calibration: None,
        }
    }
}

/// Everything the controller needs besides outputs and clock.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub pins: PinMap,
    pub exchange: ExchangeCfg,
    pub timing: TimingCfg,
    pub estimator: EstimatorCfg,
}
