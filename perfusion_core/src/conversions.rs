//! `From` implementations bridging `perfusion_config` types to core types.

use std::time::Duration;

use crate::config::{CoreConfig, EstimatorCfg, ExchangeCfg, FlowRates, PinMap, PinPair, TimingCfg};
use crate::error::BuildError;
use crate::registry::CHAMBERS;

// ── ExchangeCfg ──────────────────────────────────────────────────────────────

impl From<&perfusion_config::Exchange> for ExchangeCfg {
    fn from(c: &perfusion_config::Exchange) -> Self {
        Self {
            target_ml: c.target_ml,
        }
    }
}

// ── TimingCfg ────────────────────────────────────────────────────────────────

impl From<&perfusion_config::Timing> for TimingCfg {
    fn from(c: &perfusion_config::Timing) -> Self {
        Self {
            refresh_interval: Duration::from_millis(c.refresh_interval_ms),
            poll: Duration::from_millis(c.poll_ms),
            debounce: Duration::from_millis(c.debounce_ms),
        }
    }
}

// ── FlowRates ────────────────────────────────────────────────────────────────

impl From<&perfusion_config::FlowCalibration> for FlowRates {
    fn from(c: &perfusion_config::FlowCalibration) -> Self {
        Self {
            remove_ml_per_s: c.remove_ml_per_s,
            add_ml_per_s: c.add_ml_per_s,
        }
    }
}

// ── EstimatorCfg ─────────────────────────────────────────────────────────────

impl From<&perfusion_config::Estimator> for EstimatorCfg {
    fn from(c: &perfusion_config::Estimator) -> Self {
        Self {
            remove_diameter: c.remove_diameter,
            add_diameter: c.add_diameter,
            step: Duration::from_millis(c.step_ms),
            min_step_ml: c.min_step_ml,
            steps_per_tick: c.steps_per_tick,
            remove_override: c.remove_override_ms.map(Duration::from_millis),
            add_override: c.add_override_ms.map(Duration::from_millis),
            calibration: None,
        }
    }
}

// ── PinMap ───────────────────────────────────────────────────────────────────

impl TryFrom<&perfusion_config::Pins> for PinMap {
    type Error = BuildError;

    fn try_from(c: &perfusion_config::Pins) -> Result<Self, Self::Error> {
        if c.chambers.len() != CHAMBERS {
            return Err(BuildError::InvalidConfig("pins.chambers must have 8 entries"));
        }
        let mut pairs = [PinPair {
            remove_pin: 0,
            add_pin: 0,
        }; CHAMBERS];
        for (slot, p) in pairs.iter_mut().zip(&c.chambers) {
            *slot = PinPair {
                remove_pin: p.remove,
                add_pin: p.add,
            };
        }
        Ok(Self(pairs))
    }
}

// ── CoreConfig ───────────────────────────────────────────────────────────────

impl TryFrom<&perfusion_config::Config> for CoreConfig {
    type Error = BuildError;

    fn try_from(c: &perfusion_config::Config) -> Result<Self, Self::Error> {
        let mut estimator = EstimatorCfg::from(&c.estimator);
        estimator.calibration = c.calibration.as_ref().map(FlowRates::from);
        Ok(Self {
            pins: PinMap::try_from(&c.pins)?,
            exchange: ExchangeCfg::from(&c.exchange),
            timing: TimingCfg::from(&c.timing),
            estimator,
        })
    }
}
