#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and flow calibration parsing for the perfusion controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The flow calibration CSV loader enforces headers and fits one
//!   volumetric rate per direction (least squares through the origin).
use serde::Deserialize;
use std::collections::BTreeSet;

/// Number of chamber slots on the rig.
pub const CHAMBER_COUNT: usize = 8;

/// Upper bound on `target_ml / min_step_ml`, the worst-case model step count.
pub const MAX_ESTIMATE_STEPS: f64 = 1_000_000.0;

/// Output pins (BCM numbering) driving one chamber's valves/pumps.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PinPair {
    pub add: u8,
    pub remove: u8,
}

#[derive(Debug, Deserialize)]
pub struct Pins {
    /// One entry per chamber, chamber 1 first.
    pub chambers: Vec<PinPair>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Exchange {
    /// Volume an exchange must move; also the minimum tracked reservoir
    /// volume required before an automated exchange is allowed.
    pub target_ml: f32,
}

impl Default for Exchange {
    fn default() -> Self {
        Self { target_ml: 30.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Status refresh and heartbeat toggle interval.
    pub refresh_interval_ms: u64,
    /// Max time to block waiting for operator input per loop iteration.
    pub poll_ms: u64,
    /// Hold time after a line is switched off before the next phase.
    pub debounce_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            poll_ms: 50,
            debounce_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Estimator {
    /// Characteristic diameter of the remove line (model units).
    pub remove_diameter: f32,
    /// Characteristic diameter of the add line (model units).
    pub add_diameter: f32,
    /// Simulated step length.
    pub step_ms: u64,
    /// Floor for the volume moved per simulated step; bounds iteration count.
    pub min_step_ml: f32,
    /// Simulated steps advanced per control tick.
    pub steps_per_tick: u32,
    /// Fixed empirical remove duration; replaces the model duration when set.
    pub remove_override_ms: Option<u64>,
    /// Fixed empirical add duration; replaces the model duration when set.
    pub add_override_ms: Option<u64>,
}

impl Default for Estimator {
    fn default() -> Self {
        Self {
            remove_diameter: 0.2,
            add_diameter: 0.3,
            step_ms: 1000,
            min_step_ml: 0.05,
            steps_per_tick: 64,
            remove_override_ms: None,
            add_override_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    /// JSON-lines log file; console only when unset.
    pub file: Option<String>,
    /// Default filter when neither `--log-level` nor `RUST_LOG` is given.
    pub level: Option<String>,
    /// `never` (default), `daily` or `hourly`.
    pub rotation: Option<String>,
}

/// Flow direction as written in calibration files.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Add,
    Remove,
}

/// Measured volumetric rates per direction.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct FlowCalibration {
    pub remove_ml_per_s: f32,
    pub add_ml_per_s: f32,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub exchange: Exchange,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub estimator: Estimator,
    #[serde(default)]
    pub logging: Logging,
    /// Optional persisted flow calibration; a CSV passed at runtime wins.
    #[serde(default)]
    pub calibration: Option<FlowCalibration>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Calibration CSV schema.
///
/// Expected headers:
/// direction,seconds,ml
///
/// Example:
/// direction,seconds,ml
/// remove,5.0,31.5
/// add,5.0,34.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub direction: FlowDirection,
    pub seconds: f32,
    pub ml: f32,
}

impl FlowCalibration {
    /// Fit `ml = rate * seconds` per direction by least squares through the
    /// origin: `rate = Σ(s·ml) / Σ(s²)`.
    pub fn from_rows(rows: &[CalibrationRow]) -> eyre::Result<Self> {
        let fit = |dir: FlowDirection| -> eyre::Result<f32> {
            let mut sxx = 0.0f64;
            let mut sxy = 0.0f64;
            let mut n = 0usize;
            for r in rows.iter().filter(|r| r.direction == dir) {
                if !(r.seconds.is_finite() && r.seconds > 0.0) {
                    eyre::bail!("calibration seconds must be > 0, got {}", r.seconds);
                }
                if !(r.ml.is_finite() && r.ml >= 0.0) {
                    eyre::bail!("calibration ml must be >= 0, got {}", r.ml);
                }
                let s = f64::from(r.seconds);
                sxx += s * s;
                sxy += s * f64::from(r.ml);
                n += 1;
            }
            if n == 0 {
                eyre::bail!("calibration has no rows for direction {dir:?}");
            }
            let rate = sxy / sxx;
            if !rate.is_finite() || rate <= 0.0 {
                eyre::bail!("calibration produced invalid rate for {dir:?}: {rate}");
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(rate as f32)
        };
        Ok(Self {
            remove_ml_per_s: fit(FlowDirection::Remove)?,
            add_ml_per_s: fit(FlowDirection::Add)?,
        })
    }
}

impl TryFrom<&[CalibrationRow]> for FlowCalibration {
    type Error = eyre::Report;
    fn try_from(rows: &[CalibrationRow]) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<FlowCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["direction", "seconds", "ml"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'direction,seconds,ml', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    FlowCalibration::try_from(rows.as_slice())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        if self.pins.chambers.len() != CHAMBER_COUNT {
            eyre::bail!(
                "pins.chambers must list exactly {CHAMBER_COUNT} chambers, got {}",
                self.pins.chambers.len()
            );
        }
        let mut seen = BTreeSet::new();
        for (i, pair) in self.pins.chambers.iter().enumerate() {
            if pair.add == pair.remove {
                eyre::bail!("pins.chambers[{i}]: add and remove must differ (both {})", pair.add);
            }
            for pin in [pair.add, pair.remove] {
                if !seen.insert(pin) {
                    eyre::bail!("pins.chambers: pin {pin} is assigned more than once");
                }
            }
        }

        // Exchange
        if !(self.exchange.target_ml.is_finite() && self.exchange.target_ml > 0.0) {
            eyre::bail!("exchange.target_ml must be > 0");
        }

        // Timing
        if self.timing.refresh_interval_ms == 0 {
            eyre::bail!("timing.refresh_interval_ms must be >= 1");
        }
        if self.timing.poll_ms == 0 {
            eyre::bail!("timing.poll_ms must be >= 1");
        }
        if self.timing.poll_ms > self.timing.refresh_interval_ms {
            eyre::bail!("timing.poll_ms must not exceed timing.refresh_interval_ms");
        }
        if self.timing.debounce_ms > 10_000 {
            eyre::bail!("timing.debounce_ms is unreasonably large (>10s)");
        }

        // Estimator
        let est = &self.estimator;
        if est.step_ms == 0 {
            eyre::bail!("estimator.step_ms must be >= 1");
        }
        #[allow(clippy::cast_precision_loss)]
        let step_s = est.step_ms as f32 / 1000.0;
        for (name, d) in [
            ("remove_diameter", est.remove_diameter),
            ("add_diameter", est.add_diameter),
        ] {
            if !(d.is_finite() && d > 0.0) {
                eyre::bail!("estimator.{name} must be > 0");
            }
            if (d / 2.0).powi(2) * step_s >= 1.0 {
                eyre::bail!("estimator.{name} too large for step_ms (fraction per step >= 1)");
            }
        }
        if !(est.min_step_ml.is_finite() && est.min_step_ml > 0.0) {
            eyre::bail!("estimator.min_step_ml must be > 0");
        }
        if f64::from(self.exchange.target_ml) / f64::from(est.min_step_ml) > MAX_ESTIMATE_STEPS {
            eyre::bail!(
                "estimator.min_step_ml too small for exchange.target_ml (over {MAX_ESTIMATE_STEPS} model steps)"
            );
        }
        if est.steps_per_tick == 0 {
            eyre::bail!("estimator.steps_per_tick must be >= 1");
        }
        if est.remove_override_ms == Some(0) {
            eyre::bail!("estimator.remove_override_ms must be >= 1 when set");
        }
        if est.add_override_ms == Some(0) {
            eyre::bail!("estimator.add_override_ms must be >= 1 when set");
        }

        // Calibration
        if let Some(c) = &self.calibration
            && !(c.remove_ml_per_s.is_finite()
                && c.remove_ml_per_s > 0.0
                && c.add_ml_per_s.is_finite()
                && c.add_ml_per_s > 0.0)
        {
            eyre::bail!("calibration rates must be > 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {rot:?}");
        }

        Ok(())
    }
}
