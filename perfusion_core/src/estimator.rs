//! Volumetric flow estimation.
//!
//! The model drains a reservoir in fixed simulated steps: each step moves
//! `remaining * (d/2)^2 * step_s` millilitres, floored at `min_step_ml`, until
//! the target volume has been moved. The floor bounds the iteration count at
//! `ceil(target / min_step_ml)` even for an empty reservoir.
//!
//! `Estimation` is incremental so the sequencer can spread the work over
//! several control ticks; `estimate` runs one to completion.

use std::time::Duration;

use crate::config::EstimatorCfg;
use crate::registry::Line;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Remove,
    Add,
}

impl From<Direction> for Line {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Remove => Line::Remove,
            Direction::Add => Line::Add,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub duration: Duration,
    pub volume_moved_ml: f32,
    pub steps: u32,
}

/// Where a drive duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSource {
    Model,
    Calibrated,
    Override,
}

impl DurationSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Calibrated => "calibrated",
            Self::Override => "override",
        }
    }
}

/// Model parameters for one direction.
#[derive(Debug, Clone, Copy)]
pub struct FlowModel {
    pub diameter: f32,
    pub step: Duration,
    pub min_step_ml: f32,
    pub target_ml: f32,
}

impl FlowModel {
    pub fn for_direction(cfg: &EstimatorCfg, target_ml: f32, direction: Direction) -> Self {
        let diameter = match direction {
            Direction::Remove => cfg.remove_diameter,
            Direction::Add => cfg.add_diameter,
        };
        Self {
            diameter,
            step: cfg.step,
            min_step_ml: cfg.min_step_ml,
            target_ml,
        }
    }

    /// Fraction of the remaining bulk moved per step.
    #[inline]
    fn coefficient(&self) -> f64 {
        let r = f64::from(self.diameter) / 2.0;
        r * r * self.step.as_secs_f64()
    }
}

/// An estimate in progress.
///
/// Volumes accumulate in `f64`; with a small floor an `f32` sum drifts short
/// of the target before the loop can notice.
#[derive(Debug, Clone)]
pub struct Estimation {
    model: FlowModel,
    coefficient: f64,
    floor_ml: f64,
    target_ml: f64,
    remaining_bulk_ml: f64,
    moved_ml: f64,
    steps: u32,
}

impl Estimation {
    /// Negative or non-finite reservoir volumes are treated as empty.
    pub fn new(model: FlowModel, reservoir_ml: f32) -> Self {
        let reservoir = if reservoir_ml.is_finite() {
            f64::from(reservoir_ml.max(0.0))
        } else {
            0.0
        };
        let target = if model.target_ml.is_finite() {
            f64::from(model.target_ml.max(0.0))
        } else {
            0.0
        };
        Self {
            coefficient: model.coefficient(),
            floor_ml: f64::from(model.min_step_ml),
            target_ml: target,
            model,
            remaining_bulk_ml: reservoir,
            moved_ml: 0.0,
            steps: 0,
        }
    }

    /// Done once the target is moved. The floor makes every step move at
    /// least `min_step_ml`, so this is reached after at most
    /// `ceil(target / min_step_ml)` steps; `u32::MAX` only stops a
    /// non-positive floor.
    pub fn is_done(&self) -> bool {
        self.moved_ml >= self.target_ml || self.steps == u32::MAX
    }

    /// Run one simulated step. Returns false when already done.
    pub fn step(&mut self) -> bool {
        if self.is_done() {
            return false;
        }
        let volume_step = (self.remaining_bulk_ml * self.coefficient).max(self.floor_ml);
        self.remaining_bulk_ml = (self.remaining_bulk_ml - volume_step).max(0.0);
        self.moved_ml += volume_step;
        self.steps += 1;
        true
    }

    /// Run up to `max_steps` steps; `Some` once the estimate is complete.
    pub fn advance(&mut self, max_steps: u32) -> Option<Estimate> {
        for _ in 0..max_steps {
            if !self.step() {
                break;
            }
        }
        self.is_done().then(|| self.current())
    }

    /// Estimate so far.
    #[allow(clippy::cast_possible_truncation)]
    pub fn current(&self) -> Estimate {
        Estimate {
            duration: self.model.step.saturating_mul(self.steps),
            // Rounds to nearest, so a finished estimate never reports less
            // than the (f32) target.
            volume_moved_ml: self.moved_ml as f32,
            steps: self.steps,
        }
    }
}

/// Run the model to completion, calling `hook` after every simulated step.
pub fn estimate(
    cfg: &EstimatorCfg,
    target_ml: f32,
    reservoir_ml: f32,
    direction: Direction,
    mut hook: impl FnMut(&Estimate),
) -> Estimate {
    let mut est = Estimation::new(FlowModel::for_direction(cfg, target_ml, direction), reservoir_ml);
    while est.step() {
        hook(&est.current());
    }
    let result = est.current();
    tracing::debug!(
        ?direction,
        reservoir_ml,
        steps = result.steps,
        duration_ms = result.duration.as_millis() as u64,
        moved_ml = result.volume_moved_ml,
        "flow estimate"
    );
    result
}

/// Chooses the drive duration: override, then calibration, then model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationPolicy {
    pub override_duration: Option<Duration>,
    pub rate_ml_per_s: Option<f32>,
}

impl DurationPolicy {
    pub fn for_direction(cfg: &EstimatorCfg, direction: Direction) -> Self {
        let (override_duration, rate) = match direction {
            Direction::Remove => (
                cfg.remove_override,
                cfg.calibration.map(|c| c.remove_ml_per_s),
            ),
            Direction::Add => (cfg.add_override, cfg.calibration.map(|c| c.add_ml_per_s)),
        };
        Self {
            override_duration,
            rate_ml_per_s: rate,
        }
    }

    pub fn resolve(&self, target_ml: f32, model: &Estimate) -> (Duration, DurationSource) {
        if let Some(d) = self.override_duration {
            return (d, DurationSource::Override);
        }
        if let Some(rate) = self.rate_ml_per_s.filter(|r| r.is_finite() && *r > 0.0) {
            if let Ok(d) = Duration::try_from_secs_f32(target_ml / rate) {
                return (d, DurationSource::Calibrated);
            }
        }
        (model.duration, DurationSource::Model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowRates;
    use rstest::rstest;

    fn cfg() -> EstimatorCfg {
        EstimatorCfg::default()
    }

    #[test]
    fn full_reservoir_converges_geometrically() {
        // 50 * (1 - 0.99^n) >= 30 first holds at n = 92.
        let e = estimate(&cfg(), 30.0, 50.0, Direction::Remove, |_| {});
        assert!((91..=93).contains(&e.steps), "steps = {}", e.steps);
        assert!(e.volume_moved_ml >= 30.0);
        assert_eq!(e.duration, Duration::from_secs(u64::from(e.steps)));
    }

    #[test]
    fn empty_reservoir_terminates_on_the_floor() {
        let e = estimate(&cfg(), 30.0, 0.0, Direction::Remove, |_| {});
        assert_eq!(e.steps, 600);
        assert!(e.volume_moved_ml >= 30.0, "moved {}", e.volume_moved_ml);
    }

    #[rstest]
    #[case(0.001)]
    #[case(0.0001)]
    #[case(0.00001)]
    fn tiny_floors_still_reach_the_target(#[case] min_step_ml: f32) {
        let c = EstimatorCfg {
            min_step_ml,
            ..cfg()
        };
        let e = estimate(&c, 30.0, 0.0, Direction::Remove, |_| {});
        assert!(e.volume_moved_ml >= 30.0, "min_step {min_step_ml}: moved {}", e.volume_moved_ml);
        assert!(u64::from(e.steps) <= (30.0 / f64::from(min_step_ml)).ceil() as u64 + 1);
    }

    #[test]
    fn add_line_is_faster_than_remove_line() {
        let remove = estimate(&cfg(), 30.0, 60.0, Direction::Remove, |_| {});
        let add = estimate(&cfg(), 30.0, 60.0, Direction::Add, |_| {});
        assert!(add.duration < remove.duration);
    }

    #[test]
    fn hook_sees_every_step() {
        let mut seen = 0;
        let e = estimate(&cfg(), 30.0, 40.0, Direction::Add, |_| seen += 1);
        assert_eq!(seen, e.steps);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let model = FlowModel::for_direction(&cfg(), 30.0, Direction::Remove);
        let mut est = Estimation::new(model, 50.0);
        let mut ticks = 0;
        let done = loop {
            ticks += 1;
            if let Some(e) = est.advance(8) {
                break e;
            }
        };
        let one_shot = estimate(&cfg(), 30.0, 50.0, Direction::Remove, |_| {});
        assert_eq!(done, one_shot);
        assert_eq!(ticks, one_shot.steps.div_ceil(8));
    }

    #[test]
    fn policy_prefers_override_then_calibration() {
        let model = estimate(&cfg(), 30.0, 50.0, Direction::Remove, |_| {});
        let mut c = cfg();
        c.calibration = Some(FlowRates {
            remove_ml_per_s: 6.0,
            add_ml_per_s: 10.0,
        });
        let (d, src) = DurationPolicy::for_direction(&c, Direction::Remove).resolve(30.0, &model);
        assert_eq!(src, DurationSource::Calibrated);
        assert_eq!(d, Duration::from_secs(5));

        c.remove_override = Some(Duration::from_millis(4200));
        let (d, src) = DurationPolicy::for_direction(&c, Direction::Remove).resolve(30.0, &model);
        assert_eq!((d, src), (Duration::from_millis(4200), DurationSource::Override));

        let (d, src) = DurationPolicy::for_direction(&cfg(), Direction::Add).resolve(30.0, &model);
        assert_eq!((d, src), (model.duration, DurationSource::Model));
    }
}
