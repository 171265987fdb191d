//! Tick-driven media exchange state machine.
//!
//! One exchange at a time:
//! `Idle → CalculatingRemoveTime → Removing → RemoveSettle →
//! CalculatingAddTime → Adding → AddSettle → Idle`.
//!
//! The sequencer never blocks. Each `tick` does a bounded amount of work
//! (a slice of the estimate, or one elapsed-time check) so the caller can
//! keep refreshing status and reading input while an exchange is in flight.

use std::time::{Duration, Instant};

use perfusion_traits::DigitalOutput;

use crate::config::{EstimatorCfg, ExchangeCfg};
use crate::error::Result;
use crate::estimator::{Direction, DurationPolicy, DurationSource, Estimation, FlowModel};
use crate::registry::{ChamberId, ChamberRegistry, ChamberStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    CalculatingRemoveTime,
    Removing,
    RemoveSettle,
    CalculatingAddTime,
    Adding,
    AddSettle,
}

/// Outcome of `ActuatorSequencer::begin`.
#[derive(Debug, Clone, PartialEq)]
pub enum Begin {
    Started,
    /// Tracked volume is below one exchange; no pin was touched.
    InsufficientVolume { volume_ml: f32, required_ml: f32 },
    NotInUse,
    /// Another chamber's exchange is in flight.
    Busy(ChamberId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Idle,
    Working {
        id: ChamberId,
        phase: ExchangePhase,
    },
    /// A line was just energised.
    PhaseStarted {
        id: ChamberId,
        phase: ExchangePhase,
        duration: Duration,
        source: DurationSource,
    },
    Completed {
        id: ChamberId,
        removed_ml: f32,
        volume_ml: f32,
    },
}

/// Exchange parameters shared by every chamber.
#[derive(Debug, Clone, Copy)]
pub struct ExchangePlan {
    pub target_ml: f32,
    pub estimator: EstimatorCfg,
    pub debounce: Duration,
}

impl ExchangePlan {
    pub fn new(exchange: ExchangeCfg, estimator: EstimatorCfg, debounce: Duration) -> Self {
        Self {
            target_ml: exchange.target_ml,
            estimator,
            debounce,
        }
    }

    fn model(&self, direction: Direction) -> FlowModel {
        FlowModel::for_direction(&self.estimator, self.target_ml, direction)
    }
}

#[derive(Debug)]
enum Step {
    Calculating {
        direction: Direction,
        estimation: Estimation,
    },
    Driving {
        direction: Direction,
        since: Instant,
        duration: Duration,
    },
    Settling {
        direction: Direction,
        since: Instant,
    },
}

#[derive(Debug)]
struct InFlight {
    id: ChamberId,
    step: Step,
    removed_ml: f32,
}

impl InFlight {
    fn phase(&self) -> ExchangePhase {
        use Direction::{Add, Remove};
        match self.step {
            Step::Calculating { direction: Remove, .. } => ExchangePhase::CalculatingRemoveTime,
            Step::Driving { direction: Remove, .. } => ExchangePhase::Removing,
            Step::Settling { direction: Remove, .. } => ExchangePhase::RemoveSettle,
            Step::Calculating { direction: Add, .. } => ExchangePhase::CalculatingAddTime,
            Step::Driving { direction: Add, .. } => ExchangePhase::Adding,
            Step::Settling { direction: Add, .. } => ExchangePhase::AddSettle,
        }
    }
}

enum Progress {
    Continue(Tick),
    Done(Tick),
}

#[derive(Debug)]
pub struct ActuatorSequencer {
    plan: ExchangePlan,
    in_flight: Option<InFlight>,
}

impl ActuatorSequencer {
    pub fn new(plan: ExchangePlan) -> Self {
        Self {
            plan,
            in_flight: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Chamber and phase of the exchange in flight.
    pub fn current(&self) -> Option<(ChamberId, ExchangePhase)> {
        self.in_flight.as_ref().map(|f| (f.id, f.phase()))
    }

    /// Start an exchange on `id`. Refusals leave every pin untouched.
    pub fn begin<O: DigitalOutput>(
        &mut self,
        registry: &mut ChamberRegistry<O>,
        id: ChamberId,
    ) -> Begin {
        if let Some(f) = &self.in_flight {
            return Begin::Busy(f.id);
        }
        let chamber = registry.chamber(id);
        if !chamber.in_use {
            return Begin::NotInUse;
        }
        let volume_ml = chamber.media_volume_ml;
        if volume_ml < self.plan.target_ml {
            tracing::info!(chamber = %id, volume_ml, required_ml = self.plan.target_ml, "not enough media for an exchange");
            return Begin::InsufficientVolume {
                volume_ml,
                required_ml: self.plan.target_ml,
            };
        }
        registry.chamber_mut(id).status = ChamberStatus::CalculatingTime;
        self.in_flight = Some(InFlight {
            id,
            step: Step::Calculating {
                direction: Direction::Remove,
                estimation: Estimation::new(self.plan.model(Direction::Remove), volume_ml),
            },
            removed_ml: 0.0,
        });
        tracing::info!(chamber = %id, volume_ml, "exchange started");
        Begin::Started
    }

    /// Advance the exchange in flight.
    ///
    /// On a pin failure both lines of the chamber are forced low, the
    /// sequencer returns to idle and the error is returned.
    pub fn tick<O: DigitalOutput>(
        &mut self,
        registry: &mut ChamberRegistry<O>,
        now: Instant,
    ) -> Result<Tick> {
        let Some(mut flight) = self.in_flight.take() else {
            return Ok(Tick::Idle);
        };
        match self.advance(&mut flight, registry, now) {
            Ok(Progress::Continue(tick)) => {
                self.in_flight = Some(flight);
                Ok(tick)
            }
            Ok(Progress::Done(tick)) => Ok(tick),
            Err(e) => {
                registry.chamber_mut(flight.id).status = ChamberStatus::Running;
                if let Err(release_err) = registry.release(flight.id) {
                    tracing::warn!(chamber = %flight.id, error = %release_err, "release after failure failed");
                }
                tracing::error!(chamber = %flight.id, error = %e, "exchange aborted");
                Err(e)
            }
        }
    }

    fn advance<O: DigitalOutput>(
        &self,
        flight: &mut InFlight,
        registry: &mut ChamberRegistry<O>,
        now: Instant,
    ) -> Result<Progress> {
        let id = flight.id;
        let phase = flight.phase();
        let working = Progress::Continue(Tick::Working { id, phase });

        match &mut flight.step {
            Step::Calculating {
                direction,
                estimation,
            } => {
                let direction = *direction;
                let Some(model) = estimation.advance(self.plan.estimator.steps_per_tick.max(1))
                else {
                    return Ok(working);
                };
                let (duration, source) = DurationPolicy::for_direction(&self.plan.estimator, direction)
                    .resolve(self.plan.target_ml, &model);
                tracing::info!(
                    chamber = %id,
                    ?direction,
                    model_ms = model.duration.as_millis() as u64,
                    model_moved_ml = model.volume_moved_ml,
                    chosen_ms = duration.as_millis() as u64,
                    source = source.as_str(),
                    "drive duration resolved"
                );
                if direction == Direction::Remove {
                    flight.removed_ml = model.volume_moved_ml;
                }
                registry.drive(id, direction.into(), true)?;
                registry.chamber_mut(id).status = match direction {
                    Direction::Remove => ChamberStatus::RemovingMedia,
                    Direction::Add => ChamberStatus::AddingMedia,
                };
                flight.step = Step::Driving {
                    direction,
                    since: now,
                    duration,
                };
                Ok(Progress::Continue(Tick::PhaseStarted {
                    id,
                    phase: flight.phase(),
                    duration,
                    source,
                }))
            }
            Step::Driving {
                direction,
                since,
                duration,
            } => {
                let direction = *direction;
                if now.saturating_duration_since(*since) < *duration {
                    return Ok(working);
                }
                registry.drive(id, direction.into(), false)?;
                tracing::debug!(chamber = %id, ?direction, "line off, settling");
                flight.step = Step::Settling {
                    direction,
                    since: now,
                };
                Ok(Progress::Continue(Tick::Working {
                    id,
                    phase: flight.phase(),
                }))
            }
            Step::Settling { direction, since } => {
                let direction = *direction;
                if now.saturating_duration_since(*since) < self.plan.debounce {
                    return Ok(working);
                }
                match direction {
                    Direction::Remove => {
                        let chamber = registry.chamber_mut(id);
                        chamber.status = ChamberStatus::CalculatingTime;
                        let volume = chamber.media_volume_ml;
                        flight.step = Step::Calculating {
                            direction: Direction::Add,
                            estimation: Estimation::new(self.plan.model(Direction::Add), volume),
                        };
                        Ok(Progress::Continue(Tick::Working {
                            id,
                            phase: flight.phase(),
                        }))
                    }
                    Direction::Add => {
                        let chamber = registry.chamber_mut(id);
                        chamber.status = ChamberStatus::Running;
                        chamber.last_changed = Some(now);
                        chamber.media_volume_ml = (chamber.media_volume_ml - flight.removed_ml).max(0.0);
                        let volume_ml = chamber.media_volume_ml;
                        tracing::info!(chamber = %id, removed_ml = flight.removed_ml, volume_ml, "exchange complete");
                        Ok(Progress::Done(Tick::Completed {
                            id,
                            removed_ml: flight.removed_ml,
                            volume_ml,
                        }))
                    }
                }
            }
        }
    }

    /// Abort the exchange in flight: its lines go inactive, the chamber
    /// returns to Running and `last_changed` is left alone.
    pub fn cancel<O: DigitalOutput>(
        &mut self,
        registry: &mut ChamberRegistry<O>,
    ) -> Result<Option<ChamberId>> {
        let Some(flight) = self.in_flight.take() else {
            return Ok(None);
        };
        let id = flight.id;
        let chamber = registry.chamber_mut(id);
        if chamber.in_use {
            chamber.status = ChamberStatus::Running;
        }
        registry.release(id)?;
        tracing::info!(chamber = %id, phase = ?flight.phase(), "exchange cancelled");
        Ok(Some(id))
    }
}
