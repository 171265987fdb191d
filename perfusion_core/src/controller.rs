//! Experiment lifecycle.
//!
//! `reset → settings → monitoring (+ exchanges) → wash prompt → reset ...`
//! Cancelling the settings stage resets and starts it over; the loop ends when
//! the operator finishes from the settings stage, shutdown is requested, or
//! operator input closes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use eyre::WrapErr;
use perfusion_traits::{Clock, DigitalOutput, MonotonicClock};

use crate::config::{CoreConfig, TimingCfg};
use crate::error::{BuildError, Result};
use crate::presentation::{Intent, IntentSource, Notice, Presenter, Stage, StatusSnapshot, Target};
use crate::registry::{ChamberId, ChamberRegistry};
use crate::scheduler::MonitorScheduler;
use crate::sequencer::{ActuatorSequencer, Begin, ExchangePlan, Tick};

/// How `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The operator finished from the settings stage.
    Quit,
    /// The shutdown flag was raised.
    Shutdown,
    /// The intent source closed (e.g. end of operator input).
    InputClosed,
}

/// Lives for one monitoring stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub start_time: Instant,
    /// Ascending.
    pub active: Vec<ChamberId>,
}

enum Settings {
    Confirmed(Vec<ChamberId>),
    Cancelled,
    Quit,
    Stopped(Exit),
}

enum StageEnd {
    Finished,
    Stopped(Exit),
}

/// Reason to leave the loop regardless of stage, if any.
fn stop_reason(flag: Option<&Arc<AtomicBool>>, intents: &impl IntentSource) -> Option<Exit> {
    if flag.is_some_and(|f| f.load(Ordering::Relaxed)) {
        Some(Exit::Shutdown)
    } else if intents.is_closed() {
        Some(Exit::InputClosed)
    } else {
        None
    }
}

pub struct ExperimentController<O: DigitalOutput> {
    registry: ChamberRegistry<O>,
    sequencer: ActuatorSequencer,
    timing: TimingCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<O: DigitalOutput> std::fmt::Debug for ExperimentController<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentController")
            .field("registry", &self.registry)
            .field("sequencer", &self.sequencer)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

pub struct ControllerBuilder<O> {
    outputs: Option<O>,
    config: CoreConfig,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<O> Default for ControllerBuilder<O> {
    fn default() -> Self {
        Self {
            outputs: None,
            config: CoreConfig::default(),
            clock: None,
            shutdown: None,
        }
    }
}

impl<O: DigitalOutput> ControllerBuilder<O> {
    pub fn with_outputs(mut self, outputs: O) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a clock (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Flag checked on every tick; when set, `run` cancels, resets and
    /// returns `Exit::Shutdown`. A closed intent source is handled the same
    /// way and returns `Exit::InputClosed`.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Validate and build. Every pin is forced inactive before returning.
    pub fn try_build(self) -> Result<ExperimentController<O>> {
        let outputs = self.outputs.ok_or(BuildError::MissingOutputs)?;
        let cfg = self.config;
        if !(cfg.exchange.target_ml.is_finite() && cfg.exchange.target_ml > 0.0) {
            return Err(BuildError::InvalidConfig("target_ml must be > 0").into());
        }
        if !(cfg.estimator.min_step_ml.is_finite() && cfg.estimator.min_step_ml > 0.0) {
            return Err(BuildError::InvalidConfig("min_step_ml must be > 0").into());
        }
        if cfg.estimator.step.is_zero() {
            return Err(BuildError::InvalidConfig("estimator step must be > 0").into());
        }
        if cfg.timing.poll.is_zero() || cfg.timing.refresh_interval.is_zero() {
            return Err(BuildError::InvalidConfig("poll and refresh intervals must be > 0").into());
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(MonotonicClock::new()),
        };
        let mut registry = ChamberRegistry::new(cfg.pins, outputs, Arc::clone(&clock));
        registry.reset_all().wrap_err("initial de-energize")?;
        let plan = ExchangePlan::new(cfg.exchange, cfg.estimator, cfg.timing.debounce);

        Ok(ExperimentController {
            registry,
            sequencer: ActuatorSequencer::new(plan),
            timing: cfg.timing,
            clock,
            shutdown: self.shutdown,
        })
    }
}

fn ignored(presenter: &mut impl Presenter, why: impl Into<String>) {
    let why = why.into();
    tracing::debug!(reason = %why, "intent ignored");
    presenter.notify(Notice::Ignored(why));
}

impl<O: DigitalOutput> ExperimentController<O> {
    pub fn builder() -> ControllerBuilder<O> {
        ControllerBuilder::default()
    }

    pub fn registry(&self) -> &ChamberRegistry<O> {
        &self.registry
    }

    pub fn sequencer(&self) -> &ActuatorSequencer {
        &self.sequencer
    }

    /// Run experiments until the operator finishes from the settings stage,
    /// the shutdown flag is raised, or the intent source closes. Chambers are
    /// reset and every pin is inactive on every return path.
    pub fn run<I: IntentSource, P: Presenter>(
        &mut self,
        intents: &mut I,
        presenter: &mut P,
    ) -> Result<Exit> {
        loop {
            self.registry.reset_all().wrap_err("reset before settings")?;
            let active = match self.capture_settings(intents, presenter) {
                Settings::Confirmed(ids) => ids,
                Settings::Cancelled => {
                    tracing::info!("settings cancelled, starting over");
                    continue;
                }
                Settings::Quit => {
                    tracing::info!("finished from settings, exiting");
                    return Ok(Exit::Quit);
                }
                Settings::Stopped(exit) => {
                    tracing::info!(?exit, "stopped during settings");
                    return Ok(exit);
                }
            };
            match self.monitor(active, intents, presenter)? {
                StageEnd::Finished => presenter.notify(Notice::WashPrompt),
                StageEnd::Stopped(exit) => return Ok(exit),
            }
        }
    }

    fn capture_settings<I: IntentSource, P: Presenter>(
        &mut self,
        intents: &mut I,
        presenter: &mut P,
    ) -> Settings {
        let mut dirty = true;
        loop {
            if let Some(exit) = stop_reason(self.shutdown.as_ref(), &*intents) {
                return Settings::Stopped(exit);
            }
            if dirty {
                let snap = StatusSnapshot::capture(
                    &self.registry,
                    Stage::Settings,
                    None,
                    false,
                    self.clock.now(),
                );
                presenter.render(&snap);
                dirty = false;
            }
            let Some(intent) = intents.poll(self.timing.poll) else {
                continue;
            };
            dirty = true;
            match intent {
                Intent::Activate(id) => self.registry.activate(id),
                Intent::Deactivate(id) => self.registry.deactivate(id),
                Intent::SelectAll(selected) => self.registry.select_all(selected),
                Intent::ConfirmSettings(ids) => {
                    if !ids.is_empty() {
                        for id in ChamberId::all() {
                            if ids.contains(&id) {
                                self.registry.activate(id);
                            } else {
                                self.registry.deactivate(id);
                            }
                        }
                    }
                    let active = self.registry.in_use();
                    if active.is_empty() {
                        ignored(presenter, "select at least one chamber before starting");
                        continue;
                    }
                    return Settings::Confirmed(active);
                }
                Intent::Cancel => return Settings::Cancelled,
                Intent::Finish => return Settings::Quit,
                other => ignored(presenter, format!("{other:?} is not available before the experiment starts")),
            }
        }
    }

    fn monitor<I: IntentSource, P: Presenter>(
        &mut self,
        active: Vec<ChamberId>,
        intents: &mut I,
        presenter: &mut P,
    ) -> Result<StageEnd> {
        let clock = Arc::clone(&self.clock);
        let timing = self.timing;
        let ctx = RunContext {
            start_time: clock.now(),
            active,
        };
        let mut guard = self.registry.take_control();
        let registry: &mut ChamberRegistry<O> = &mut guard;
        let sequencer = &mut self.sequencer;
        let shutdown = self.shutdown.as_ref();

        registry.restamp_in_use(ctx.start_time);
        let mut scheduler = MonitorScheduler::new(timing.refresh_interval, ctx.start_time);
        let mut queue: BTreeSet<ChamberId> = BTreeSet::new();
        let mut awaiting_ack: Option<ChamberId> = None;

        tracing::info!(chambers = ?ctx.active, "experiment started");
        presenter.notify(Notice::ExperimentStarted(ctx.active.clone()));
        presenter.render(&StatusSnapshot::capture(
            registry,
            Stage::Monitoring,
            Some(ctx.start_time),
            scheduler.heartbeat().indicator_on,
            ctx.start_time,
        ));

        loop {
            if let Some(exit) = stop_reason(shutdown, &*intents) {
                if let Some(id) = sequencer.cancel(registry)? {
                    presenter.notify(Notice::ExchangeCancelled(id));
                }
                tracing::info!(?exit, "leaving monitoring");
                return Ok(StageEnd::Stopped(exit));
            }

            if let Some(intent) = intents.poll(timing.poll) {
                match intent {
                    Intent::Finish => {
                        if let Some(id) = sequencer.cancel(registry)? {
                            presenter.notify(Notice::ExchangeCancelled(id));
                        }
                        tracing::info!(
                            runtime_s = clock.since(ctx.start_time).as_secs(),
                            "experiment finished"
                        );
                        return Ok(StageEnd::Finished);
                    }
                    Intent::Cancel => {
                        queue.clear();
                        awaiting_ack = None;
                        if let Some(id) = sequencer.cancel(registry)? {
                            presenter.notify(Notice::ExchangeCancelled(id));
                        }
                    }
                    Intent::AddVolume { target, delta_ml } => match target {
                        Target::All => registry.add_volume_all(delta_ml),
                        Target::One(id) if registry.chamber(id).in_use => {
                            registry.add_volume(id, delta_ml);
                        }
                        Target::One(id) => ignored(presenter, format!("chamber {id} is not in use")),
                    },
                    Intent::SetVolumeZero(target) => match target {
                        Target::All => registry.empty_all_in_use(),
                        Target::One(id) if registry.chamber(id).in_use => registry.empty(id),
                        Target::One(id) => ignored(presenter, format!("chamber {id} is not in use")),
                    },
                    Intent::StartExchange(target) => {
                        let ids = match target {
                            Target::One(id) => vec![id],
                            Target::All => registry.in_use(),
                        };
                        for id in ids {
                            if !registry.chamber(id).in_use {
                                ignored(presenter, format!("chamber {id} is not in use"));
                            } else if sequencer.current().is_some_and(|(busy, _)| busy == id) {
                                ignored(presenter, format!("chamber {id} is already exchanging"));
                            } else {
                                queue.insert(id);
                            }
                        }
                    }
                    Intent::Acknowledge => awaiting_ack = None,
                    other => ignored(presenter, format!("{other:?} is not available while running")),
                }
            }

            let now = clock.now();

            if sequencer.is_idle() && awaiting_ack.is_none() {
                if let Some(id) = queue.pop_first() {
                    match sequencer.begin(registry, id) {
                        Begin::Started => {}
                        Begin::InsufficientVolume {
                            volume_ml,
                            required_ml,
                        } => {
                            awaiting_ack = Some(id);
                            presenter.notify(Notice::InsufficientVolume {
                                id,
                                volume_ml,
                                required_ml,
                            });
                        }
                        Begin::NotInUse => ignored(presenter, format!("chamber {id} is not in use")),
                        Begin::Busy(_) => {
                            queue.insert(id);
                        }
                    }
                }
            }

            match sequencer.tick(registry, now)? {
                Tick::PhaseStarted {
                    id,
                    phase,
                    duration,
                    source,
                } => presenter.notify(Notice::PhaseStarted {
                    id,
                    phase,
                    duration,
                    source,
                }),
                Tick::Completed {
                    id,
                    removed_ml,
                    volume_ml,
                } => presenter.notify(Notice::ExchangeCompleted {
                    id,
                    removed_ml,
                    volume_ml,
                }),
                Tick::Idle | Tick::Working { .. } => {}
            }

            if scheduler.poll(now) {
                presenter.render(&StatusSnapshot::capture(
                    registry,
                    Stage::Monitoring,
                    Some(ctx.start_time),
                    scheduler.heartbeat().indicator_on,
                    now,
                ));
            }
        }
    }
}
