#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Chamber control core (hardware-agnostic).
//!
//! All pin writes go through `perfusion_traits::DigitalOutput`; all time
//! comes from `perfusion_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Registry**: chamber records, pin pairs and the output boundary (`registry`)
//! - **Estimator**: stepwise flow model and duration policy (`estimator`)
//! - **Sequencer**: tick-driven remove/add exchange state machine (`sequencer`)
//! - **Scheduler**: status refresh gate and heartbeat (`scheduler`)
//! - **Controller**: settings → monitoring → wash lifecycle (`controller`)
//!
//! The presentation layer plugs in through `Presenter` and `IntentSource`.

pub mod channel;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod estimator;
pub mod hw_error;
pub mod mocks;
pub mod presentation;
pub mod registry;
pub mod scheduler;
pub mod sequencer;
pub mod util;

pub use channel::ChannelIntents;
pub use config::{CoreConfig, EstimatorCfg, ExchangeCfg, FlowRates, PinMap, PinPair, TimingCfg};
pub use controller::{ControllerBuilder, Exit, ExperimentController, RunContext};
pub use error::{BuildError, PerfusionError, Result};
pub use estimator::{Direction, DurationPolicy, DurationSource, Estimate, Estimation, estimate};
pub use presentation::{
    ChamberView, Intent, IntentSource, Notice, Presenter, Stage, StatusSnapshot, Target,
};
pub use registry::{ActuatorGuard, CHAMBERS, Chamber, ChamberId, ChamberRegistry, ChamberStatus, Line};
pub use scheduler::{HeartbeatState, MonitorScheduler, should_refresh};
pub use sequencer::{ActuatorSequencer, Begin, ExchangePhase, ExchangePlan, Tick};
