//! Ports to the presentation layer: operator intents in, status and
//! notices out.

use std::time::{Duration, Instant};

use perfusion_traits::DigitalOutput;

use crate::estimator::DurationSource;
use crate::registry::{ChamberId, ChamberRegistry, ChamberStatus};
use crate::sequencer::ExchangePhase;
use crate::util::{natural_delta, natural_time, round_tenth};

/// One chamber or every chamber in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    One(ChamberId),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Activate(ChamberId),
    Deactivate(ChamberId),
    SelectAll(bool),
    AddVolume { target: Target, delta_ml: f32 },
    SetVolumeZero(Target),
    StartExchange(Target),
    /// Leave the settings stage. An empty list keeps the current selection.
    ConfirmSettings(Vec<ChamberId>),
    Acknowledge,
    Finish,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    ExperimentStarted(Vec<ChamberId>),
    /// The reservoir holds less than one exchange; nothing was actuated.
    InsufficientVolume {
        id: ChamberId,
        volume_ml: f32,
        required_ml: f32,
    },
    PhaseStarted {
        id: ChamberId,
        phase: ExchangePhase,
        duration: Duration,
        source: DurationSource,
    },
    ExchangeCompleted {
        id: ChamberId,
        removed_ml: f32,
        volume_ml: f32,
    },
    ExchangeCancelled(ChamberId),
    /// The intent does not apply to the current stage or chamber.
    Ignored(String),
    /// The experiment finished; the operator should wash the lines.
    WashPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Settings,
    Monitoring,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChamberView {
    pub id: ChamberId,
    pub in_use: bool,
    pub status: ChamberStatus,
    /// e.g. "3 minutes ago"; `None` while unused.
    pub last_changed: Option<String>,
    /// Rounded to 0.1 mL.
    pub media_volume_ml: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub stage: Stage,
    /// Time since the experiment started, e.g. "2 hours".
    pub runtime: Option<String>,
    pub heartbeat_on: bool,
    pub chambers: Vec<ChamberView>,
}

impl StatusSnapshot {
    pub fn capture<O: DigitalOutput>(
        registry: &ChamberRegistry<O>,
        stage: Stage,
        started: Option<Instant>,
        heartbeat_on: bool,
        now: Instant,
    ) -> Self {
        let chambers = registry
            .chambers()
            .iter()
            .map(|c| ChamberView {
                id: c.id,
                in_use: c.in_use,
                status: c.status,
                last_changed: c
                    .last_changed
                    .map(|t| natural_time(now.saturating_duration_since(t))),
                media_volume_ml: round_tenth(c.media_volume_ml),
            })
            .collect();
        Self {
            stage,
            runtime: started.map(|t| natural_delta(now.saturating_duration_since(t))),
            heartbeat_on,
            chambers,
        }
    }
}

/// Renders status and surfaces notices to the operator.
pub trait Presenter {
    fn render(&mut self, snapshot: &StatusSnapshot);
    fn notify(&mut self, notice: Notice);
}

/// Source of operator intents.
pub trait IntentSource {
    /// Wait up to `timeout` for the next intent.
    fn poll(&mut self, timeout: Duration) -> Option<Intent>;

    /// True once no further intents can arrive.
    fn is_closed(&self) -> bool {
        false
    }
}
