use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use perfusion_core::mocks::{RecordingPresenter, ScriptedIntents};
use perfusion_core::{
    BuildError, ChamberId, ChannelIntents, ChamberStatus, CoreConfig, ExchangePhase, Exit, ExperimentController,
    Intent, Notice, Presenter, Stage, StatusSnapshot, Target,
};
use perfusion_hardware::{SimProbe, SimulatedOutputs};
use perfusion_traits::clock::test_clock::TestClock;
use rstest::rstest;

fn id(n: u8) -> ChamberId {
    ChamberId::new(n).expect("valid id")
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn fast_config() -> CoreConfig {
    let mut cfg = CoreConfig::default();
    cfg.estimator.remove_override = Some(secs(2));
    cfg.estimator.add_override = Some(secs(2));
    cfg
}

fn controller(
    cfg: CoreConfig,
    clock: &TestClock,
) -> (ExperimentController<SimulatedOutputs>, SimProbe) {
    let outputs = SimulatedOutputs::new();
    let probe = outputs.probe();
    let ctl = ExperimentController::builder()
        .with_outputs(outputs)
        .with_config(cfg)
        .with_clock(Arc::new(clock.clone()))
        .try_build()
        .expect("build controller");
    (ctl, probe)
}

/// Records notices together with the clock offset they arrived at.
struct TimedPresenter {
    clock: TestClock,
    notices: Vec<(Duration, Notice)>,
    snapshots: Vec<StatusSnapshot>,
}

impl TimedPresenter {
    fn new(clock: &TestClock) -> Self {
        Self {
            clock: clock.clone(),
            notices: Vec::new(),
            snapshots: Vec::new(),
        }
    }
}

impl Presenter for TimedPresenter {
    fn render(&mut self, snapshot: &StatusSnapshot) {
        self.snapshots.push(snapshot.clone());
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push((self.clock.offset(), notice));
    }
}

/// Replays writes and fails if two lines are ever active at once.
fn assert_never_overlaps(probe: &SimProbe) {
    let mut active: BTreeSet<u8> = BTreeSet::new();
    for (pin, on) in probe.history() {
        if on {
            active.insert(pin);
        } else {
            active.remove(&pin);
        }
        assert!(active.len() <= 1, "lines {active:?} active together");
    }
}

#[test]
fn batch_exchange_runs_in_ascending_order_without_overlap() {
    let clock = TestClock::new();
    let cfg = fast_config();
    let pins = cfg.pins.clone();
    let (mut ctl, probe) = controller(cfg, &clock);
    let mut intents = ScriptedIntents::new(clock.clone())
        .at(secs(0), Intent::ConfirmSettings(vec![id(7), id(1), id(4)]))
        .at(secs(1), Intent::AddVolume { target: Target::All, delta_ml: 50.0 })
        .at(secs(2), Intent::StartExchange(Target::All))
        .at(secs(90), Intent::Finish)
        .at(secs(91), Intent::Finish);
    let mut presenter = RecordingPresenter::default();

    let exit = ctl.run(&mut intents, &mut presenter).expect("run");

    assert_eq!(exit, Exit::Quit);
    assert_eq!(intents.remaining(), 0);
    let completed: Vec<u8> = presenter
        .notices
        .iter()
        .filter_map(|n| match n {
            Notice::ExchangeCompleted { id, volume_ml, .. } => {
                assert!(*volume_ml < 20.0 + 1e-3 && *volume_ml >= 0.0);
                Some(id.get())
            }
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![1, 4, 7]);

    let energised: Vec<u8> = probe
        .transitions()
        .into_iter()
        .filter_map(|(pin, on)| on.then_some(pin))
        .collect();
    let expected: Vec<u8> = [1usize, 4, 7]
        .iter()
        .flat_map(|n| [pins.0[n - 1].remove_pin, pins.0[n - 1].add_pin])
        .collect();
    assert_eq!(energised, expected);
    assert_never_overlaps(&probe);
    assert!(probe.active_pins().is_empty());
    assert!(presenter.notices.contains(&Notice::WashPrompt));
}

#[test]
fn insufficient_volume_holds_the_queue_until_acknowledged() {
    let clock = TestClock::new();
    let (mut ctl, probe) = controller(fast_config(), &clock);
    let mut intents = ScriptedIntents::new(clock.clone())
        .at(secs(0), Intent::ConfirmSettings(vec![id(2), id(3)]))
        .at(secs(1), Intent::AddVolume { target: Target::One(id(3)), delta_ml: 40.0 })
        .at(secs(2), Intent::StartExchange(Target::All))
        .at(secs(10), Intent::Acknowledge)
        .at(secs(30), Intent::Finish)
        .at(secs(31), Intent::Finish);
    let mut presenter = TimedPresenter::new(&clock);

    ctl.run(&mut intents, &mut presenter).expect("run");

    let refused = presenter
        .notices
        .iter()
        .find(|(_, n)| matches!(n, Notice::InsufficientVolume { .. }))
        .expect("insufficient volume notice");
    assert_eq!(
        refused.1,
        Notice::InsufficientVolume {
            id: id(2),
            volume_ml: 0.0,
            required_ml: 30.0
        }
    );
    let started = presenter
        .notices
        .iter()
        .find(|(_, n)| matches!(n, Notice::PhaseStarted { id: c, .. } if *c == id(3)))
        .expect("chamber 3 starts after acknowledge");
    assert!(started.0 >= secs(10), "started at {:?}", started.0);
    let pins2 = ctl.registry().pins(id(2));
    assert!(!probe.history().contains(&(pins2.remove_pin, true)));
}

#[test]
fn shutdown_flag_cancels_mid_exchange_and_releases() {
    struct TripOnRemove {
        flag: Arc<AtomicBool>,
        notices: Vec<Notice>,
    }
    impl Presenter for TripOnRemove {
        fn render(&mut self, _snapshot: &StatusSnapshot) {}
        fn notify(&mut self, notice: Notice) {
            if matches!(notice, Notice::PhaseStarted { phase: ExchangePhase::Removing, .. }) {
                self.flag.store(true, Ordering::Relaxed);
            }
            self.notices.push(notice);
        }
    }

    let clock = TestClock::new();
    let flag = Arc::new(AtomicBool::new(false));
    let outputs = SimulatedOutputs::new();
    let probe = outputs.probe();
    let mut ctl = ExperimentController::builder()
        .with_outputs(outputs)
        .with_config(fast_config())
        .with_clock(Arc::new(clock.clone()))
        .with_shutdown_flag(Arc::clone(&flag))
        .try_build()
        .expect("build controller");
    let mut intents = ScriptedIntents::new(clock.clone())
        .at(secs(0), Intent::ConfirmSettings(vec![id(5)]))
        .at(secs(1), Intent::AddVolume { target: Target::One(id(5)), delta_ml: 35.0 })
        .at(secs(2), Intent::StartExchange(Target::One(id(5))));
    let mut presenter = TripOnRemove {
        flag,
        notices: Vec::new(),
    };

    let exit = ctl.run(&mut intents, &mut presenter).expect("run");

    assert_eq!(exit, Exit::Shutdown);
    assert!(presenter.notices.contains(&Notice::ExchangeCancelled(id(5))));
    assert!(probe.active_pins().is_empty());
    assert!(ctl.registry().chambers().iter().all(|c| c.status == ChamberStatus::Unused));
}

#[test]
fn closed_input_stops_like_shutdown() {
    let clock = TestClock::new();
    let (mut ctl, probe) = controller(fast_config(), &clock);
    let (tx, mut intents) = ChannelIntents::pair();
    tx.send(Intent::ConfirmSettings(vec![id(1)])).expect("send");
    tx.send(Intent::AddVolume { target: Target::One(id(1)), delta_ml: 40.0 }).expect("send");
    tx.send(Intent::StartExchange(Target::One(id(1)))).expect("send");
    drop(tx);
    let mut presenter = RecordingPresenter::default();

    assert_eq!(ctl.run(&mut intents, &mut presenter).expect("run"), Exit::InputClosed);
    assert!(probe.active_pins().is_empty());
    assert!(ctl.registry().chambers().iter().all(|c| !c.in_use));
}

#[test]
fn cancel_in_settings_resets_and_starts_over() {
    let clock = TestClock::new();
    let (mut ctl, probe) = controller(CoreConfig::default(), &clock);
    let writes = probe.history().len();
    let mut intents = ScriptedIntents::new(clock.clone())
        .at(secs(0), Intent::Activate(id(1)))
        .at(secs(1), Intent::Cancel)
        .at(secs(2), Intent::Activate(id(2)))
        .at(secs(3), Intent::Finish);
    let mut presenter = RecordingPresenter::default();

    assert_eq!(ctl.run(&mut intents, &mut presenter).expect("run"), Exit::Quit);
    assert_eq!(intents.remaining(), 0);
    assert!(probe.history()[writes..].iter().all(|(_, on)| !on));
    assert!(presenter.snapshots.iter().all(|s| s.stage == Stage::Settings));
    // the cancel reset pass wipes chamber 1 before chamber 2 is picked
    let last = presenter.snapshots.last().expect("snapshot");
    assert!(!last.chambers[0].in_use);
    assert!(last.chambers[1].in_use);
    assert!(!presenter.notices.iter().any(|n| matches!(n, Notice::ExperimentStarted(_))));
}

#[test]
fn confirming_with_nothing_selected_is_refused() {
    let clock = TestClock::new();
    let (mut ctl, _probe) = controller(CoreConfig::default(), &clock);
    let mut intents = ScriptedIntents::new(clock.clone())
        .at(secs(0), Intent::SelectAll(true))
        .at(secs(1), Intent::SelectAll(false))
        .at(secs(2), Intent::ConfirmSettings(Vec::new()))
        .at(secs(3), Intent::Finish);
    let mut presenter = RecordingPresenter::default();

    ctl.run(&mut intents, &mut presenter).expect("run");
    assert!(presenter.notices.iter().any(|n| matches!(n, Notice::Ignored(_))));
    assert!(!presenter.notices.iter().any(|n| matches!(n, Notice::ExperimentStarted(_))));
}

#[test]
fn monitoring_snapshots_refresh_on_the_interval() {
    let clock = TestClock::new();
    let (mut ctl, _probe) = controller(CoreConfig::default(), &clock);
    let mut intents = ScriptedIntents::new(clock.clone())
        .at(secs(0), Intent::ConfirmSettings(vec![id(3)]))
        .at(secs(1), Intent::AddVolume { target: Target::One(id(3)), delta_ml: 12.34 })
        .at(secs(125), Intent::Finish)
        .at(secs(126), Intent::Finish);
    let mut presenter = RecordingPresenter::default();

    ctl.run(&mut intents, &mut presenter).expect("run");

    let monitoring: Vec<&StatusSnapshot> = presenter
        .snapshots
        .iter()
        .filter(|s| s.stage == Stage::Monitoring)
        .collect();
    // initial render plus one per second
    assert!((125..=127).contains(&monitoring.len()), "{} snapshots", monitoring.len());
    assert!(monitoring.windows(2).all(|w| w[0].heartbeat_on != w[1].heartbeat_on));
    let last = monitoring.last().expect("snapshot");
    assert_eq!(last.runtime.as_deref(), Some("2 minutes"));
    let c3 = &last.chambers[2];
    assert_eq!(c3.media_volume_ml, 12.3);
    assert_eq!(c3.last_changed.as_deref(), Some("2 minutes ago"));
    assert!(last.chambers[0].last_changed.is_none());
}

#[rstest]
#[case::zero_target({ let mut c = CoreConfig::default(); c.exchange.target_ml = 0.0; c })]
#[case::zero_floor({ let mut c = CoreConfig::default(); c.estimator.min_step_ml = 0.0; c })]
#[case::zero_poll({ let mut c = CoreConfig::default(); c.timing.poll = Duration::ZERO; c })]
fn builder_rejects_degenerate_config(#[case] cfg: CoreConfig) {
    let err = ExperimentController::builder()
        .with_outputs(SimulatedOutputs::new())
        .with_config(cfg)
        .try_build()
        .expect_err("invalid config must fail");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[test]
fn builder_requires_outputs() {
    let err = ExperimentController::<SimulatedOutputs>::builder()
        .try_build()
        .expect_err("outputs are required");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingOutputs)
    ));
}
