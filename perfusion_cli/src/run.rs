//! Config mapping, hardware assembly, and command execution.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use eyre::{Result, WrapErr};
use perfusion_config::{Config, FlowCalibration};
use perfusion_core::error::PerfusionError;
use perfusion_core::{
    ChamberId, ChamberRegistry, ChannelIntents, CoreConfig, Direction, DurationPolicy, Exit,
    ExperimentController, FlowRates, Intent, Line, PinMap, estimate,
};
use perfusion_traits::{DigitalOutput, MonotonicClock};
use serde_json::json;

use crate::cli::FlowArg;
use crate::console::{ConsolePresenter, spawn_reader};

/// Read, parse and validate the TOML config.
pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config file {}", path.display()))?;
    let cfg = perfusion_config::load_toml(&text)
        .map_err(|e| PerfusionError::Config(format!("{}: {e}", path.display())))?;
    cfg.validate()
        .map_err(|e| PerfusionError::Config(format!("{}: {e:#}", path.display())))?;
    Ok(cfg)
}

/// Load the optional calibration CSV; a file on the command line wins over
/// rates persisted in the config.
pub fn load_calibration(path: Option<&Path>, cfg: &Config) -> Result<Option<FlowCalibration>> {
    match path {
        Some(p) => {
            let cal = perfusion_config::load_calibration_csv(p)
                .map_err(|e| PerfusionError::Config(format!("{e:#}")))?;
            tracing::info!(
                remove_ml_per_s = cal.remove_ml_per_s,
                add_ml_per_s = cal.add_ml_per_s,
                path = %p.display(),
                "flow calibration loaded"
            );
            Ok(Some(cal))
        }
        None => Ok(cfg.calibration),
    }
}

pub fn core_config(cfg: &Config, calibration: Option<&FlowCalibration>) -> Result<CoreConfig> {
    let mut core = CoreConfig::try_from(cfg)?;
    if let Some(c) = calibration {
        core.estimator.calibration = Some(FlowRates::from(c));
    }
    Ok(core)
}

/// Open the output backend for the configured pins.
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open_outputs(pins: &PinMap) -> Result<Box<dyn DigitalOutput>> {
    let pins: Vec<u8> = pins.all_pins().collect();
    let gpio = perfusion_hardware::GpioOutputs::open(&pins).wrap_err("open output pins")?;
    tracing::info!(count = pins.len(), "GPIO outputs opened");
    Ok(Box::new(gpio))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open_outputs(_pins: &PinMap) -> Result<Box<dyn DigitalOutput>> {
    tracing::info!("using simulated outputs");
    Ok(Box::new(perfusion_hardware::SimulatedOutputs::new()))
}

pub fn backend_name() -> &'static str {
    if cfg!(all(feature = "hardware", target_os = "linux")) {
        "gpio"
    } else {
        "simulated"
    }
}

pub fn run_experiments(
    core: CoreConfig,
    outputs: Box<dyn DigitalOutput>,
    preselect: &[u8],
    shutdown: Arc<AtomicBool>,
    json: bool,
) -> Result<Exit> {
    let preselect = preselect
        .iter()
        .map(|&n| {
            ChamberId::new(n).ok_or_else(|| {
                PerfusionError::Config(format!("--chambers: chamber must be 1-8, got {n}"))
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut controller = ExperimentController::builder()
        .with_outputs(outputs)
        .with_config(core)
        .with_shutdown_flag(shutdown)
        .try_build()?;

    let (tx, mut intents) = ChannelIntents::pair();
    for id in preselect {
        tx.send(Intent::Activate(id)).wrap_err("queue preselection")?;
    }
    let _reader = spawn_reader(std::io::BufReader::new(std::io::stdin()), tx);
    let mut presenter = ConsolePresenter::stdout(json);

    let exit = controller.run(&mut intents, &mut presenter)?;
    tracing::info!(?exit, "controller stopped");
    Ok(exit)
}

pub fn run_estimate(core: &CoreConfig, volume_ml: f32, direction: FlowArg, json: bool) -> Result<()> {
    if !(volume_ml.is_finite() && volume_ml >= 0.0) {
        eyre::bail!("--volume must be a finite number >= 0");
    }
    let direction = match direction {
        FlowArg::Remove => Direction::Remove,
        FlowArg::Add => Direction::Add,
    };
    let target = core.exchange.target_ml;
    let model = estimate(&core.estimator, target, volume_ml, direction, |_| {});
    let (duration, source) =
        DurationPolicy::for_direction(&core.estimator, direction).resolve(target, &model);

    if json {
        println!(
            "{}",
            json!({
                "direction": format!("{direction:?}").to_ascii_lowercase(),
                "volume_ml": volume_ml,
                "target_ml": target,
                "model": {
                    "steps": model.steps,
                    "duration_ms": model.duration.as_millis() as u64,
                    "volume_moved_ml": model.volume_moved_ml,
                },
                "duration_ms": duration.as_millis() as u64,
                "source": source.as_str(),
            })
        );
    } else {
        println!(
            "{direction:?}: model {} steps, {:.1} s, moves {:.1} mL; drive {:.1} s ({})",
            model.steps,
            model.duration.as_secs_f32(),
            model.volume_moved_ml,
            duration.as_secs_f32(),
            source.as_str()
        );
    }
    Ok(())
}

/// Pulse every line once: remove then add, chamber by chamber.
pub fn self_check(core: &CoreConfig, outputs: Box<dyn DigitalOutput>, json: bool) -> Result<()> {
    let mut registry = ChamberRegistry::new(core.pins.clone(), outputs, Arc::new(MonotonicClock::new()));
    registry.reset_all().wrap_err("initial de-energize")?;
    let mut lines = 0u32;
    for id in ChamberId::all() {
        for line in [Line::Remove, Line::Add] {
            registry.drive(id, line, true)?;
            registry.drive(id, line, false)?;
            lines += 1;
        }
    }
    registry.reset_all()?;
    tracing::info!(lines, backend = backend_name(), "self-check passed");
    if json {
        println!("{}", json!({ "ok": true, "lines": lines, "backend": backend_name() }));
    } else {
        println!("self-check ok: {lines} lines ({})", backend_name());
    }
    Ok(())
}
