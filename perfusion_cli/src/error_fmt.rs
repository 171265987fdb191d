//! Operator-facing error text, exit codes and the JSON error line.

use perfusion_core::error::{BuildError, PerfusionError};
use perfusion_hardware::error::HwError;

/// Explain a failure: what happened, likely causes, how to fix.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingOutputs => {
                "What happened: No digital outputs were provided to the controller.\nLikely causes: The output backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the outputs are created successfully and passed via with_outputs(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/perfusion.toml for a sample."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<PerfusionError>() {
        return match pe {
            PerfusionError::Config(msg) => format!(
                "What happened: Configuration rejected: {msg}.\nLikely causes: A typo or out-of-range value in the TOML or calibration CSV.\nHow to fix: Fix the file named above and rerun."
            ),
            PerfusionError::Hardware(msg) | PerfusionError::HardwareFault(msg) => format!(
                "What happened: An output line could not be driven ({msg}).\nLikely causes: Wrong BCM pin numbers, missing GPIO permissions, or a wiring fault.\nHow to fix: Check [pins] in the config and GPIO access, then rerun `perfusion self-check`."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if err.downcast_ref::<HwError>().is_some() {
        return format!(
            "What happened: Failed to initialize output pins ({err}).\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process has permission to access GPIO."
        );
    }

    // String-based heuristics for errors coming from init
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config file") {
        return format!(
            "What happened: {msg}.\nLikely causes: Wrong --config path.\nHow to fix: Pass --config FILE or run from the directory containing etc/perfusion.toml."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 for configuration, 3 for hardware, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<HwError>().is_some() {
        return 3;
    }
    match err.downcast_ref::<PerfusionError>() {
        Some(PerfusionError::Config(_)) => 2,
        Some(PerfusionError::Hardware(_) | PerfusionError::HardwareFault(_)) => 3,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match exit_code_for_error(err) {
        2 => "Config",
        3 => "Hardware",
        _ => "Error",
    }
}

/// One JSON line describing a fatal error, for `--json`.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "type": "error",
        "reason": reason_name(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn config_errors_exit_with_two() {
        let err = eyre::Report::new(PerfusionError::Config("target_ml must be > 0".into()))
            .wrap_err("load config");
        assert_eq!(exit_code_for_error(&err), 2);
        assert!(humanize(&err).contains("target_ml must be > 0"));
    }

    #[test]
    fn hardware_errors_exit_with_three() {
        let err: eyre::Result<()> =
            Err(HwError::Gpio("permission denied".into())).wrap_err("open output pins");
        let err = err.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Hardware");
    }

    #[test]
    fn unknown_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: boom"));
    }
}
