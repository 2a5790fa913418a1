//! Human-readable error descriptions and structured JSON error formatting.

/// Map an eyre::Report to a human-readable explanation with likely causes and
/// fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use sorter_core::error::{BuildError, ParcelError, PlanError, SorterError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingDrive => {
                "What happened: No main-line drive was provided.\nLikely causes: Drive port failed to initialize or was not wired in.\nHow to fix: Ensure the drive is created successfully before starting the line.".to_string()
            }
            BuildError::MissingChuteBank => {
                "What happened: No chute actuator bank was provided.\nLikely causes: Actuator port failed to initialize or was not wired in.\nHow to fix: Ensure the chute bank is created successfully before starting the line.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See README for a sample."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<SorterError>() {
        if matches!(se, SorterError::Timeout) {
            return "What happened: A sensor or drive read timed out.\nLikely causes: Wiring or fieldbus problems, or a timeout configured too low.\nHow to fix: Verify sensor wiring and power, and consider raising the relevant timeout in the config.".to_string();
        }
        return format!(
            "What happened: {se}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    if let Some(pe) = err.downcast_ref::<PlanError>() {
        return format!(
            "What happened: Eject planning failed ({pe}).\nLikely causes: The cart ring is not learned yet, or the topology does not list the target chute.\nHow to fix: Wait for ring discovery to finish and check [topology] in the config."
        );
    }

    if let Some(pe) = err.downcast_ref::<ParcelError>() {
        return format!(
            "What happened: A parcel operation was rejected ({pe}).\nLikely causes: Duplicate binding or a transition from a terminal state.\nHow to fix: This is an upstream sequencing problem; check the rule-engine side."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("invalid configuration") || lower.contains("must be") {
        return "What happened: Configuration is invalid or incomplete.\nLikely causes: Missing [topology] chutes, out-of-range PID values, or bad deadbands.\nHow to fix: Edit the TOML config and try again.".to_string();
    }

    if lower.contains("gpio") {
        return "What happened: Failed to initialize sensor pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the pin values; ensure the process has permission to access GPIO.".to_string();
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

/// Stable exit codes per error family; generic errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use sorter_core::error::{BuildError, PlanError, SorterError};
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    if let Some(se) = err.downcast_ref::<SorterError>() {
        return match se {
            SorterError::Timeout => 3,
            SorterError::Hardware(_) | SorterError::HardwareFault(_) => 4,
            SorterError::Config(_) => 2,
            SorterError::State(_) => 5,
        };
    }
    if err.downcast_ref::<PlanError>().is_some() {
        return 6;
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    use sorter_core::error::{BuildError, PlanError, SorterError};

    let reason = if err.downcast_ref::<BuildError>().is_some() {
        "InvalidConfig"
    } else if let Some(se) = err.downcast_ref::<SorterError>() {
        match se {
            SorterError::Timeout => "Timeout",
            SorterError::Hardware(_) | SorterError::HardwareFault(_) => "Hardware",
            SorterError::Config(_) => "InvalidConfig",
            SorterError::State(_) => "State",
        }
    } else if err.downcast_ref::<PlanError>().is_some() {
        "Planning"
    } else {
        "Error"
    };

    json!({ "reason": reason, "message": humanize(err) }).to_string()
}
