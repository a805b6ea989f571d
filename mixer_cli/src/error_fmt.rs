//! Human-readable error descriptions for operators.

/// Map an eyre::Report to a human-readable explanation with likely causes
/// and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use mixer_core::{BuildError, MixerError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML, or a run-on state file from a different valve layout.\nHow to fix: Edit the config file (or delete the stale state file), then rerun."
            ),
        };
    }

    if let Some(me) = err.downcast_ref::<MixerError>() {
        return match me {
            MixerError::Timeout => {
                "What happened: The load cell did not answer within the configured timeout.\nLikely causes: HX711 not wired correctly, no power/ground, or engine.sensor_timeout_ms too low.\nHow to fix: Verify DT/SCK pins and power, or raise engine.sensor_timeout_ms in the config.".to_string()
            }
            MixerError::UnknownValve(v) => format!(
                "What happened: An ingredient references valve index {v}, which the rig does not have.\nLikely causes: Catalog valve numbers out of step with pins.valve_pins.\nHow to fix: Fix the 'valve' column in the ingredient CSV or extend pins.valve_pins."
            ),
            MixerError::JobSource(msg) => format!(
                "What happened: The job source rejected a request ({msg}).\nLikely causes: A recipe references an ingredient missing from the catalog, or the queue item disappeared.\nHow to fix: Check the recipe book and ingredient CSV against each other."
            ),
            MixerError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or catalog load
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("headers 'id,name,valve'") || lower.contains("invalid csv row") {
        return format!(
            "What happened: The ingredient catalog did not parse.\nDetail: {msg}\nHow to fix: The CSV needs the exact header 'id,name,valve' and 1-based valve numbers (0 = hand-poured)."
        );
    }
    if lower.contains("recipe") && (lower.contains("parse") || lower.contains("duplicate")) {
        return format!(
            "What happened: The recipe book did not parse.\nDetail: {msg}\nHow to fix: Each [[recipe]] needs id, name and a parts array of {{ ingredient, amount_ml }} tables."
        );
    }
    if lower.contains("read config") || lower.contains("no such file") {
        return format!(
            "What happened: A required file could not be read.\nDetail: {msg}\nHow to fix: Check the --config/--ingredients/--recipes paths."
        );
    }

    format!("What happened: {msg}\nHow to fix: Re-run with --log-level=debug for more detail.")
}
