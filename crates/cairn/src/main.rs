//! `cairn` binary: integrity report for an event store and its lineage
//! database.
//!
//! Opens the store read-only (so it is safe to run next to a live writer),
//! cross-checks `chain.csv` against the blob directory, counts the lineage
//! relations if a lineage database exists, and prints the result as JSON.
//! Exits with status 1 when a chain row points at a missing or corrupt blob,
//! and 2 when the inspection itself fails.

use std::process::ExitCode;

use cairn::config::{load_config, resolve_config_path};

fn main() -> ExitCode {
    let (config_path, config_source) =
        resolve_config_path(std::env::args(), |key| std::env::var(key).ok());

    let config = match load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {config_path}: {e}");
            return ExitCode::from(2);
        }
    };

    cairn::init_tracing(&config.logging);
    tracing::info!(
        source = config_source,
        path = %config_path,
        "resolved startup configuration path"
    );

    let inspection = match cairn::inspect(&config) {
        Ok(inspection) => inspection,
        Err(e) => {
            tracing::error!(error = %e, "inspection failed");
            return ExitCode::from(2);
        }
    };

    match serde_json::to_string_pretty(&inspection) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "failed to render inspection report");
            return ExitCode::from(2);
        }
    }

    if inspection.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
