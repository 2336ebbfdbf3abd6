//! Read-only integrity report over a configured store and lineage database.

use std::path::Path;

use cairn_lineage::{LineageCounts, LineageStore};
use cairn_store::{EventStore, VerifyReport};
use serde::Serialize;

use crate::config::Config;
use crate::runtime::RuntimeError;

/// What [`inspect`] found.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub store_path: String,
    pub store: VerifyReport,
    pub lineage_path: String,
    /// `None` when there is no lineage database file to count.
    pub lineage: Option<LineageCounts>,
}

impl Inspection {
    /// Every chain row resolves to an intact blob.
    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}

/// Verifies the event store without taking its writer lock and counts the
/// lineage relations.
///
/// Nothing is created: a missing store reads as empty and a missing lineage
/// database is reported as `lineage: None`.
///
/// # Errors
///
/// Returns `RuntimeError::Store` if the chain cannot be read or parsed, or
/// `RuntimeError::Lineage` if an existing lineage database cannot be queried.
pub fn inspect(config: &Config) -> Result<Inspection, RuntimeError> {
    let store = EventStore::open_read_only(&config.store.path).verify()?;
    tracing::info!(
        rows = store.rows,
        distinct = store.distinct,
        missing = store.missing_blobs.len(),
        corrupt = store.corrupt_blobs.len(),
        orphans = store.orphan_blobs.len(),
        "verified event store"
    );
    for hash in &store.missing_blobs {
        tracing::warn!(event_hash = %hash, "chain references missing blob");
    }
    for hash in &store.corrupt_blobs {
        tracing::warn!(event_hash = %hash, "blob content does not match its hash");
    }

    let lineage_path = &config.lineage.path;
    let lineage = if lineage_path == ":memory:" || !Path::new(lineage_path).is_file() {
        tracing::info!(path = %lineage_path, "no lineage database to count");
        None
    } else {
        let counts = LineageStore::open(lineage_path, config.lineage.db_settings())?.counts()?;
        tracing::info!(
            entities = counts.entities,
            activities = counts.activities,
            used = counts.used,
            generated = counts.generated,
            derived = counts.derived,
            "lineage graph"
        );
        Some(counts)
    };

    Ok(Inspection {
        store_path: config.store.path.clone(),
        store,
        lineage_path: lineage_path.clone(),
        lineage,
    })
}
