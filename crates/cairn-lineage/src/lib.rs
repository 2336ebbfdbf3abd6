//! Provenance graph storage for instrumented engines.
//!
//! An engine built with [`instrumentation_engine`] as its instrumentation
//! persists every lineage fact it emits into five SQLite relations:
//!
//! | Relation | Meaning |
//! |----------|---------|
//! | `entities` | a fact, keyed by its content hash, with its JSON payload |
//! | `activities` | one listener invocation with timing and optional crash |
//! | `used` | activity consumed entity |
//! | `was_generated_by` | entity was produced by activity |
//! | `was_derived_from` | entity was derived from another entity |
//!
//! Collaborators read the graph through [`LineageStore::get_activity`],
//! [`LineageStore::entities_derived_from`], and
//! [`LineageStore::entities_by_type`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use cairn_engine::Engine;
//! use cairn_lineage::{instrumentation_engine, LineageStore};
//!
//! let lineage = LineageStore::open("lineage.db", Default::default())?;
//! let mut engine = Engine::new().with_instrumentation(instrumentation_engine(&lineage));
//! // subscribe listeners, emit, run ...
//! let crashed = lineage.crashed_activities()?;
//! ```

mod error;
mod recorder;
mod store;

pub use error::LineageError;
pub use recorder::{instrumentation_engine, LineageRecorder};
pub use store::{Activity, Entity, LineageCounts, LineageStore};
