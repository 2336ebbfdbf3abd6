//! Event-sourced orchestration core.
//!
//! This crate ties the workspace together: configuration, tracing setup,
//! the read-only [`inspect()`] report, and a [`Runtime`] that opens the
//! event store and lineage database and hands out instrumented engines and
//! reactors. The building blocks are
//! re-exported under short names:
//!
//! - [`types`]: `Event` and `Command` traits, canonical JSON, content hashes
//! - [`engine`]: the dispatch engine and listener contract
//! - [`lineage`]: SQLite provenance graph fed by engine instrumentation
//! - [`store`]: content-addressable append-only event log
//! - [`reactor`]: command/event loop over the event store

pub mod config;
mod inspect;
mod runtime;
mod telemetry;

pub use cairn_engine as engine;
pub use cairn_lineage as lineage;
pub use cairn_reactor as reactor;
pub use cairn_store as store;
pub use cairn_types as types;

pub use config::{load_config, Config, ConfigError};
pub use inspect::{inspect, Inspection};
pub use runtime::{Runtime, RuntimeError};
pub use telemetry::init_tracing;
