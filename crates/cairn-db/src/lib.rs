//! SQLite plumbing for the lineage store.
//!
//! A pooled connection factory ([`create_pool`]) that puts file databases in
//! WAL mode, and [`run_migrations`], which applies the embedded provenance
//! schema (`entities`, `activities`, `used`, `was_generated_by`,
//! `was_derived_from`) once per database.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
