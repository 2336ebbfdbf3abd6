//! Wiring of the event store, lineage store, and engines from [`Config`].

use cairn_engine::Engine;
use cairn_lineage::{instrumentation_engine, LineageError, LineageStore};
use cairn_reactor::Reactor;
use cairn_store::{EventStore, StoreError};
use cairn_types::{Command, Event};
use thiserror::Error;

use crate::config::Config;

/// Errors that can occur while opening a [`Runtime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The lineage database could not be opened or migrated.
    #[error(transparent)]
    Lineage(#[from] LineageError),

    /// The event store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An open event store (as writer) plus an open lineage store.
pub struct Runtime {
    store: EventStore,
    lineage: LineageStore,
}

impl Runtime {
    /// Opens the lineage database (running migrations) and the event store.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Lineage` if the lineage database cannot be
    /// opened, or `RuntimeError::Store` if the event store cannot be opened
    /// (including when another writer holds it).
    pub fn open(config: &Config) -> Result<Self, RuntimeError> {
        let lineage = LineageStore::open(&config.lineage.path, config.lineage.db_settings())?;
        let store = EventStore::open(&config.store.path)?;
        tracing::info!(
            store = %config.store.path,
            lineage = %config.lineage.path,
            "cairn runtime opened"
        );
        Ok(Self { store, lineage })
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EventStore {
        &mut self.store
    }

    pub fn lineage(&self) -> &LineageStore {
        &self.lineage
    }

    /// A fresh engine whose lineage is persisted to this runtime's lineage
    /// store.
    pub fn instrumented_engine<E: Event>(&self) -> Engine<E> {
        Engine::new().with_instrumentation(instrumentation_engine(&self.lineage))
    }

    /// Hands the event store to a new reactor. The lineage store is returned
    /// alongside for the caller to keep.
    pub fn into_reactor<C, E, D>(self, deps: D) -> (Reactor<C, E, D>, LineageStore)
    where
        C: Command,
        E: Event,
    {
        (Reactor::new(self.store, deps), self.lineage)
    }
}
