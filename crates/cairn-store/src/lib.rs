//! Content-addressable, append-only event log on the local filesystem.
//!
//! Each distinct event is stored once as canonical JSON under
//! `events/<hash[0:2]>/<hash>.json`, named by the same content hash the
//! dispatch engine uses as its lineage entity id. Every observation, repeats
//! included, appends a row to `chain.csv`. Reading the chain back through a
//! [`TypeRegistry`] yields the full history in append order.
//!
//! A single [`EventStore::open`] writer may hold a store at a time; any
//! number of [`EventStore::open_read_only`] readers may inspect it.

mod error;
mod registry;
mod store;

pub use error::StoreError;
pub use registry::TypeRegistry;
pub use store::{ChainEntry, ChainRow, EventStore, StoredEventRecord, VerifyReport, CHAIN_HEADER};
