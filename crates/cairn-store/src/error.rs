//! Error types for the event store.

use std::io;
use std::path::PathBuf;

use cairn_types::ValidationError;

/// Errors that can occur while appending to or reading the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A blob could not be decoded into its registered type.
    #[error("event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another writer holds `chain.lock`.
    #[error("event store at {0:?} is locked by another writer (remove chain.lock if none is running)")]
    Locked(PathBuf),

    /// `append` was called on a store opened with [`crate::EventStore::open_read_only`].
    #[error("event store at {0:?} is open read-only")]
    ReadOnly(PathBuf),

    /// A chain row references a blob that does not exist.
    #[error("chain row {row} references missing blob {hash}")]
    MissingBlob { row: usize, hash: String },

    /// `chain.csv` could not be parsed.
    #[error("malformed chain.csv line {line}: {reason}")]
    MalformedChain { line: usize, reason: String },

    /// The event was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
