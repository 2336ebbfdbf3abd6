//! Error types for the lineage store.

/// Errors that can occur while recording or querying lineage.
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    /// A database operation failed.
    #[error("lineage database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be checked out.
    #[error("lineage connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The pool could not be created.
    #[error(transparent)]
    PoolInit(#[from] cairn_db::PoolError),

    /// Schema migrations failed.
    #[error(transparent)]
    Migration(#[from] cairn_db::MigrationError),

    /// JSON serialization or deserialization failed.
    #[error("lineage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
