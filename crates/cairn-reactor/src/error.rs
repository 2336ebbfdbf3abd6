//! Error types for the reactor loop.

use cairn_store::StoreError;

/// Errors that stop [`crate::Reactor::run`].
///
/// Procedure and policy failures are not errors here; they are contained and
/// reported in [`crate::ReactorReport::crashes`]. Malformed commands and
/// events are rejected with a `ValidationError` when they are queued, before
/// `run` ever sees them.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    /// An event could not be persisted. The event is left at the head of
    /// the event queue.
    #[error("event store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn store_failures_are_the_only_run_error() {
        let err: ReactorError = StoreError::ReadOnly(PathBuf::from("/data")).into();
        match err {
            ReactorError::Store(StoreError::ReadOnly(path)) => {
                assert_eq!(path, PathBuf::from("/data"));
            }
            ReactorError::Store(other) => panic!("unexpected store error: {other:?}"),
        }

        let locked = ReactorError::from(StoreError::Locked(PathBuf::from("/data")));
        assert!(locked.to_string().starts_with("event store error:"));
    }
}
