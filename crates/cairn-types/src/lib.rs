//! Shared types, error definitions, and content identity for cairn.
//!
//! This crate provides the foundational contracts used across all cairn
//! crates: the [`Event`] and [`Command`] traits that application enums
//! implement, the [`ValidationError`] raised when a malformed fact is
//! constructed, and the canonical serialization plus SHA-256 content hash
//! that give every event a deterministic identity.
//!
//! No crate in the workspace depends on anything *except* `cairn-types` for
//! cross-cutting type definitions.

mod canonical;

pub use canonical::{canonical_json, canonical_value, CanonicalEvent, ContentHash};

use serde::Serialize;
use thiserror::Error;

/// Errors raised when a fact is rejected before it enters any queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// An event or command declared an empty type name.
    #[error("type name cannot be empty")]
    EmptyTypeName,

    /// A type name contains characters that cannot be stored in the chain.
    #[error("invalid type name '{0}': only ASCII letters, digits, '_', '-', '.' and ':' are allowed")]
    InvalidTypeName(String),

    /// The value could not be serialized to JSON.
    #[error("'{event_type}' is not serializable: {reason}")]
    Unserializable {
        /// The type name of the offending value.
        event_type: String,
        /// The serializer's message.
        reason: String,
    },

    /// A content hash string is not 64 lowercase hex characters.
    #[error("invalid content hash '{0}'")]
    InvalidHash(String),

    /// Domain validation rejected the value.
    #[error("'{event_type}' rejected: {reason}")]
    Rejected {
        /// The type name of the rejected value.
        event_type: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ValidationError {
    /// Convenience constructor for domain validation failures.
    pub fn rejected(event_type: &str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            event_type: event_type.to_string(),
            reason: reason.into(),
        }
    }
}

/// An immutable typed fact.
///
/// Applications model their facts as a closed enum and implement this trait
/// on it. Dispatch is keyed by [`Event::event_type`], a stable string
/// discriminant, so the enum should serialize to the variant's own fields.
/// `#[serde(untagged)]` over newtype variants gives exactly that:
///
/// ```rust
/// use cairn_types::Event;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Msg {
///     text: String,
/// }
///
/// #[derive(Debug, Clone, Serialize)]
/// #[serde(untagged)]
/// enum AppEvent {
///     Msg(Msg),
/// }
///
/// impl Event for AppEvent {
///     fn event_type(&self) -> &'static str {
///         match self {
///             Self::Msg(_) => "Msg",
///         }
///     }
/// }
/// ```
pub trait Event: Serialize + std::fmt::Debug + 'static {
    /// The variant name, used as the dispatch key and the chain's `event_type`.
    fn event_type(&self) -> &'static str;

    /// Domain validation run when the event is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Rejected`] (or any other variant) when the
    /// event must not enter a queue.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// An intent handled by procedures in the reactor loop.
pub trait Command: std::fmt::Debug + 'static {
    /// The variant name, used as the dispatch key.
    fn command_type(&self) -> &'static str;

    /// Domain validation run when the command is submitted.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the command must not be queued.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Checks that a type name is safe to use as a dispatch key and chain column.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyTypeName`] for an empty name and
/// [`ValidationError::InvalidTypeName`] when it contains anything other than
/// ASCII alphanumerics, `_`, `-`, `.` or `:`.
pub fn validate_type_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyTypeName);
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if !valid {
        return Err(ValidationError::InvalidTypeName(name.to_string()));
    }
    Ok(())
}
