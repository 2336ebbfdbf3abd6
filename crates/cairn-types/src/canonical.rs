//! Canonical JSON serialization and SHA-256 content identity.
//!
//! `hash(E) = sha256(type_name(E) ‖ canonical_json(E))`, lowercase hex.
//! Canonical JSON sorts object keys at every depth and drops `null` members
//! so that unset optional fields never influence identity.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{validate_type_name, Event, ValidationError};

/// Lowercase hex SHA-256 identity of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes a type name followed by an already canonical JSON body.
    pub fn of(type_name: &str, canonical_json: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(type_name.as_bytes());
        hasher.update(canonical_json.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parses a hash read back from storage.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidHash`] unless `s` is exactly 64
    /// lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let well_formed =
            s.len() == 64 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(ValidationError::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-character shard directory used by the event store.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Serializes `value` and rewrites it into canonical form.
///
/// # Errors
///
/// Returns the serializer's error when `value` cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    Ok(canonicalize(serde_json::to_value(value)?))
}

/// Serializes `value` to its canonical JSON string.
///
/// # Errors
///
/// Returns the serializer's error when `value` cannot be represented as JSON.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonical_value(value)?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// An event's type name, canonical JSON, and content hash, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    event_type: &'static str,
    json: String,
    hash: ContentHash,
}

impl CanonicalEvent {
    /// Validates and canonicalizes an event.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the type name is invalid, the event's
    /// own [`Event::validate`] rejects it, or it cannot be serialized.
    pub fn of<E: Event>(event: &E) -> Result<Self, ValidationError> {
        let event_type = event.event_type();
        validate_type_name(event_type)?;
        event.validate()?;

        let json = canonical_json(event).map_err(|e| ValidationError::Unserializable {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })?;
        let hash = ContentHash::of(event_type, &json);

        Ok(Self {
            event_type,
            json,
            hash,
        })
    }

    /// The event's type name.
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// The canonical JSON body.
    pub fn json(&self) -> &str {
        &self.json
    }

    /// The content hash.
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }
}
