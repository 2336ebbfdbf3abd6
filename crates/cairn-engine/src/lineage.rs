//! Lifecycle facts an engine reports to its instrumentation engine.
//!
//! These are ordinary events: an instrumentation engine is just an
//! `Engine<LineageEvent>` whose listeners persist them somewhere.

use cairn_types::Event;
use serde::Serialize;

use crate::listener::Crash;

/// Provenance facts emitted while an engine dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LineageEvent {
    /// A fact was dequeued or derived.
    EntityHasJson {
        entity_id: String,
        entity_type: String,
        json: String,
    },
    ActivityStarted {
        activity_id: String,
        activity_type: String,
        start_time: String,
    },
    ActivityEnded {
        activity_id: String,
        end_time: String,
    },
    ActivityCrashed {
        activity_id: String,
        crash: Crash,
    },
    ActivityUsedEntity {
        activity_id: String,
        entity_id: String,
    },
    /// `entity_id` is the derived entity, not the one the activity consumed.
    EntityGeneratedFromActivity {
        entity_id: String,
        activity_id: String,
    },
    EntityDerivedFromEntity {
        source_entity_id: String,
        derived_entity_id: String,
    },
}

impl LineageEvent {
    pub const ENTITY_HAS_JSON: &'static str = "EntityHasJson";
    pub const ACTIVITY_STARTED: &'static str = "ActivityStarted";
    pub const ACTIVITY_ENDED: &'static str = "ActivityEnded";
    pub const ACTIVITY_CRASHED: &'static str = "ActivityCrashed";
    pub const ACTIVITY_USED_ENTITY: &'static str = "ActivityUsedEntity";
    pub const ENTITY_GENERATED_FROM_ACTIVITY: &'static str = "EntityGeneratedFromActivity";
    pub const ENTITY_DERIVED_FROM_ENTITY: &'static str = "EntityDerivedFromEntity";

    /// Every lineage event type, in declaration order.
    pub const ALL_TYPES: [&'static str; 7] = [
        Self::ENTITY_HAS_JSON,
        Self::ACTIVITY_STARTED,
        Self::ACTIVITY_ENDED,
        Self::ACTIVITY_CRASHED,
        Self::ACTIVITY_USED_ENTITY,
        Self::ENTITY_GENERATED_FROM_ACTIVITY,
        Self::ENTITY_DERIVED_FROM_ENTITY,
    ];
}

impl Event for LineageEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::EntityHasJson { .. } => Self::ENTITY_HAS_JSON,
            Self::ActivityStarted { .. } => Self::ACTIVITY_STARTED,
            Self::ActivityEnded { .. } => Self::ACTIVITY_ENDED,
            Self::ActivityCrashed { .. } => Self::ACTIVITY_CRASHED,
            Self::ActivityUsedEntity { .. } => Self::ACTIVITY_USED_ENTITY,
            Self::EntityGeneratedFromActivity { .. } => Self::ENTITY_GENERATED_FROM_ACTIVITY,
            Self::EntityDerivedFromEntity { .. } => Self::ENTITY_DERIVED_FROM_ENTITY,
        }
    }
}

/// UTC timestamp in RFC 3339 with microseconds, as stored in lineage rows.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
