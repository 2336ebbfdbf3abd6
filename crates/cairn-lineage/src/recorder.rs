//! Instrumentation listeners that write lineage facts to a [`LineageStore`].

use cairn_engine::{Engine, EventQueue, LineageEvent, Listener};

use crate::store::LineageStore;

/// Persists one kind of [`LineageEvent`].
pub struct LineageRecorder {
    store: LineageStore,
    fact_type: &'static str,
    name: String,
}

impl LineageRecorder {
    pub fn new(store: LineageStore, fact_type: &'static str) -> Self {
        Self {
            store,
            fact_type,
            name: format!("Record{fact_type}"),
        }
    }
}

impl Listener<LineageEvent> for LineageRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> &'static str {
        self.fact_type
    }

    fn run(&mut self, _out: &mut EventQueue<LineageEvent>, fact: &LineageEvent) -> anyhow::Result<()> {
        match fact {
            LineageEvent::EntityHasJson {
                entity_id,
                entity_type,
                json,
            } => self.store.record_entity(entity_id, entity_type, json)?,
            LineageEvent::ActivityStarted {
                activity_id,
                activity_type,
                start_time,
            } => self
                .store
                .record_activity_started(activity_id, activity_type, start_time)?,
            LineageEvent::ActivityEnded {
                activity_id,
                end_time,
            } => self.store.record_activity_ended(activity_id, end_time)?,
            LineageEvent::ActivityCrashed { activity_id, crash } => {
                self.store.record_activity_crashed(activity_id, crash)?
            }
            LineageEvent::ActivityUsedEntity {
                activity_id,
                entity_id,
            } => self.store.record_used(activity_id, entity_id)?,
            LineageEvent::EntityGeneratedFromActivity {
                entity_id,
                activity_id,
            } => self.store.record_generated(entity_id, activity_id)?,
            LineageEvent::EntityDerivedFromEntity {
                source_entity_id,
                derived_entity_id,
            } => self
                .store
                .record_derived(source_entity_id, derived_entity_id)?,
        }
        Ok(())
    }
}

/// Builds an instrumentation engine that persists every lineage fact to
/// `store`.
pub fn instrumentation_engine(store: &LineageStore) -> Engine<LineageEvent> {
    let mut engine = Engine::new();
    for fact_type in LineageEvent::ALL_TYPES {
        // Lineage type names are constants and always valid.
        if let Err(e) = engine.subscribe(LineageRecorder::new(store.clone(), fact_type)) {
            tracing::error!(fact_type, error = %e, "failed to subscribe lineage recorder");
        }
    }
    engine
}
