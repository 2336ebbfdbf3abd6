//! The dispatch loop.

use std::collections::{HashMap, VecDeque};

use cairn_types::{validate_type_name, ContentHash, Event, ValidationError};
use uuid::Uuid;

use crate::lineage::{now_rfc3339, LineageEvent};
use crate::listener::{contain, Crash, Listener};
use crate::queue::{Envelope, EventQueue};
use crate::topology::Topology;

/// Reorders or filters the pending queue after each dispatch step.
///
/// Policies must keep every entry they do not deliberately drop, and
/// applying one twice must give the same result as applying it once.
pub trait QueuePolicy<E: Event> {
    fn apply(&mut self, pending: &mut VecDeque<Envelope<E>>);
}

impl<E, F> QueuePolicy<E> for F
where
    E: Event,
    F: FnMut(&mut VecDeque<Envelope<E>>),
{
    fn apply(&mut self, pending: &mut VecDeque<Envelope<E>>) {
        self(pending)
    }
}

/// A listener failure captured during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerCrash {
    pub activity_id: String,
    pub listener: String,
    pub crash: Crash,
}

/// What one [`Engine::run_next`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub event_type: &'static str,
    pub entity_id: ContentHash,
    /// Listener invocations, successful or not.
    pub activities: usize,
    /// Events appended to the main queue by this step.
    pub derived: usize,
    pub crashes: Vec<ListenerCrash>,
    /// Failures inside the instrumentation engine while recording this
    /// step's lineage, such as a lineage write that did not go through.
    pub instrumentation_crashes: Vec<ListenerCrash>,
}

/// Totals for one [`Engine::run`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub steps: usize,
    pub activities: usize,
    pub derived: usize,
    pub crashes: Vec<ListenerCrash>,
    pub instrumentation_crashes: Vec<ListenerCrash>,
}

type Instrumentation = Option<Box<Engine<LineageEvent>>>;

/// Single-threaded dispatch engine.
///
/// Owns a FIFO queue, a registry of listeners keyed by event type, an ordered
/// list of queue policies, and optionally an instrumentation engine that
/// receives [`LineageEvent`]s about everything this engine does.
///
/// The instrumentation engine is owned by value, so an engine can never be
/// wired as its own (direct or transitive) instrumentation.
pub struct Engine<E: Event> {
    queue: EventQueue<E>,
    listeners: HashMap<&'static str, Vec<Box<dyn Listener<E>>>>,
    policies: Vec<Box<dyn QueuePolicy<E>>>,
    instrumentation: Instrumentation,
}

impl<E: Event> Default for Engine<E> {
    fn default() -> Self {
        Self {
            queue: EventQueue::new(),
            listeners: HashMap::new(),
            policies: Vec::new(),
            instrumentation: None,
        }
    }
}

impl<E: Event> Engine<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an instrumentation engine, replacing any previous one.
    pub fn with_instrumentation(mut self, instrumentation: Engine<LineageEvent>) -> Self {
        self.instrumentation = Some(Box::new(instrumentation));
        self
    }

    pub fn instrumentation(&self) -> Option<&Engine<LineageEvent>> {
        self.instrumentation.as_deref()
    }

    /// Detaches and returns the instrumentation engine.
    pub fn take_instrumentation(&mut self) -> Option<Engine<LineageEvent>> {
        self.instrumentation.take().map(|boxed| *boxed)
    }

    /// Registers a listener for its declared input type.
    ///
    /// Listeners for the same type run in registration order.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the listener's input type name is not
    /// a valid dispatch key.
    pub fn subscribe<L>(&mut self, listener: L) -> Result<(), ValidationError>
    where
        L: Listener<E> + 'static,
    {
        let input_type = listener.input_type();
        validate_type_name(input_type)?;
        tracing::debug!(
            listener = listener.name(),
            event_type = input_type,
            "subscribing listener"
        );
        self.listeners
            .entry(input_type)
            .or_default()
            .push(Box::new(listener));
        Ok(())
    }

    /// Appends a queue policy. Policies run in the order they were added.
    pub fn add_policy<P>(&mut self, policy: P)
    where
        P: QueuePolicy<E> + 'static,
    {
        self.policies.push(Box::new(policy));
    }

    /// Injects an event at the tail of the main queue.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the event is malformed. Nothing is
    /// queued in that case.
    pub fn emit(&mut self, event: E) -> Result<ContentHash, ValidationError> {
        self.queue.emit(event)
    }

    pub fn queue(&self) -> &EventQueue<E> {
        &self.queue
    }

    /// Names of the listeners subscribed to `event_type`, in dispatch order.
    pub fn listener_names(&self, event_type: &str) -> Vec<&str> {
        self.listeners
            .get(event_type)
            .map(|ls| ls.iter().map(|l| l.name()).collect())
            .unwrap_or_default()
    }

    /// The static subscription graph of this engine's registry.
    pub fn topology(&self) -> Topology {
        let mut topology = Topology::new();
        let mut types: Vec<&&'static str> = self.listeners.keys().collect();
        types.sort();
        for event_type in types {
            for listener in &self.listeners[*event_type] {
                topology.add_handler(listener.name(), *event_type, listener.output_types());
            }
        }
        topology
    }

    /// Dispatches the head of the queue to its listeners.
    ///
    /// Listener failures are recorded and contained; they never escape this
    /// call. Returns `None` when the queue is empty.
    pub fn run_next(&mut self) -> Option<StepReport> {
        let envelope = self.queue.next()?;
        let entity_id = envelope.entity_id().clone();
        let event_type = envelope.event_type();

        record(&mut self.instrumentation, || LineageEvent::EntityHasJson {
            entity_id: entity_id.to_string(),
            entity_type: event_type.to_string(),
            json: envelope.json().to_string(),
        });

        let mut report = StepReport {
            event_type,
            entity_id: entity_id.clone(),
            activities: 0,
            derived: 0,
            crashes: Vec::new(),
            instrumentation_crashes: Vec::new(),
        };

        match self.listeners.get_mut(event_type) {
            Some(listeners) => {
                tracing::debug!(
                    event_type,
                    entity_id = %entity_id,
                    listeners = listeners.len(),
                    "dispatching event"
                );
                for listener in listeners.iter_mut() {
                    let mut out = EventQueue::new();
                    let activity_id = Uuid::new_v4().to_string();

                    record(&mut self.instrumentation, || LineageEvent::ActivityStarted {
                        activity_id: activity_id.clone(),
                        activity_type: listener.name().to_string(),
                        start_time: now_rfc3339(),
                    });
                    record(&mut self.instrumentation, || {
                        LineageEvent::ActivityUsedEntity {
                            activity_id: activity_id.clone(),
                            entity_id: entity_id.to_string(),
                        }
                    });

                    let outcome = contain(|| listener.run(&mut out, envelope.event()));
                    report.activities += 1;

                    if let Err(crash) = outcome {
                        tracing::warn!(
                            listener = listener.name(),
                            activity_id = %activity_id,
                            event_type,
                            error = %crash.message,
                            "listener crashed"
                        );
                        record(&mut self.instrumentation, || LineageEvent::ActivityCrashed {
                            activity_id: activity_id.clone(),
                            crash: crash.clone(),
                        });
                        report.crashes.push(ListenerCrash {
                            activity_id: activity_id.clone(),
                            listener: listener.name().to_string(),
                            crash,
                        });
                    }

                    record(&mut self.instrumentation, || LineageEvent::ActivityEnded {
                        activity_id: activity_id.clone(),
                        end_time: now_rfc3339(),
                    });

                    for derived in out.drain() {
                        let derived_id = derived.entity_id().to_string();
                        record(&mut self.instrumentation, || LineageEvent::EntityHasJson {
                            entity_id: derived_id.clone(),
                            entity_type: derived.event_type().to_string(),
                            json: derived.json().to_string(),
                        });
                        record(&mut self.instrumentation, || {
                            LineageEvent::EntityGeneratedFromActivity {
                                entity_id: derived_id.clone(),
                                activity_id: activity_id.clone(),
                            }
                        });
                        record(&mut self.instrumentation, || {
                            LineageEvent::EntityDerivedFromEntity {
                                source_entity_id: entity_id.to_string(),
                                derived_entity_id: derived_id.clone(),
                            }
                        });
                        self.queue.push(derived);
                        report.derived += 1;
                    }
                }
            }
            None => {
                tracing::debug!(event_type, entity_id = %entity_id, "no listeners for event");
            }
        }

        if let Some(instrumentation) = self.instrumentation.as_deref_mut() {
            while let Some(step) = instrumentation.run_next() {
                report.instrumentation_crashes.extend(step.crashes);
                report
                    .instrumentation_crashes
                    .extend(step.instrumentation_crashes);
            }
        }
        if !report.instrumentation_crashes.is_empty() {
            tracing::warn!(
                event_type,
                entity_id = %entity_id,
                failures = report.instrumentation_crashes.len(),
                "lineage for this step was not fully recorded"
            );
        }

        for policy in &mut self.policies {
            policy.apply(self.queue.items_mut());
        }

        Some(report)
    }

    /// Drains the queue, including everything listeners derive along the way.
    pub fn run(&mut self) -> RunReport {
        let mut totals = RunReport::default();
        while let Some(step) = self.run_next() {
            totals.steps += 1;
            totals.activities += step.activities;
            totals.derived += step.derived;
            totals.crashes.extend(step.crashes);
            totals
                .instrumentation_crashes
                .extend(step.instrumentation_crashes);
        }
        if !totals.crashes.is_empty() || !totals.instrumentation_crashes.is_empty() {
            tracing::info!(
                steps = totals.steps,
                crashes = totals.crashes.len(),
                instrumentation_crashes = totals.instrumentation_crashes.len(),
                "run finished with contained listener crashes"
            );
        }
        totals
    }
}

/// Queues a lineage fact on the instrumentation engine, if one is attached.
fn record<F>(instrumentation: &mut Instrumentation, fact: F)
where
    F: FnOnce() -> LineageEvent,
{
    let Some(engine) = instrumentation.as_deref_mut() else {
        return;
    };
    if let Err(e) = engine.emit(fact()) {
        tracing::error!(error = %e, "failed to record lineage fact");
    }
}
