//! FIFO queue of validated, canonicalized events.

use std::collections::VecDeque;

use cairn_types::{CanonicalEvent, ContentHash, Event, ValidationError};

/// An event together with its canonical form, sealed when it was emitted.
#[derive(Debug, Clone)]
pub struct Envelope<E> {
    event: E,
    canonical: CanonicalEvent,
}

impl<E: Event> Envelope<E> {
    /// Validates and canonicalizes `event`.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] produced by [`CanonicalEvent::of`].
    pub fn seal(event: E) -> Result<Self, ValidationError> {
        let canonical = CanonicalEvent::of(&event)?;
        Ok(Self { event, canonical })
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn event_type(&self) -> &'static str {
        self.canonical.event_type()
    }

    /// The content hash, used as the lineage entity id.
    pub fn entity_id(&self) -> &ContentHash {
        self.canonical.hash()
    }

    /// The canonical JSON body.
    pub fn json(&self) -> &str {
        self.canonical.json()
    }

    pub fn into_event(self) -> E {
        self.event
    }
}

/// An ordered FIFO sequence of pending events.
///
/// Engines own one of these as their main queue and hand every listener a
/// fresh, empty one to emit into.
#[derive(Debug)]
pub struct EventQueue<E> {
    items: VecDeque<Envelope<E>>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<E: Event> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event at the tail and returns its content hash.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the event is malformed; the queue is
    /// left unchanged.
    pub fn emit(&mut self, event: E) -> Result<ContentHash, ValidationError> {
        let envelope = Envelope::seal(event)?;
        let hash = envelope.entity_id().clone();
        self.items.push_back(envelope);
        Ok(hash)
    }

    pub(crate) fn push(&mut self, envelope: Envelope<E>) {
        self.items.push_back(envelope);
    }

    pub(crate) fn next(&mut self) -> Option<Envelope<E>> {
        self.items.pop_front()
    }

    pub(crate) fn items_mut(&mut self) -> &mut VecDeque<Envelope<E>> {
        &mut self.items
    }

    pub(crate) fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, Envelope<E>> {
        self.items.drain(..)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates pending events from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.items.iter().map(Envelope::event)
    }
}
