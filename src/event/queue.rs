//! Concurrent event queue with identity-based deduplication.
//!
//! The queue is a keyed FIFO multiset: an order deque of identity keys
//! plus a key-to-event map, guarded by one mutex. The keyed index
//! doubles as the pending-change table consulted by the coalescer, so
//! look-up, transition decision, and mutation happen atomically under
//! the queue lock.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::{ChangeKind, Event, EventKey};

/// What to do with an incoming event given the pending one for the
/// same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceAction {
    /// Drop the incoming event; the pending one already represents it.
    Ignore,
    /// Remove the pending event and drop the incoming one too.
    Cancel,
    /// Replace the pending event (if any) with the incoming one,
    /// rewritten to the given kind.
    Enqueue(ChangeKind),
}

#[derive(Default)]
struct Inner {
    order: VecDeque<EventKey>,
    events: HashMap<EventKey, Event>,
}

impl Inner {
    fn insert(&mut self, key: EventKey, event: Event) {
        if self.events.insert(key.clone(), event).is_some() {
            // newest wins and moves to the tail
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);
    }

    fn remove(&mut self, key: &EventKey) -> Option<Event> {
        let removed = self.events.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }
}

/// Unordered-multiset event queue with deduplicating insertion and
/// FIFO-ish draining.
///
/// Multiple producers insert concurrently; the single dispatcher task
/// pops. All operations take the internal lock, so no external
/// coordination is needed.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<Inner>,
}

impl EventQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicating insert: an existing event with the same identity
    /// is removed first, so the newest event supersedes and re-enters
    /// at the tail.
    pub fn insert(&self, event: Event) {
        let key = event.key();
        self.inner.lock().insert(key, event);
    }

    /// Remove the event with the given identity, if queued.
    pub fn remove(&self, key: &EventKey) -> Option<Event> {
        self.inner.lock().remove(key)
    }

    /// Pop the oldest queued event.
    #[must_use]
    pub fn pop(&self) -> Option<Event> {
        let mut inner = self.inner.lock();
        let key = inner.order.pop_front()?;
        inner.events.remove(&key)
    }

    /// Apply a coalescing transition atomically: look up the pending
    /// kind for the incoming event's identity, let `transition` decide,
    /// and mutate the queue accordingly. Returns the decided action.
    pub fn coalesce(
        &self,
        mut incoming: Event,
        new_kind: ChangeKind,
        transition: impl FnOnce(Option<ChangeKind>, ChangeKind) -> CoalesceAction,
    ) -> CoalesceAction {
        let key = incoming.key();
        let mut inner = self.inner.lock();
        let pending = inner.events.get(&key).and_then(Event::kind);
        let action = transition(pending, new_kind);
        match action {
            CoalesceAction::Ignore => {}
            CoalesceAction::Cancel => {
                inner.remove(&key);
            }
            CoalesceAction::Enqueue(kind) => {
                incoming.set_kind(kind);
                inner.insert(key, incoming);
            }
        }
        action
    }

    /// Current number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
