//! Coalescing of raw filesystem notifications into logical events.
//!
//! Bursty editors and copy tools produce redundant notification runs
//! for the same path; the coalescer collapses them against the queue's
//! pending view so at most one logical event per path is in flight.

use std::path::Path;
use std::sync::Arc;

use crate::event::queue::CoalesceAction;
use crate::event::{ChangeKind, Event};
use crate::manager::EventManager;

/// Kind of a raw notification as reported by the watch mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Create,
    Modify,
    Delete,
    /// The watch mechanism lost notifications; nothing can be inferred.
    Overflow,
}

/// The coalescing transition table.
///
/// Given the kind pending in the queue for a path (if any) and the kind
/// of the incoming notification, decide what the queue should hold
/// afterwards:
///
/// - create then delete cancels out entirely;
/// - create-after-modify and create-after-delete enqueue `modify` (the
///   file exists again, so its content is reconsidered as a whole);
/// - repeats of `modify` and `delete` replace the pending event so the
///   freshest timestamp wins without queuing twice;
/// - anything already represented is ignored.
#[must_use]
pub const fn transition(pending: Option<ChangeKind>, incoming: ChangeKind) -> CoalesceAction {
    match (pending, incoming) {
        (None, kind) => CoalesceAction::Enqueue(kind),
        (Some(ChangeKind::Create), ChangeKind::Create | ChangeKind::Modify) => {
            CoalesceAction::Ignore
        }
        (Some(ChangeKind::Create), ChangeKind::Delete) => CoalesceAction::Cancel,
        (Some(ChangeKind::Modify | ChangeKind::Delete), ChangeKind::Create | ChangeKind::Modify) => {
            CoalesceAction::Enqueue(ChangeKind::Modify)
        }
        (Some(ChangeKind::Modify | ChangeKind::Delete), ChangeKind::Delete) => {
            CoalesceAction::Enqueue(ChangeKind::Delete)
        }
    }
}

/// Per-root coalescer feeding the shared event manager.
///
/// Decisions for one root are totally ordered because each root is
/// served by a single watch thread; the queue lock makes each decision
/// atomic against concurrent drains.
pub struct ChangeCoalescer {
    manager: Arc<EventManager>,
}

impl ChangeCoalescer {
    /// Create a coalescer feeding `manager`.
    #[must_use]
    pub fn new(manager: Arc<EventManager>) -> Self {
        Self { manager }
    }

    /// Process one raw notification.
    pub fn apply(&self, kind: RawKind, path: &Path, timestamp: i64) {
        let kind = match kind {
            RawKind::Create => ChangeKind::Create,
            RawKind::Modify => ChangeKind::Modify,
            RawKind::Delete => ChangeKind::Delete,
            RawKind::Overflow => {
                tracing::warn!(
                    path = %path.display(),
                    "notification overflow, changes may have been lost"
                );
                return;
            }
        };

        let event = Event::file_change(kind, path, timestamp);
        let action = self.manager.apply_coalesced(event, kind, transition);
        tracing::trace!(path = %path.display(), ?kind, ?action, "coalesced notification");
    }
}
