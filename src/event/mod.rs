//! Logical change events and their identity semantics.
//!
//! This module provides:
//! - The [`Event`] record shipped to collectors
//! - [`Identity`] policies used for deduplication
//! - The [`ChangeKind`] taxonomy of filesystem changes
//! - The concurrent [`queue::EventQueue`] feeding the dispatcher

mod filter;
pub mod queue;

pub use filter::{convert_all, EventFilter, ExcludeFilter, ExtensionFilter, IncludeFilter};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event key holding the path of the changed file.
pub const FILE_PATH: &str = "filepath";

/// Event key holding the kind of change.
pub const KIND: &str = "kind";

/// Event key holding the epoch-millis timestamp of the notification.
pub const TIMESTAMP: &str = "timestamp";

/// Kind of a logical filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A file appeared.
    Create,
    /// A file's contents or metadata changed.
    Modify,
    /// A file disappeared.
    Delete,
}

impl ChangeKind {
    /// The wire representation of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            _ => Err(()),
        }
    }
}

/// Identity policy deciding which fields participate in equality and
/// hashing when events are deduplicated.
///
/// The policy is serialized alongside the event so that a batch spilled
/// to disk keeps its dedup semantics when restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "keys")]
pub enum Identity {
    /// All fields participate (the default when no policy is set).
    Structural,
    /// Only the named fields participate.
    ByKeys(Vec<String>),
}

impl Identity {
    /// Identity over the `filepath` field, used by all filesystem
    /// producers so a newer change to a path supersedes an older one.
    #[must_use]
    pub fn by_path() -> Self {
        Self::ByKeys(vec![FILE_PATH.to_string()])
    }
}

/// Hashable identity key derived from an [`Event`] and its policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey(Vec<(String, String)>);

/// One logical change record: an insertion-ordered map of string keys
/// to JSON scalar values, plus an optional identity policy.
///
/// Events are created by a producer, optionally rewritten by filters,
/// and thereafter only read and serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<Identity>,
}

impl Event {
    /// Create an empty event with structural identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard filesystem change event: `filepath`, `kind`,
    /// and `timestamp` fields with path-based identity.
    #[must_use]
    pub fn file_change(kind: ChangeKind, path: &Path, timestamp: i64) -> Self {
        let mut event = Self::new();
        event.insert(FILE_PATH, path.to_string_lossy().replace('\\', "/"));
        event.insert(KIND, kind.as_str());
        event.insert(TIMESTAMP, timestamp);
        event.set_identity(Identity::by_path());
        event
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The `filepath` field, if present.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.get_str(FILE_PATH)
    }

    /// The parsed `kind` field, if present and recognized.
    #[must_use]
    pub fn kind(&self) -> Option<ChangeKind> {
        self.get_str(KIND).and_then(|s| s.parse().ok())
    }

    /// Replace the `kind` field.
    pub fn set_kind(&mut self, kind: ChangeKind) {
        self.insert(KIND, kind.as_str());
    }

    /// Attach an identity policy.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// The attached identity policy, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The ordered field map, as shipped to sinks.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the event carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Derive the identity key for this event.
    ///
    /// `ByKeys` policies fall back to structural identity (with a
    /// warning) when none of the named fields is present, so an event
    /// missing its identity fields is never conflated with another.
    #[must_use]
    pub fn key(&self) -> EventKey {
        match &self.identity {
            Some(Identity::ByKeys(keys)) => {
                let mut parts: Vec<(String, String)> = keys
                    .iter()
                    .filter_map(|k| {
                        self.fields
                            .get(k)
                            .map(|v| (k.clone(), canonical_value(v)))
                    })
                    .collect();
                if parts.is_empty() {
                    tracing::warn!(
                        keys = ?keys,
                        "identity fields missing, falling back to structural identity"
                    );
                    parts = self.structural_parts();
                }
                EventKey(parts)
            }
            Some(Identity::Structural) | None => EventKey(self.structural_parts()),
        }
    }

    fn structural_parts(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), canonical_value(v)))
            .collect()
    }
}

/// Deterministic string rendering used for identity hashing.
fn canonical_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
