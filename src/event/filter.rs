//! Event filters applied between the queue and the dispatch batch.
//!
//! Filters are pure with respect to the pipeline; they hold only their
//! own compiled configuration. A `None` result excludes the event and
//! short-circuits the remaining filters.

use regex::Regex;

use super::Event;
use crate::{Error, Result};

/// A single step of the filter chain: rewrite the event or drop it.
pub trait EventFilter: Send + Sync {
    /// Convert the event, returning `None` to exclude it.
    fn convert(&self, event: Event) -> Option<Event>;
}

/// Thread an event through filters in registration order.
///
/// Returns `None` as soon as any filter drops the event.
#[must_use]
pub fn convert_all(filters: &[Box<dyn EventFilter>], event: Event) -> Option<Event> {
    let mut target = event;
    for filter in filters {
        target = filter.convert(target)?;
    }
    Some(target)
}

/// Drops events whose path's final segment has no extension.
///
/// Events without a `filepath` field pass through untouched.
pub struct ExtensionFilter;

impl EventFilter for ExtensionFilter {
    fn convert(&self, event: Event) -> Option<Event> {
        if let Some(path) = event.path() {
            let name = path.rsplit('/').next().unwrap_or(path);
            if !name.contains('.') {
                return None;
            }
        }
        Some(event)
    }
}

/// Drops events whose path matches any of the configured patterns.
#[derive(Debug)]
pub struct ExcludeFilter {
    patterns: Vec<Regex>,
}

impl ExcludeFilter {
    /// Compile the exclude pattern list.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern is not a valid regex.
    pub fn new(patterns: &[String]) -> Result<Self> {
        Ok(Self {
            patterns: compile(patterns)?,
        })
    }
}

impl EventFilter for ExcludeFilter {
    fn convert(&self, event: Event) -> Option<Event> {
        if let Some(path) = event.path() {
            if self.patterns.iter().any(|p| p.is_match(path)) {
                return None;
            }
        }
        Some(event)
    }
}

/// Keeps only events whose path matches at least one configured
/// pattern. An empty pattern list keeps everything.
pub struct IncludeFilter {
    patterns: Vec<Regex>,
}

impl IncludeFilter {
    /// Compile the include pattern list.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern is not a valid regex.
    pub fn new(patterns: &[String]) -> Result<Self> {
        Ok(Self {
            patterns: compile(patterns)?,
        })
    }
}

impl EventFilter for IncludeFilter {
    fn convert(&self, event: Event) -> Option<Event> {
        if self.patterns.is_empty() {
            return Some(event);
        }
        match event.path() {
            Some(path) if self.patterns.iter().any(|p| p.is_match(path)) => Some(event),
            _ => None,
        }
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::config(format!("invalid pattern '{p}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use std::path::PathBuf;

    fn path_event(path: &str) -> Event {
        Event::file_change(ChangeKind::Modify, &PathBuf::from(path), 0)
    }

    #[test]
    fn test_extension_filter_drops_bare_names() {
        let filter = ExtensionFilter;
        assert!(filter.convert(path_event("/watch/a.txt")).is_some());
        assert!(filter.convert(path_event("/watch/Makefile")).is_none());
        assert!(filter.convert(path_event("/watch/dir/binary")).is_none());
    }

    #[test]
    fn test_extension_filter_passes_non_file_events() {
        let mut event = Event::new();
        event.insert("user", "alice");
        assert!(ExtensionFilter.convert(event).is_some());
    }

    #[test]
    fn test_exclude_filter() {
        let filter = ExcludeFilter::new(&[r"\.log$".to_string(), "/tmp/".to_string()]).unwrap();
        assert!(filter.convert(path_event("/watch/debug.log")).is_none());
        assert!(filter.convert(path_event("/tmp/scratch.txt")).is_none());
        assert!(filter.convert(path_event("/watch/main.rs")).is_some());
    }

    #[test]
    fn test_exclude_filter_invalid_pattern() {
        let err = ExcludeFilter::new(&["[unclosed".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_include_filter_empty_keeps_all() {
        let filter = IncludeFilter::new(&[]).unwrap();
        assert!(filter.convert(path_event("/anything")).is_some());
    }

    #[test]
    fn test_include_filter_requires_match() {
        let filter = IncludeFilter::new(&[r"\.rs$".to_string()]).unwrap();
        assert!(filter.convert(path_event("/watch/main.rs")).is_some());
        assert!(filter.convert(path_event("/watch/main.py")).is_none());
    }

    #[test]
    fn test_include_filter_drops_pathless_events() {
        let filter = IncludeFilter::new(&[r"\.rs$".to_string()]).unwrap();
        let mut event = Event::new();
        event.insert("user", "alice");
        assert!(filter.convert(event).is_none());
    }

    #[test]
    fn test_chain_short_circuits() {
        let filters: Vec<Box<dyn EventFilter>> = vec![
            Box::new(ExtensionFilter),
            Box::new(ExcludeFilter::new(&[r"\.log$".to_string()]).unwrap()),
            Box::new(IncludeFilter::new(&[r"^/watch/".to_string()]).unwrap()),
        ];

        assert!(convert_all(&filters, path_event("/watch/a.txt")).is_some());
        assert!(convert_all(&filters, path_event("/watch/noext")).is_none());
        assert!(convert_all(&filters, path_event("/watch/a.log")).is_none());
        assert!(convert_all(&filters, path_event("/other/a.txt")).is_none());
    }
}
