//! Runtime configuration.
//!
//! Values are loaded by the CLI (flags with environment fallbacks) and
//! validated here before any component starts.

mod settings;

pub use settings::{Config, SinkKind};
