//! Engine settings and definition loading abstraction.
//!
//! Static IP definitions and chip summaries live in chip packages owned by
//! an external collaborator (file system, IPC, embedded resources). The
//! engine only needs them parsed, so loading sits behind
//! [`DefinitionSource`]:
//! - [`MemoryDefinitionSource`] for tests and embedding
//! - a directory-backed source in the command line host
//!
//! All methods are synchronous. Loading happens once, before the engine is
//! built for a document.

use crate::model::IpDefinition;
use crate::summary::ChipSummary;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;

/// Errors that can occur while loading definitions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested definition was not found.
    #[error("Definition not found: {0}")]
    NotFound(String),

    /// Failed to read the definition.
    #[error("Read error: {0}")]
    ReadError(String),

    /// Definition data is invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::InvalidData(e.to_string())
    }
}

/// Which family an IP definition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpKind {
    Peripherals,
}

impl IpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpKind::Peripherals => "peripherals",
        }
    }
}

/// Provider of parsed static definitions.
pub trait DefinitionSource {
    /// Load the IP definition named `define` for `vendor`.
    fn load_ip(&self, kind: IpKind, vendor: &str, define: &str) -> Result<IpDefinition, ConfigError>;

    /// Load the summary of chip `name` for `vendor`.
    fn load_summary(&self, vendor: &str, name: &str) -> Result<ChipSummary, ConfigError>;
}

/// In-memory definitions, keyed by `kind/vendor/define` and `vendor/name`.
#[derive(Debug, Default)]
pub struct MemoryDefinitionSource {
    ips: RefCell<HashMap<String, IpDefinition>>,
    summaries: RefCell<HashMap<String, ChipSummary>>,
}

impl MemoryDefinitionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ip(&self, kind: IpKind, vendor: &str, define: &str, ip: IpDefinition) {
        self.ips
            .borrow_mut()
            .insert(format!("{}/{vendor}/{define}", kind.as_str()), ip);
    }

    pub fn insert_summary(&self, vendor: &str, name: &str, summary: ChipSummary) {
        self.summaries
            .borrow_mut()
            .insert(format!("{vendor}/{name}"), summary);
    }
}

impl DefinitionSource for MemoryDefinitionSource {
    fn load_ip(&self, kind: IpKind, vendor: &str, define: &str) -> Result<IpDefinition, ConfigError> {
        let key = format!("{}/{vendor}/{define}", kind.as_str());
        self.ips
            .borrow()
            .get(&key)
            .cloned()
            .ok_or(ConfigError::NotFound(key))
    }

    fn load_summary(&self, vendor: &str, name: &str) -> Result<ChipSummary, ConfigError> {
        let key = format!("{vendor}/{name}");
        self.summaries
            .borrow()
            .get(&key)
            .cloned()
            .ok_or(ConfigError::NotFound(key))
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Locale used for `display`/`description` lookups.
    pub locale: String,

    /// Whether container reference overlays force parameter values.
    pub enforce_references: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            enforce_references: true,
        }
    }
}
