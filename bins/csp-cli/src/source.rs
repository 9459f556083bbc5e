//! Definitions read from a chip package directory.
//!
//! Layout:
//! - `<root>/<vendor>/<kind>/<define>.json` for IP definitions
//! - `<root>/<vendor>/<chip>.json` for chip summaries

use csp_core::config::{ConfigError, DefinitionSource, IpKind};
use csp_core::model::IpDefinition;
use csp_core::summary::ChipSummary;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DirectoryDefinitionSource {
    root: PathBuf,
}

impl DirectoryDefinitionSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ConfigError> {
        debug!(path = %path.display(), "reading definition");
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
            _ => ConfigError::ReadError(format!("{}: {e}", path.display())),
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl DefinitionSource for DirectoryDefinitionSource {
    fn load_ip(&self, kind: IpKind, vendor: &str, define: &str) -> Result<IpDefinition, ConfigError> {
        let path = self
            .root
            .join(vendor)
            .join(kind.as_str())
            .join(format!("{define}.json"));
        self.read(&path)
    }

    fn load_summary(&self, vendor: &str, name: &str) -> Result<ChipSummary, ConfigError> {
        self.read(&self.root.join(vendor).join(format!("{name}.json")))
    }
}
