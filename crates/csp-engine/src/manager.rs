//! Registry of instantiated IPs for one project.

use csp_core::config::{DefinitionSource, IpKind};
use csp_core::summary::ChipSummary;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

use crate::error::EngineError;
use crate::ip::Ip;
use crate::project::Project;

/// Builds IPs on demand and keeps one per vendor and instance.
#[derive(Debug)]
pub struct IpManager {
    project: Rc<Project>,
    peripherals: RefCell<BTreeMap<(String, String), Rc<Ip>>>,
}

impl IpManager {
    pub fn new(project: Rc<Project>) -> Self {
        IpManager {
            project,
            peripherals: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn project(&self) -> &Rc<Project> {
        &self.project
    }

    /// Instantiate peripheral `instance` from definition `define`, or return
    /// the instance already built for this vendor.
    pub fn load_peripheral(
        &self,
        source: &dyn DefinitionSource,
        vendor: &str,
        instance: &str,
        define: &str,
        summary: Rc<ChipSummary>,
    ) -> Result<Rc<Ip>, EngineError> {
        if let Some(ip) = self.peripheral(vendor, instance) {
            return Ok(ip);
        }
        let definition = source.load_ip(IpKind::Peripherals, vendor, define)?;
        debug!(vendor, instance, define, "loading peripheral");
        let ip = Ip::new(&self.project, vendor, instance, definition, summary);
        self.peripherals
            .borrow_mut()
            .insert((vendor.to_string(), instance.to_string()), Rc::clone(&ip));
        Ok(ip)
    }

    /// Instantiate every peripheral of `summary` that names a definition,
    /// in instance order.
    pub fn load_summary_peripherals(
        &self,
        source: &dyn DefinitionSource,
        summary: Rc<ChipSummary>,
    ) -> Result<Vec<Rc<Ip>>, EngineError> {
        let mut loaded = Vec::new();
        for (instance, unit) in &summary.modules.peripherals {
            let Some(define) = &unit.define else {
                continue;
            };
            loaded.push(self.load_peripheral(source, &summary.vendor, instance, define, Rc::clone(&summary))?);
        }
        Ok(loaded)
    }

    pub fn peripheral(&self, vendor: &str, instance: &str) -> Option<Rc<Ip>> {
        self.peripherals
            .borrow()
            .get(&(vendor.to_string(), instance.to_string()))
            .cloned()
    }

    /// Like [`IpManager::peripheral`], as an error when missing.
    pub fn require(&self, vendor: &str, instance: &str) -> Result<Rc<Ip>, EngineError> {
        self.peripheral(vendor, instance).ok_or_else(|| EngineError::UnknownIp {
            vendor: vendor.to_string(),
            instance: instance.to_string(),
        })
    }

    /// Every loaded IP, ordered by vendor then instance.
    pub fn peripherals(&self) -> Vec<Rc<Ip>> {
        self.peripherals.borrow().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_core::config::{ConfigError, MemoryDefinitionSource};
    use csp_core::EngineSettings;
    use serde_json::json;

    fn source() -> MemoryDefinitionSource {
        let source = MemoryDefinitionSource::new();
        source.insert_ip(
            IpKind::Peripherals,
            "Geehy",
            "SPI",
            serde_json::from_value(json!({
                "name": "SPI",
                "parameters": {"enable": {"type": "boolean", "default": false}}
            }))
            .unwrap(),
        );
        source
    }

    #[test]
    fn test_load_caches_per_instance() {
        let manager = IpManager::new(Project::new(json!({}), EngineSettings::default()));
        let source = source();
        let summary = Rc::new(ChipSummary::default());

        let spi1 = manager
            .load_peripheral(&source, "Geehy", "SPI1", "SPI", Rc::clone(&summary))
            .unwrap();
        let again = manager
            .load_peripheral(&source, "Geehy", "SPI1", "SPI", Rc::clone(&summary))
            .unwrap();
        assert!(Rc::ptr_eq(&spi1, &again));

        manager.load_peripheral(&source, "Geehy", "SPI2", "SPI", summary).unwrap();
        let instances: Vec<String> = manager.peripherals().iter().map(|ip| ip.instance().to_string()).collect();
        assert_eq!(instances, vec!["SPI1", "SPI2"]);
        assert!(manager.peripheral("Other", "SPI1").is_none());
    }

    #[test]
    fn test_load_from_summary_modules() {
        let manager = IpManager::new(Project::new(json!({}), EngineSettings::default()));
        let summary: ChipSummary = serde_json::from_value(json!({
            "vendor": "Geehy",
            "modules": {"peripherals": {"SPI1": {"define": "SPI"}, "CRC": {}, "SPI3": {"define": "SPI"}}}
        }))
        .unwrap();
        let loaded = manager.load_summary_peripherals(&source(), Rc::new(summary)).unwrap();
        let instances: Vec<&str> = loaded.iter().map(|ip| ip.instance()).collect();
        assert_eq!(instances, vec!["SPI1", "SPI3"]);
        assert!(manager.peripheral("Geehy", "SPI3").is_some());
    }

    #[test]
    fn test_missing_definition_is_an_error() {
        let manager = IpManager::new(Project::new(json!({}), EngineSettings::default()));
        let err = manager
            .load_peripheral(&source(), "Geehy", "I2C1", "I2C", Rc::new(ChipSummary::default()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::NotFound(_))));
        assert!(matches!(manager.require("Geehy", "I2C1"), Err(EngineError::UnknownIp { .. })));
    }
}
