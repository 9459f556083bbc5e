//! The IP aggregate: one configured instance of a peripheral definition.
//!
//! An [`Ip`] owns the live parameters of its instance, the activation gate
//! that puts the instance into the project's module set, the container
//! sections whose overlays keep parameters consistent, the presets and the
//! block diagrams.

use csp_core::expr::Placeholders;
use csp_core::model::IpDefinition;
use csp_core::summary::ChipSummary;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::object::{Containers, DiagramSet, IpObject};
use crate::parameter::{Parameter, ParameterSlot};
use crate::project::Project;
use crate::tracked::Derived;

/// What every object built for one IP instance needs to know about it.
///
/// Holds the project weakly; the project never owns IP objects.
#[derive(Debug)]
pub struct IpContext {
    placeholders: Placeholders,
    summary: Rc<ChipSummary>,
    project: Weak<Project>,
}

impl IpContext {
    pub fn new(project: &Rc<Project>, placeholders: Placeholders, summary: Rc<ChipSummary>) -> Rc<Self> {
        Rc::new(IpContext {
            placeholders,
            summary,
            project: Rc::downgrade(project),
        })
    }

    pub fn instance(&self) -> &str {
        self.placeholders.instance()
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    pub fn summary(&self) -> &ChipSummary {
        &self.summary
    }

    pub fn project(&self) -> Option<Rc<Project>> {
        self.project.upgrade()
    }
}

pub struct Ip {
    vendor: String,
    definition: IpDefinition,
    context: Rc<IpContext>,
    activated: Derived<bool>,
    parameters: BTreeMap<String, Rc<ParameterSlot>>,
    containers: Containers,
    presets: BTreeMap<String, Rc<IpObject>>,
    diagrams: Option<DiagramSet>,
}

impl std::fmt::Debug for Ip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ip")
            .field("vendor", &self.vendor)
            .field("instance", &self.instance())
            .field("activated", &self.activated())
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Ip {
    /// Instantiate `definition` as `instance`.
    ///
    /// Building the containers may already write to the store: each
    /// enforcing section activates its current entry immediately.
    pub fn new(
        project: &Rc<Project>,
        vendor: &str,
        instance: &str,
        definition: IpDefinition,
        summary: Rc<ChipSummary>,
    ) -> Rc<Self> {
        let is_pin_ip = instance == summary.pin_instance();
        let placeholders = Placeholders::new(instance, &definition.name);
        let context = IpContext::new(project, placeholders, summary);

        let activated = Derived::toggle(project, definition.activated.as_ref(), context.placeholders());
        let parameters = build_slots(project, &context, &definition, None);

        let enforcing = project.settings().enforce_references && !is_pin_ip;
        let containers = Containers::new(project, &context, &definition.containers, &parameters, enforcing);
        let presets = definition
            .presets
            .iter()
            .map(|(name, preset)| {
                (name.clone(), IpObject::new(project, &context, preset, &parameters, false))
            })
            .collect();
        let diagrams = definition
            .diagrams
            .as_ref()
            .map(|d| DiagramSet::new(project, &context, d));

        let ip = Rc::new(Ip {
            vendor: vendor.to_string(),
            definition,
            context,
            activated,
            parameters,
            containers,
            presets,
            diagrams,
        });

        ip.sync_module(project, ip.activated());
        let weak = Rc::downgrade(&ip);
        ip.activated.on_changed(move |active| {
            if let Some(ip) = weak.upgrade() {
                if let Some(project) = ip.context.project() {
                    ip.sync_module(&project, *active);
                }
            }
        });
        info!(vendor, instance, parameters = ip.parameters.len(), "IP instantiated");
        ip
    }

    fn sync_module(&self, project: &Project, active: bool) {
        debug!(instance = self.instance(), active, "activation");
        if active {
            project.add_module(self.instance());
        } else {
            project.remove_module(self.instance());
        }
    }

    /// Generic type name (`USART`).
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn instance(&self) -> &str {
        self.context.instance()
    }

    pub fn prefix(&self) -> &str {
        self.context.placeholders().prefix()
    }

    pub fn suffix(&self) -> &str {
        self.context.placeholders().suffix()
    }

    pub fn definition(&self) -> &IpDefinition {
        &self.definition
    }

    pub fn context(&self) -> &Rc<IpContext> {
        &self.context
    }

    /// Whether this instance owns the chip's GPIO modes.
    pub fn is_pin_ip(&self) -> bool {
        self.instance() == self.context.summary().pin_instance()
    }

    pub fn activated(&self) -> bool {
        self.activated.get()
    }

    pub fn parameters(&self) -> &BTreeMap<String, Rc<ParameterSlot>> {
        &self.parameters
    }

    /// The parameter currently in effect under `name`.
    pub fn parameter(&self, name: &str) -> Option<Rc<Parameter>> {
        self.parameters.get(name).and_then(|slot| slot.current())
    }

    pub fn containers(&self) -> &Containers {
        &self.containers
    }

    pub fn presets(&self) -> &BTreeMap<String, Rc<IpObject>> {
        &self.presets
    }

    /// Write the defaults of preset `name`. Returns how many store values
    /// changed.
    pub fn apply_preset(&self, name: &str) -> Result<usize, EngineError> {
        let preset = self.presets.get(name).ok_or_else(|| EngineError::UnknownPreset {
            instance: self.instance().to_string(),
            preset: name.to_string(),
        })?;
        let written = preset.apply();
        debug!(instance = self.instance(), preset = name, written, "preset applied");
        Ok(written)
    }

    /// Sorted union of the signals every enum value of every parameter can
    /// claim.
    pub fn signals(&self) -> Vec<String> {
        self.parameters
            .values()
            .flat_map(|slot| slot.variants())
            .filter_map(|parameter| parameter.as_enum().map(|e| e.all_signals()))
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Build a fresh parameter set bound under `instance.channel`.
    pub fn build_channel_parameters(&self, channel: &str) -> BTreeMap<String, Rc<ParameterSlot>> {
        match self.context.project() {
            Some(project) => build_slots(&project, &self.context, &self.definition, Some(channel)),
            None => BTreeMap::new(),
        }
    }

    pub fn diagrams(&self) -> Option<&DiagramSet> {
        self.diagrams.as_ref()
    }

    /// Images of the active diagram entry.
    pub fn images(&self) -> Vec<String> {
        self.diagrams.as_ref().map(DiagramSet::images).unwrap_or_default()
    }
}

fn build_slots(
    project: &Rc<Project>,
    context: &Rc<IpContext>,
    definition: &IpDefinition,
    channel: Option<&str>,
) -> BTreeMap<String, Rc<ParameterSlot>> {
    definition
        .parameters
        .iter()
        .map(|(name, d)| {
            let slot = ParameterSlot::new(project, context, name, channel, d);
            (name.clone(), Rc::new(slot))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_core::store::ConfigStore;
    use csp_core::EngineSettings;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn usart() -> IpDefinition {
        serde_json::from_value(json!({
            "name": "USART",
            "activated": "configs.${IP_INSTANCE}.enable",
            "parameters": {
                "enable": {"type": "boolean", "default": false},
                "mode": {"type": "enum", "default": "async", "values": {
                    "async": {"signals": {"${IP_INSTANCE}_TX": {"mode": "AF_PP"}}},
                    "sync": {"signals": {
                        "${IP_INSTANCE}_TX": {"mode": "AF_PP"},
                        "${IP_INSTANCE}_CK": {"mode": "AF_PP"}
                    }}
                }},
                "clock": {"type": "enum", "default": "off", "values": {"off": {}, "on": {}}}
            },
            "containers": {
                "modes": [
                    {"condition": "configs.${IP_INSTANCE}.mode == 'sync'",
                     "content": {"refParameters": {"clock": {"values": ["on"], "default": "on"}}}},
                    {"condition": "default",
                     "content": {"refParameters": {"clock": {"values": ["off"]}}}}
                ]
            },
            "presets": {
                "USART1_CK": {"refParameters": {"enable": {"default": true}, "mode": {"default": "sync"}}}
            },
            "diagrams": {"images": ["usart.svg"]}
        }))
        .unwrap()
    }

    fn gpio_summary() -> Rc<ChipSummary> {
        Rc::new(
            serde_json::from_value(json!({
                "pins": {"PA9": {"signals": ["USART1_TX"], "modes": ["GPIO:Input"]}}
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_activation_toggles_module() {
        let project = Project::new(json!({}), EngineSettings::default());
        let ip = Ip::new(&project, "Geehy", "USART1", usart(), gpio_summary());
        assert!(!ip.activated());
        assert!(!project.has_module("USART1"));

        project.configs().set("USART1.enable", json!(true));
        assert!(ip.activated());
        assert_eq!(project.modules(), vec!["USART1"]);

        project.configs().set("USART1.enable", json!(false));
        assert!(project.modules().is_empty());
    }

    #[test]
    fn test_instance_affixes_and_signals() {
        let project = Project::new(json!({}), EngineSettings::default());
        let ip = Ip::new(&project, "Geehy", "USART1", usart(), gpio_summary());
        assert_eq!(ip.name(), "USART");
        assert_eq!(ip.suffix(), "1");
        assert_eq!(ip.prefix(), "");
        assert!(!ip.is_pin_ip());
        assert_eq!(ip.signals(), vec!["USART1_CK", "USART1_TX"]);
        assert_eq!(ip.images(), vec!["usart.svg"]);
    }

    #[test]
    fn test_preset_then_containers_follow() {
        let project = Project::new(json!({}), EngineSettings::default());
        let ip = Ip::new(&project, "Geehy", "USART1", usart(), gpio_summary());
        assert_eq!(project.configs().get("USART1.clock"), Some(json!("off")));

        assert_eq!(ip.apply_preset("USART1_CK").unwrap(), 2);
        assert!(ip.activated());
        assert_eq!(ip.parameter("clock").unwrap().value(), json!("on"));

        let err = ip.apply_preset("missing").unwrap_err();
        assert!(matches!(err, EngineError::UnknownPreset { .. }));
    }

    #[test]
    fn test_pin_ip_skips_enforcement() {
        let project = Project::new(json!({}), EngineSettings::default());
        let mut gpio = usart();
        gpio.name = "GPIO".into();
        let ip = Ip::new(&project, "Geehy", "GPIO", gpio, gpio_summary());
        assert!(ip.is_pin_ip());
        assert_eq!(project.configs().get("GPIO.clock"), None);
        project.configs().set("GPIO.clock", json!("on"));
        assert_eq!(ip.parameter("clock").unwrap().value(), json!("on"));
    }

    #[test]
    fn test_disabled_enforcement_setting() {
        let settings = EngineSettings {
            enforce_references: false,
            ..EngineSettings::default()
        };
        let project = Project::new(json!({}), settings);
        let ip = Ip::new(&project, "Geehy", "USART1", usart(), gpio_summary());
        project.configs().set("USART1.clock", json!("on"));
        assert_eq!(ip.parameter("clock").unwrap().value(), json!("on"));
    }

    #[test]
    fn test_channel_parameters() {
        let project = Project::new(json!({}), EngineSettings::default());
        let ip = Ip::new(&project, "Geehy", "USART1", usart(), gpio_summary());
        let channel = ip.build_channel_parameters("CH1");
        let mode = channel["mode"].current().unwrap();
        assert_eq!(mode.path(), "USART1.CH1.mode");
        assert_eq!(mode.value(), Value::from("async"));
    }
}
