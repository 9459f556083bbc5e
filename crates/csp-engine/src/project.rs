//! The live project: document owner and change hub.
//!
//! A [`Project`] owns the JSON document and the two stores viewing it
//! (`configs` and `gen`). Store changes are re-emitted on the project's
//! `changed` channel with the store root prepended, then routed through
//! the dependency [`WatchRegistry`] to every expression that reads them.

use csp_core::event::{ChangeEvent, Emitter, ListenerId};
use csp_core::expr::Evaluator;
use csp_core::model::PinConfig;
use csp_core::store::{ConfigStore, DocumentStore, SharedDocument};
use csp_core::EngineSettings;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::watch::WatchRegistry;

/// Payload of the `modules_changed` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ModulesChanged {
    pub new_value: Vec<String>,
    pub old_value: Vec<String>,
}

pub struct Project {
    document: SharedDocument,
    configs: DocumentStore,
    gen: DocumentStore,
    evaluator: Evaluator,
    watches: WatchRegistry,
    changed: Emitter<ChangeEvent>,
    modules_changed: Emitter<ModulesChanged>,
    modules: RefCell<BTreeSet<String>>,
    saved: RefCell<Value>,
    settings: RefCell<EngineSettings>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name())
            .field("modules", &self.modules.borrow())
            .field("watches", &self.watches)
            .finish()
    }
}

impl Project {
    /// Take ownership of `document` and wire its stores.
    ///
    /// Missing `configs`/`gen` sections are created. An existing `modules`
    /// list seeds the active-module set.
    pub fn new(document: Value, settings: EngineSettings) -> Rc<Self> {
        let modules: BTreeSet<String> = document
            .get("modules")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let document: SharedDocument = Rc::new(RefCell::new(document));
        let configs = DocumentStore::new(Rc::clone(&document), "configs");
        let gen = DocumentStore::new(Rc::clone(&document), "gen");
        let saved = document.borrow().clone();

        Rc::new_cyclic(|weak: &Weak<Project>| {
            let project = weak.clone();
            configs.on_changed(move |event| {
                if let Some(project) = project.upgrade() {
                    project.dispatch(event.prefixed("configs"));
                }
            });
            let project = weak.clone();
            gen.on_changed(move |event| {
                if let Some(project) = project.upgrade() {
                    project.dispatch(event.prefixed("gen"));
                }
            });

            Project {
                document,
                configs,
                gen,
                evaluator: Evaluator::new(),
                watches: WatchRegistry::new(),
                changed: Emitter::new(),
                modules_changed: Emitter::new(),
                modules: RefCell::new(modules),
                saved: RefCell::new(saved),
                settings: RefCell::new(settings),
            }
        })
    }

    fn dispatch(&self, event: ChangeEvent) {
        self.watches.notify(&event.path);
        self.changed.emit(&event);
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// A copy of the whole document.
    pub fn snapshot(&self) -> Value {
        self.document.borrow().clone()
    }

    pub fn configs(&self) -> &DocumentStore {
        &self.configs
    }

    pub fn gen(&self) -> &DocumentStore {
        &self.gen
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    /// Evaluate `expression` against the whole document.
    pub fn evaluate(&self, expression: &str, fallback: Value) -> Value {
        let document = self.document.borrow();
        self.evaluator.evaluate(expression, &document, fallback)
    }

    pub fn evaluate_bool(&self, expression: &str, fallback: bool) -> bool {
        let document = self.document.borrow();
        self.evaluator.evaluate_bool(expression, &document, fallback)
    }

    pub fn evaluate_number(&self, expression: &str, fallback: f64) -> f64 {
        let document = self.document.borrow();
        self.evaluator.evaluate_number(expression, &document, fallback)
    }

    /// Register a handler for every document change (configs, gen, modules).
    pub fn on_changed(&self, handler: impl Fn(&ChangeEvent) + 'static) -> ListenerId {
        self.changed.on(handler)
    }

    pub fn off_changed(&self, id: ListenerId) -> bool {
        self.changed.off(id)
    }

    pub fn on_modules_changed(&self, handler: impl Fn(&ModulesChanged) + 'static) -> ListenerId {
        self.modules_changed.on(handler)
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings.borrow().clone()
    }

    pub fn locale(&self) -> String {
        self.settings.borrow().locale.clone()
    }

    pub fn set_locale(&self, locale: &str) {
        self.settings.borrow_mut().locale = locale.to_string();
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    fn top_level_str(&self, key: &str) -> String {
        self.document
            .borrow()
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn name(&self) -> String {
        self.top_level_str("name")
    }

    pub fn vendor(&self) -> String {
        self.top_level_str("vendor")
    }

    pub fn target_chip(&self) -> String {
        self.top_level_str("targetChip")
    }

    // ------------------------------------------------------------------
    // Active modules
    // ------------------------------------------------------------------

    /// Active IP instances, sorted.
    pub fn modules(&self) -> Vec<String> {
        self.modules.borrow().iter().cloned().collect()
    }

    pub fn has_module(&self, instance: &str) -> bool {
        self.modules.borrow().contains(instance)
    }

    /// Returns false if `instance` was already active.
    pub fn add_module(&self, instance: &str) -> bool {
        let old = self.modules();
        if !self.modules.borrow_mut().insert(instance.to_string()) {
            return false;
        }
        self.publish_modules(old);
        true
    }

    /// Returns false if `instance` was not active.
    pub fn remove_module(&self, instance: &str) -> bool {
        let old = self.modules();
        if !self.modules.borrow_mut().remove(instance) {
            return false;
        }
        self.publish_modules(old);
        true
    }

    fn publish_modules(&self, old: Vec<String>) {
        let new = self.modules();
        debug!(modules = ?new, "active modules changed");
        let new_value = Value::from(new.clone());
        {
            let mut document = self.document.borrow_mut();
            if let Some(map) = document.as_object_mut() {
                if new.is_empty() {
                    map.remove("modules");
                } else {
                    map.insert("modules".to_string(), new_value.clone());
                }
            }
        }
        self.dispatch(ChangeEvent {
            path: vec!["modules".to_string()],
            new_value,
            old_value: Value::from(old.clone()),
        });
        self.modules_changed.emit(&ModulesChanged {
            new_value: new,
            old_value: old,
        });
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Whether the document differs from the last saved snapshot.
    pub fn is_dirty(&self) -> bool {
        *self.document.borrow() != *self.saved.borrow()
    }

    /// Record the current document as saved.
    pub fn mark_saved(&self) {
        *self.saved.borrow_mut() = self.snapshot();
    }

    // ------------------------------------------------------------------
    // Pins
    // ------------------------------------------------------------------

    /// The configuration of one pin, if any is recorded.
    pub fn pin(&self, name: &str) -> Option<PinConfig> {
        self.configs
            .get(&format!("pins.{name}"))
            .and_then(|v| serde_json::from_value(v).ok())
    }

    // ------------------------------------------------------------------
    // Generation settings
    // ------------------------------------------------------------------

    pub fn hal(&self) -> String {
        self.gen.get_str("hal", "")
    }

    pub fn set_hal(&self, hal: &str) -> bool {
        self.gen.set("hal", Value::from(hal))
    }

    pub fn hal_version(&self) -> String {
        self.gen.get_str("halVersion", "latest")
    }

    pub fn set_hal_version(&self, version: &str) -> bool {
        self.gen.set("halVersion", Value::from(version))
    }

    pub fn builder(&self) -> String {
        self.gen.get_str("builder", "")
    }

    pub fn set_builder(&self, builder: &str) -> bool {
        self.gen.set("builder", Value::from(builder))
    }

    pub fn builder_version(&self) -> String {
        self.gen.get_str("builderVersion", "latest")
    }

    pub fn toolchains(&self) -> String {
        self.gen.get_str("toolchains", "")
    }

    pub fn toolchains_version(&self) -> String {
        self.gen.get_str("toolchainsVersion", "latest")
    }

    pub fn copy_library(&self) -> bool {
        self.gen.get_bool("copyLibrary", false)
    }

    pub fn set_copy_library(&self, copy: bool) -> bool {
        self.gen.set("copyLibrary", Value::Bool(copy))
    }

    pub fn use_toolchains_package(&self) -> bool {
        self.gen.get_bool("useToolchainsPackage", false)
    }

    /// Linker settings; `-1` means unset.
    pub fn linker(&self) -> LinkerSettings {
        let size = |key: &str| {
            self.gen
                .get(&format!("linker.{key}"))
                .and_then(|v| v.as_i64())
                .unwrap_or(-1)
        };
        LinkerSettings {
            heap_size: size("heapSize"),
            stack_size: size("stackSize"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkerSettings {
    pub heap_size: i64,
    pub stack_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn project(doc: Value) -> Rc<Project> {
        Project::new(doc, EngineSettings::default())
    }

    #[test]
    fn test_store_changes_are_prefixed() {
        let project = project(json!({"name": "demo"}));
        let paths = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&paths);
        project.on_changed(move |e| sink.borrow_mut().push(e.path_string()));

        project.configs().set("USART1.mode", json!("sync"));
        project.gen().set("hal", json!("csp_hal_apm32f1"));
        assert_eq!(*paths.borrow(), vec!["configs.USART1.mode", "gen.hal"]);
        assert_eq!(project.hal(), "csp_hal_apm32f1");
    }

    #[test]
    fn test_modules_written_back_sorted() {
        let project = project(json!({"modules": ["USART1"]}));
        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&changes);
        project.on_modules_changed(move |c| sink.borrow_mut().push(c.clone()));

        assert!(project.add_module("ADC1"));
        assert!(!project.add_module("ADC1"));
        assert_eq!(project.snapshot()["modules"], json!(["ADC1", "USART1"]));

        assert!(project.remove_module("USART1"));
        assert!(!project.remove_module("USART1"));
        assert_eq!(project.modules(), vec!["ADC1"]);
        assert_eq!(changes.borrow().len(), 2);
        assert_eq!(changes.borrow()[1].old_value, vec!["ADC1", "USART1"]);

        project.remove_module("ADC1");
        assert!(project.snapshot().get("modules").is_none());
    }

    #[test]
    fn test_dirty_tracking() {
        let project = project(json!({"configs": {"RCM": {"hse": 8}}}));
        assert!(!project.is_dirty());
        project.configs().set("RCM.hse", json!(16));
        assert!(project.is_dirty());
        project.mark_saved();
        assert!(!project.is_dirty());
        project.configs().set("RCM.hse", json!(16));
        assert!(!project.is_dirty());
    }

    #[test]
    fn test_gen_defaults() {
        let project = project(json!({"gen": {"linker": {"heapSize": 512}}}));
        assert_eq!(project.hal_version(), "latest");
        assert_eq!(project.builder(), "");
        assert!(!project.copy_library());
        assert_eq!(
            project.linker(),
            LinkerSettings {
                heap_size: 512,
                stack_size: -1
            }
        );
        assert!(project.set_copy_library(true));
        assert!(project.copy_library());
    }

    #[test]
    fn test_evaluate_sees_whole_document() {
        let project = project(json!({"configs": {"USART1": {"mode": "sync"}}, "modules": ["USART1"]}));
        assert!(project.evaluate_bool("configs.USART1.mode == 'sync'", false));
        assert!(project.evaluate_bool("'USART1' in modules", false));
        assert!(!project.evaluate_bool("configs.SPI1.mode == 'sync'", false));
    }

    #[test]
    fn test_pin_read_model() {
        let project = project(json!({"configs": {"pins": {"PA9": {"function": "SPI1_MOSI", "locked": true}}}}));
        let pin = project.pin("PA9").unwrap();
        assert_eq!(pin.function.as_deref(), Some("SPI1_MOSI"));
        assert_eq!(pin.locked, Some(true));
        assert!(project.pin("PB0").is_none());
    }
}
