//! Reference parameter overlays.
//!
//! A [`RefParameter`] narrows a base parameter inside one entry of a
//! container or preset: an extra condition, an allowed subset of enum
//! values, an alternate default. While its entry is the active one it keeps
//! the base parameter consistent with those restrictions:
//!
//! - condition false: the base value is forced to the overlay default
//! - enum value outside the allowed set: forced to the overlay default
//!
//! Enforcement re-runs when the condition flips, when the base parameter's
//! own variant switches, when the entry becomes active, and when the base
//! value changes. Every write goes through the store, whose equal-value
//! rule stops the cascade once the base is consistent.

use csp_core::event::ListenerId;
use csp_core::model::RefParameterDefinition;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::ip::IpContext;
use crate::parameter::{Parameter, ParameterSlot};
use crate::project::Project;
use crate::tracked::Derived;

pub struct RefParameter {
    name: String,
    definition: RefParameterDefinition,
    slot: Option<Rc<ParameterSlot>>,
    condition: Derived<bool>,
    enforcing: bool,
    active: Cell<bool>,
    value_listeners: RefCell<Vec<(Rc<Parameter>, ListenerId)>>,
    variant_listener: Cell<Option<ListenerId>>,
}

impl std::fmt::Debug for RefParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefParameter")
            .field("name", &self.name)
            .field("condition", &self.condition())
            .field("active", &self.active.get())
            .finish()
    }
}

impl RefParameter {
    /// Build an overlay on `slot`. `None` stands for a parameter name the
    /// IP does not define; such an overlay never enforces anything.
    pub fn new(
        project: &Rc<Project>,
        context: &IpContext,
        name: &str,
        definition: &RefParameterDefinition,
        slot: Option<Rc<ParameterSlot>>,
        enforcing: bool,
    ) -> Rc<Self> {
        let condition = match &definition.condition {
            Some(expression) => Derived::condition(project, expression, context.placeholders()),
            None => Derived::Fixed(true),
        };

        let overlay = Rc::new(RefParameter {
            name: name.to_string(),
            definition: definition.clone(),
            slot,
            condition,
            enforcing,
            active: Cell::new(false),
            value_listeners: RefCell::new(Vec::new()),
            variant_listener: Cell::new(None),
        });
        if enforcing {
            overlay.connect();
        }
        overlay
    }

    fn connect(self: &Rc<Self>) {
        let weak: Weak<Self> = Rc::downgrade(self);
        self.condition.on_changed(move |_| {
            if let Some(overlay) = weak.upgrade() {
                overlay.enforce();
            }
        });

        let Some(slot) = &self.slot else {
            return;
        };
        if let Some(selector) = slot.selector() {
            let weak = Rc::downgrade(self);
            let id = selector.on_changed(move |_| {
                if let Some(overlay) = weak.upgrade() {
                    overlay.enforce();
                }
            });
            self.variant_listener.set(Some(id));
        }
        for parameter in slot.variants() {
            let weak = Rc::downgrade(self);
            let target = Rc::downgrade(&parameter);
            let id = parameter.on_value_changed(move |_| {
                let (Some(overlay), Some(target)) = (weak.upgrade(), target.upgrade()) else {
                    return;
                };
                // Only the variant in effect is gated.
                if overlay.parameter().is_some_and(|p| Rc::ptr_eq(&p, &target)) {
                    overlay.enforce();
                }
            });
            self.value_listeners.borrow_mut().push((parameter, id));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &RefParameterDefinition {
        &self.definition
    }

    /// The base parameter currently in effect.
    pub fn parameter(&self) -> Option<Rc<Parameter>> {
        self.slot.as_ref().and_then(|slot| slot.current())
    }

    pub fn condition(&self) -> bool {
        self.condition.get()
    }

    /// Whether this overlay's entry is the one gating the base parameter.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// The overlay's own default, else the base parameter's.
    pub fn default_value(&self) -> Value {
        match &self.definition.default {
            Some(default) => default.clone(),
            None => self
                .parameter()
                .map(|p| p.default_value().clone())
                .unwrap_or(Value::Null),
        }
    }

    /// Allowed enum values: the overlay's subset, else every base value.
    /// Empty for non-enum parameters.
    pub fn values(&self) -> Vec<String> {
        let Some(parameter) = self.parameter() else {
            return Vec::new();
        };
        let Some(base) = parameter.as_enum() else {
            return Vec::new();
        };
        match &self.definition.values {
            Some(values) if !values.is_empty() => values.clone(),
            _ => base.values().keys().cloned().collect(),
        }
    }

    /// An inactive condition makes the overlay read-only.
    pub fn readonly(&self) -> bool {
        self.definition.readonly.unwrap_or(false)
            || self.parameter().is_some_and(|p| p.readonly())
            || !self.condition()
    }

    /// Mark this overlay's entry active or inactive.
    ///
    /// Activation enforces immediately and writes a default that currently
    /// only exists implicitly, so the document records it.
    pub fn set_active(&self, active: bool) {
        if self.active.replace(active) == active || !active {
            return;
        }
        self.enforce();
        if self.enforcing {
            if let Some(parameter) = self.parameter() {
                let default = self.default_value();
                if parameter.value() == default {
                    parameter.set(default);
                }
            }
        }
    }

    /// Force the base parameter back within this overlay's restrictions.
    ///
    /// Does nothing unless the overlay is enforcing and active. Returns true
    /// when a value was written.
    pub fn enforce(&self) -> bool {
        if !self.enforcing || !self.active.get() {
            return false;
        }
        let Some(parameter) = self.parameter() else {
            return false;
        };

        // Watchers on the same path may run before ours; read it fresh.
        self.condition.refresh();
        let default = self.default_value();
        if !self.condition() {
            if parameter.value() != default {
                debug!(path = parameter.path(), value = %default, "condition false, forcing default");
                return parameter.set(default);
            }
            return false;
        }

        if parameter.as_enum().is_some() {
            let current = parameter.value();
            let allowed = current
                .as_str()
                .is_some_and(|v| self.values().iter().any(|a| a == v));
            if !allowed {
                debug!(path = parameter.path(), from = %current, to = %default, "value not allowed, forcing default");
                return parameter.set(default);
            }
        }
        false
    }
}

impl Drop for RefParameter {
    fn drop(&mut self) {
        for (parameter, id) in self.value_listeners.borrow_mut().drain(..) {
            parameter.base().off_value_changed(id);
        }
        if let (Some(selector), Some(id)) = (
            self.slot.as_ref().and_then(|s| s.selector()),
            self.variant_listener.get(),
        ) {
            selector.off(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_core::expr::Placeholders;
    use csp_core::model::{Conditional, ParameterDefinition};
    use csp_core::store::ConfigStore;
    use csp_core::summary::ChipSummary;
    use csp_core::EngineSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> (Rc<Project>, Rc<IpContext>) {
        let project = Project::new(json!({}), EngineSettings::default());
        let context = IpContext::new(
            &project,
            Placeholders::new("USART1", "USART"),
            Rc::new(ChipSummary::default()),
        );
        (project, context)
    }

    fn slot(project: &Rc<Project>, context: &Rc<IpContext>, name: &str, def: Value) -> Rc<ParameterSlot> {
        let def: Conditional<ParameterDefinition> = serde_json::from_value(def).unwrap();
        Rc::new(ParameterSlot::new(project, context, name, None, &def))
    }

    fn overlay(
        project: &Rc<Project>,
        context: &Rc<IpContext>,
        slot: &Rc<ParameterSlot>,
        def: Value,
    ) -> Rc<RefParameter> {
        let def: RefParameterDefinition = serde_json::from_value(def).unwrap();
        RefParameter::new(project, context, "p", &def, Some(Rc::clone(slot)), true)
    }

    fn mode_slot(project: &Rc<Project>, context: &Rc<IpContext>) -> Rc<ParameterSlot> {
        slot(
            project,
            context,
            "virtual_mode",
            json!({"type": "enum", "default": "async_value",
                   "values": {"async_value": {}, "sync_value": {}, "irda": {}}}),
        )
    }

    #[test]
    fn test_false_condition_forces_default_while_active() {
        let (project, context) = setup();
        let slot = mode_slot(&project, &context);
        let sync = overlay(
            &project,
            &context,
            &slot,
            json!({"condition": "configs.USART1.mode == 'sync'", "default": "sync_value"}),
        );
        sync.set_active(true);
        assert_eq!(project.configs().get("USART1.virtual_mode"), Some(json!("sync_value")));
        assert!(sync.readonly());

        project.configs().set("USART1.mode", json!("sync"));
        assert!(!sync.readonly());
        slot.current().unwrap().set(json!("irda"));
        assert_eq!(slot.current().unwrap().value(), json!("irda"));
    }

    #[test]
    fn test_inactive_overlay_never_forces() {
        let (project, context) = setup();
        let slot = mode_slot(&project, &context);
        let sync = overlay(
            &project,
            &context,
            &slot,
            json!({"condition": "configs.USART1.mode == 'sync'", "default": "sync_value"}),
        );
        project.configs().set("USART1.mode", json!("async"));
        assert!(!sync.enforce());
        assert_eq!(slot.current().unwrap().value(), json!("async_value"));
    }

    #[test]
    fn test_disallowed_enum_value_is_replaced() {
        let (project, context) = setup();
        let slot = mode_slot(&project, &context);
        let subset = overlay(
            &project,
            &context,
            &slot,
            json!({"values": ["async_value", "irda"], "default": "irda"}),
        );
        subset.set_active(true);
        assert_eq!(subset.values(), vec!["async_value", "irda"]);

        let parameter = slot.current().unwrap();
        parameter.set(json!("sync_value"));
        assert_eq!(parameter.value(), json!("irda"));
        parameter.set(json!("async_value"));
        assert_eq!(parameter.value(), json!("async_value"));
    }

    #[test]
    fn test_activation_materializes_implicit_default() {
        let (project, context) = setup();
        let slot = mode_slot(&project, &context);
        let plain = overlay(&project, &context, &slot, json!({}));
        assert_eq!(project.configs().get("USART1.virtual_mode"), None);
        plain.set_active(true);
        assert_eq!(project.configs().get("USART1.virtual_mode"), Some(json!("async_value")));
        assert_eq!(plain.default_value(), json!("async_value"));
    }

    #[test]
    fn test_missing_base_is_inert() {
        let (project, context) = setup();
        let def = RefParameterDefinition::default();
        let orphan = RefParameter::new(&project, &context, "ghost", &def, None, true);
        orphan.set_active(true);
        assert!(orphan.parameter().is_none());
        assert_eq!(orphan.default_value(), Value::Null);
        assert!(!orphan.enforce());
        assert!(orphan.values().is_empty());
    }

    #[test]
    fn test_readonly_combines_sources() {
        let (project, context) = setup();
        let locked = slot(
            &project,
            &context,
            "locked",
            json!({"type": "boolean", "default": false, "readonly": true}),
        );
        let over = overlay(&project, &context, &locked, json!({}));
        assert!(over.readonly());

        let free = slot(&project, &context, "free", json!({"type": "boolean", "default": false}));
        let own = overlay(&project, &context, &free, json!({"readonly": true}));
        assert!(own.readonly());
        let open = overlay(&project, &context, &free, json!({}));
        assert!(!open.readonly());
    }
}
