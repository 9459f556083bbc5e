//! Live parameters.
//!
//! One [`Parameter`] binds one static definition to one configuration path
//! (`<instance>[.<channel>].<name>`). The cached value always equals the
//! store's value at that path, or the default when absent. Enablement and
//! numeric bounds are [`Derived`] values kept current by the project's
//! watch registry.

use csp_core::event::{ChangeEvent, Emitter, ListenerId};
use csp_core::expr::number;
use csp_core::model::{
    Conditional, LocalizedText, ParameterDefinition, ParameterKind, ValueUnitDefinition,
};
use csp_core::path::starts_with;
use csp_core::store::ConfigStore;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::ip::IpContext;
use crate::project::Project;
use crate::selector::{ConditionalBlock, Selector};
use crate::tracked::{Derived, MAX_SAFE_INTEGER, MIN_SAFE_INTEGER};

/// Payload of a parameter's value channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub new_value: Value,
    pub old_value: Value,
}

/// State shared by every parameter type.
pub struct ParameterBase {
    name: String,
    path: String,
    segments: Vec<String>,
    definition: ParameterDefinition,
    default: Value,
    project: Weak<Project>,
    enabled: Derived<bool>,
    value: RefCell<Value>,
    listener: Cell<Option<ListenerId>>,
    value_changed: Emitter<ValueChange>,
}

impl std::fmt::Debug for ParameterBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterBase")
            .field("path", &self.path)
            .field("type", &self.definition.kind.type_name())
            .field("value", &self.value.borrow())
            .finish()
    }
}

impl ParameterBase {
    fn new(
        project: &Rc<Project>,
        context: &IpContext,
        name: &str,
        channel: Option<&str>,
        definition: &ParameterDefinition,
    ) -> Self {
        let path = match channel {
            Some(channel) => format!("{}.{channel}.{name}", context.instance()),
            None => format!("{}.{name}", context.instance()),
        };
        let default = definition.kind.default_value();
        let value = project.configs().get_or(&path, default.clone());

        ParameterBase {
            name: name.to_string(),
            segments: path.split('.').map(String::from).collect(),
            path,
            definition: definition.clone(),
            default,
            project: Rc::downgrade(project),
            enabled: Derived::toggle(project, definition.enabled.as_ref(), context.placeholders()),
            value: RefCell::new(value),
            listener: Cell::new(None),
            value_changed: Emitter::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store path, relative to `configs`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn definition(&self) -> &ParameterDefinition {
        &self.definition
    }

    pub fn type_name(&self) -> &'static str {
        self.definition.kind.type_name()
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Write `value` to the store; `null` writes the default.
    ///
    /// Returns false when the store already held the value.
    pub fn set(&self, value: Value) -> bool {
        let Some(project) = self.project.upgrade() else {
            return false;
        };
        let value = if value.is_null() {
            self.default.clone()
        } else {
            value
        };
        project.configs().set(&self.path, value)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn enabled_flag(&self) -> &Derived<bool> {
        &self.enabled
    }

    pub fn readonly(&self) -> bool {
        self.definition.readonly.unwrap_or(false)
    }

    pub fn visible(&self) -> bool {
        self.definition.visible.unwrap_or(true)
    }

    pub fn display(&self) -> String {
        self.localized(self.definition.display.as_ref())
    }

    pub fn description(&self) -> String {
        self.localized(self.definition.description.as_ref())
    }

    fn localized(&self, text: Option<&LocalizedText>) -> String {
        let locale = self
            .project
            .upgrade()
            .map(|p| p.locale())
            .unwrap_or_else(|| "en".to_string());
        text.map(|t| t.get(&locale).to_string()).unwrap_or_default()
    }

    pub fn on_value_changed(&self, handler: impl Fn(&ValueChange) + 'static) -> ListenerId {
        self.value_changed.on(handler)
    }

    pub fn off_value_changed(&self, id: ListenerId) -> bool {
        self.value_changed.off(id)
    }

    /// A store change at this path, one of its ancestors or one of its
    /// descendants. A write below a scalar turns it into an object.
    fn affects(&self, event: &ChangeEvent) -> bool {
        let changed = event.path.as_slice();
        starts_with(self.segments.as_slice(), changed) || starts_with(changed, self.segments.as_slice())
    }

    /// Re-read the store. The store is read rather than the event payload
    /// because nested writes may have landed since the event was emitted.
    fn refresh(&self) {
        let Some(project) = self.project.upgrade() else {
            return;
        };
        let next = project.configs().get_or(&self.path, self.default.clone());
        if *self.value.borrow() == next {
            return;
        }
        let old_value = self.value.replace(next.clone());
        self.value_changed.emit(&ValueChange {
            new_value: next,
            old_value,
        });
    }
}

impl Drop for ParameterBase {
    fn drop(&mut self) {
        if let (Some(project), Some(id)) = (self.project.upgrade(), self.listener.get()) {
            project.configs().off(id);
        }
    }
}

/// Availability of an enum value, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    pub is_enabled: bool,
    /// Empty when enabled.
    pub reason: String,
}

/// One selectable value of an enum parameter.
pub struct ValueUnit {
    name: String,
    comment: LocalizedText,
    enabled: Derived<bool>,
    /// Signal name (placeholders substituted) to GPIO mode.
    signals: BTreeMap<String, String>,
    context: Rc<IpContext>,
}

impl std::fmt::Debug for ValueUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueUnit")
            .field("name", &self.name)
            .field("signals", &self.signals)
            .finish()
    }
}

impl ValueUnit {
    fn new(
        project: &Rc<Project>,
        context: &Rc<IpContext>,
        name: &str,
        definition: &ValueUnitDefinition,
    ) -> Self {
        let signals = definition
            .signals
            .iter()
            .flatten()
            .map(|(signal, unit)| (context.placeholders().substitute(signal), unit.mode.clone()))
            .collect();

        ValueUnit {
            name: name.to_string(),
            comment: definition.comment.clone().unwrap_or_default(),
            enabled: Derived::toggle(project, definition.enabled.as_ref(), context.placeholders()),
            signals,
            context: Rc::clone(context),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self, locale: &str) -> &str {
        self.comment.get(locale)
    }

    /// The value's own `enabled` flag.
    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn signals(&self) -> &BTreeMap<String, String> {
        &self.signals
    }

    /// Pins that can carry any of this value's signals.
    pub fn pins(&self) -> Vec<String> {
        let signals: Vec<&String> = self.signals.keys().collect();
        self.context.summary().find_pins_by_signals(&signals)
    }

    /// Check this value's signals against locked pins.
    ///
    /// A pin conflicts when it is locked to a function other than the
    /// signal this value would route to it.
    pub fn validity(&self) -> Validity {
        let Some(project) = self.context.project() else {
            return Validity {
                is_enabled: true,
                reason: String::new(),
            };
        };
        let pins = project.configs().get("pins").unwrap_or(Value::Null);

        let mut conflicts = BTreeMap::new();
        for signal in self.signals.keys() {
            for pin in self.context.summary().find_pins_by_signals(&[signal]) {
                let Some(config) = pins.get(&pin) else {
                    continue;
                };
                let locked = config.get("locked").and_then(Value::as_bool) == Some(true);
                let function = config.get("function").and_then(Value::as_str).unwrap_or("");
                if locked && function != signal {
                    conflicts.insert(pin, function.to_string());
                }
            }
        }

        if conflicts.is_empty() {
            return Validity {
                is_enabled: true,
                reason: String::new(),
            };
        }
        let lines: Vec<String> = conflicts
            .iter()
            .map(|(pin, function)| format!("{pin} -> {function}"))
            .collect();
        Validity {
            is_enabled: false,
            reason: format!("pin conflict:\n{}", lines.join("\n")),
        }
    }
}

#[derive(Debug)]
pub struct EnumParameter {
    base: ParameterBase,
    values: BTreeMap<String, ValueUnit>,
}

impl EnumParameter {
    pub fn values(&self) -> &BTreeMap<String, ValueUnit> {
        &self.values
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains_key(value)
    }

    pub fn default_str(&self) -> &str {
        self.base.default.as_str().unwrap_or_default()
    }

    /// Sorted union of every value's signals.
    pub fn all_signals(&self) -> Vec<String> {
        let mut signals: Vec<String> = self
            .values
            .values()
            .flat_map(|unit| unit.signals.keys().cloned())
            .collect();
        signals.sort();
        signals.dedup();
        signals
    }

    /// Signals of the currently selected value.
    pub fn signals(&self) -> Option<&BTreeMap<String, String>> {
        let value = self.base.value();
        let current = value.as_str()?;
        self.values.get(current).map(|unit| &unit.signals)
    }
}

#[derive(Debug)]
pub struct NumberParameter {
    base: ParameterBase,
    integer: bool,
    min: Derived<f64>,
    max: Derived<f64>,
}

impl NumberParameter {
    pub fn is_integer(&self) -> bool {
        self.integer
    }

    pub fn min(&self) -> f64 {
        self.min.get()
    }

    pub fn max(&self) -> f64 {
        self.max.get()
    }

    pub fn min_bound(&self) -> &Derived<f64> {
        &self.min
    }

    pub fn max_bound(&self) -> &Derived<f64> {
        &self.max
    }

    pub fn default_number(&self) -> f64 {
        self.base.default.as_f64().unwrap_or_default()
    }

    /// Current value as a number; a non-numeric stored value reads as the
    /// default.
    pub fn number(&self) -> f64 {
        self.base
            .value()
            .as_f64()
            .unwrap_or_else(|| self.default_number())
    }

    /// Fit `candidate` into `[min, max]`: out of range falls back to the
    /// default, and a default that is also out of range falls back to `min`.
    pub fn clamp(&self, candidate: f64) -> f64 {
        let (min, max) = (self.min(), self.max());
        let in_range = |v: f64| v >= min && v <= max;
        if in_range(candidate) {
            candidate
        } else if in_range(self.default_number()) {
            self.default_number()
        } else {
            min
        }
    }

    /// Store `value`, rounded for integer parameters.
    pub fn set_number(&self, value: f64) -> bool {
        let value = if self.integer { value.round() } else { value };
        self.base.set(number(value))
    }
}

/// A live parameter, one variant per definition type.
#[derive(Debug)]
pub enum Parameter {
    Enum(EnumParameter),
    Number(NumberParameter),
    Boolean(ParameterBase),
    String(ParameterBase),
}

impl Parameter {
    /// Build a parameter for `name` (optionally under `channel`) and keep
    /// its value in step with the `configs` store.
    pub fn new(
        project: &Rc<Project>,
        context: &Rc<IpContext>,
        name: &str,
        channel: Option<&str>,
        definition: &ParameterDefinition,
    ) -> Rc<Parameter> {
        let base = ParameterBase::new(project, context, name, channel, definition);
        let parameter = match &definition.kind {
            ParameterKind::Enum { values, .. } => Parameter::Enum(EnumParameter {
                base,
                values: values
                    .iter()
                    .map(|(value, unit)| (value.clone(), ValueUnit::new(project, context, value, unit)))
                    .collect(),
            }),
            ParameterKind::Integer(n) | ParameterKind::Float(n) => {
                let placeholders = context.placeholders();
                Parameter::Number(NumberParameter {
                    base,
                    integer: matches!(definition.kind, ParameterKind::Integer(_)),
                    min: Derived::bound(project, n.min.as_ref(), placeholders, MIN_SAFE_INTEGER),
                    max: Derived::bound(project, n.max.as_ref(), placeholders, MAX_SAFE_INTEGER),
                })
            }
            ParameterKind::Boolean { .. } => Parameter::Boolean(base),
            ParameterKind::String { .. } => Parameter::String(base),
        };
        let parameter = Rc::new(parameter);

        let weak = Rc::downgrade(&parameter);
        let id = project.configs().on_changed(move |event| {
            if let Some(parameter) = weak.upgrade() {
                if parameter.base().affects(event) {
                    parameter.base().refresh();
                }
            }
        });
        parameter.base().listener.set(Some(id));
        parameter
    }

    pub fn base(&self) -> &ParameterBase {
        match self {
            Parameter::Enum(p) => &p.base,
            Parameter::Number(p) => &p.base,
            Parameter::Boolean(base) | Parameter::String(base) => base,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumParameter> {
        match self {
            Parameter::Enum(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&NumberParameter> {
        match self {
            Parameter::Number(p) => Some(p),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        self.base().name()
    }

    pub fn path(&self) -> &str {
        self.base().path()
    }

    pub fn type_name(&self) -> &'static str {
        self.base().type_name()
    }

    pub fn value(&self) -> Value {
        self.base().value()
    }

    pub fn set(&self, value: Value) -> bool {
        self.base().set(value)
    }

    pub fn default_value(&self) -> &Value {
        self.base().default_value()
    }

    pub fn enabled(&self) -> bool {
        self.base().enabled()
    }

    pub fn readonly(&self) -> bool {
        self.base().readonly()
    }

    pub fn visible(&self) -> bool {
        self.base().visible()
    }

    pub fn on_value_changed(&self, handler: impl Fn(&ValueChange) + 'static) -> ListenerId {
        self.base().on_value_changed(handler)
    }
}

/// The live parameter(s) behind one parameter name.
///
/// A name defined by a conditional block has one parameter per entry; the
/// block's selector decides which one is current.
#[derive(Debug)]
pub enum ParameterSlot {
    Fixed(Rc<Parameter>),
    Conditional(ConditionalBlock<Rc<Parameter>>),
}

impl ParameterSlot {
    /// Build the slot for `name`, one parameter per definition entry.
    pub fn new(
        project: &Rc<Project>,
        context: &Rc<IpContext>,
        name: &str,
        channel: Option<&str>,
        definition: &Conditional<ParameterDefinition>,
    ) -> Self {
        match definition {
            Conditional::Plain(definition) => {
                ParameterSlot::Fixed(Parameter::new(project, context, name, channel, definition))
            }
            Conditional::Variants(_) => ParameterSlot::Conditional(ConditionalBlock::build(
                project,
                definition,
                context.placeholders(),
                |definition| Parameter::new(project, context, name, channel, definition),
            )),
        }
    }

    /// The parameter currently in effect, if any entry is active.
    pub fn current(&self) -> Option<Rc<Parameter>> {
        match self {
            ParameterSlot::Fixed(parameter) => Some(Rc::clone(parameter)),
            ParameterSlot::Conditional(block) => block.current().cloned(),
        }
    }

    /// Every parameter of the slot, in definition order.
    pub fn variants(&self) -> Vec<Rc<Parameter>> {
        match self {
            ParameterSlot::Fixed(parameter) => vec![Rc::clone(parameter)],
            ParameterSlot::Conditional(block) => block.items().to_vec(),
        }
    }

    pub fn selector(&self) -> Option<&Rc<Selector>> {
        match self {
            ParameterSlot::Fixed(_) => None,
            ParameterSlot::Conditional(block) => block.selector(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_core::expr::Placeholders;
    use csp_core::summary::ChipSummary;
    use csp_core::EngineSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup(doc: Value, summary: Value) -> (Rc<Project>, Rc<IpContext>) {
        let project = Project::new(doc, EngineSettings::default());
        let summary: ChipSummary = serde_json::from_value(summary).unwrap();
        let context = IpContext::new(&project, Placeholders::new("USART1", "USART"), Rc::new(summary));
        (project, context)
    }

    fn definition(value: Value) -> ParameterDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_value_tracks_store_and_default() {
        let (project, context) = setup(json!({}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "parity",
            None,
            &definition(json!({"type": "string", "default": "none"})),
        );
        assert_eq!(p.path(), "USART1.parity");
        assert_eq!(p.value(), json!("none"));

        project.configs().set("USART1.parity", json!("even"));
        assert_eq!(p.value(), json!("even"));

        project.configs().set("USART1", json!({"parity": "odd"}));
        assert_eq!(p.value(), json!("odd"));

        project.configs().set("USART1", Value::Null);
        assert_eq!(p.value(), json!("none"));
    }

    #[test]
    fn test_write_below_value_refreshes() {
        let (project, context) = setup(json!({"configs": {"USART1": {"mode": "async"}}}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "mode",
            None,
            &definition(json!({"type": "string", "default": "async"})),
        );
        project.configs().set("USART1.mode.x", json!(1));
        assert_eq!(p.value(), json!({"x": 1}));

        project.configs().set("USART1.modem", json!("on"));
        assert_eq!(p.value(), json!({"x": 1}));
    }

    #[test]
    fn test_set_null_writes_default() {
        let (project, context) = setup(json!({"configs": {"USART1": {"enable": false}}}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "enable",
            None,
            &definition(json!({"type": "boolean", "default": true})),
        );
        assert!(p.set(Value::Null));
        assert_eq!(project.configs().get("USART1.enable"), Some(json!(true)));
        assert!(!p.set(json!(true)));
    }

    #[test]
    fn test_channel_path() {
        let (project, context) = setup(json!({}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "sample_time",
            Some("CH3"),
            &definition(json!({"type": "integer", "default": 1})),
        );
        assert_eq!(p.path(), "USART1.CH3.sample_time");
        assert_eq!(p.value(), json!(1));
    }

    #[test]
    fn test_clamp_falls_back_to_default_then_min() {
        let (project, context) = setup(json!({}), json!({}));
        let in_range = Parameter::new(
            &project,
            &context,
            "a",
            None,
            &definition(json!({"type": "integer", "default": 5, "min": 0, "max": 10})),
        );
        let number = in_range.as_number().unwrap();
        assert_eq!(number.clamp(15.0), 5.0);
        assert_eq!(number.clamp(7.0), 7.0);

        let out_of_range = Parameter::new(
            &project,
            &context,
            "b",
            None,
            &definition(json!({"type": "integer", "default": 20, "min": 0, "max": 10})),
        );
        assert_eq!(out_of_range.as_number().unwrap().clamp(15.0), 0.0);
    }

    #[test]
    fn test_expression_bounds_follow_dependencies() {
        let (project, context) = setup(json!({}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "prescaler",
            None,
            &definition(json!({
                "type": "float", "default": 1.5,
                "max": "configs.${IP_INSTANCE}.limit"
            })),
        );
        let number = p.as_number().unwrap();
        assert_eq!(number.min(), MIN_SAFE_INTEGER);
        assert_eq!(number.max(), MAX_SAFE_INTEGER);
        project.configs().set("USART1.limit", json!(4));
        assert_eq!(number.max(), 4.0);
        assert_eq!(number.clamp(9.0), 1.5);
    }

    #[test]
    fn test_enabled_expression() {
        let (project, context) = setup(json!({}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "clock",
            None,
            &definition(json!({
                "type": "boolean", "default": false,
                "enabled": "configs.${IP_INSTANCE}.mode == 'sync'"
            })),
        );
        assert!(!p.enabled());
        project.configs().set("USART1.mode", json!("sync"));
        assert!(p.enabled());
    }

    #[test]
    fn test_value_change_notifications() {
        let (project, context) = setup(json!({}), json!({}));
        let p = Parameter::new(
            &project,
            &context,
            "mode",
            None,
            &definition(json!({"type": "enum", "default": "async", "values": {"async": {}, "sync": {}}})),
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        p.on_value_changed(move |c| sink.borrow_mut().push(c.new_value.clone()));

        p.set(json!("sync"));
        project.configs().set("USART1.other", json!(1));
        p.set(Value::Null);
        assert_eq!(*seen.borrow(), vec![json!("sync"), json!("async")]);
    }

    #[test]
    fn test_pin_conflict_reason() {
        let (project, context) = setup(
            json!({"configs": {"pins": {"PA9": {"function": "SPI1_MOSI", "locked": true}}}}),
            json!({"pins": {
                "PA9": {"signals": ["USART1_TX", "SPI1_MOSI"]},
                "PB6": {"signals": ["USART1_TX"]}
            }}),
        );
        let p = Parameter::new(
            &project,
            &context,
            "mode",
            None,
            &definition(json!({
                "type": "enum", "default": "disabled",
                "values": {
                    "disabled": {},
                    "tx": {"signals": {"${IP_INSTANCE}_TX": {"mode": "GPIO:AF_PP"}}}
                }
            })),
        );
        let e = p.as_enum().unwrap();
        let tx = &e.values()["tx"];
        assert_eq!(tx.pins(), vec!["PA9", "PB6"]);

        let validity = tx.validity();
        assert!(!validity.is_enabled);
        assert!(validity.reason.contains("PA9"));
        assert!(validity.reason.contains("SPI1_MOSI"));
        assert_eq!(validity.reason, "pin conflict:\nPA9 -> SPI1_MOSI");

        assert!(e.values()["disabled"].validity().is_enabled);

        project.configs().set("pins.PA9.function", json!("USART1_TX"));
        assert_eq!(tx.validity().reason, "");
        assert_eq!(e.all_signals(), vec!["USART1_TX"]);
    }

    #[test]
    fn test_drop_releases_store_listener() {
        let (project, context) = setup(json!({}), json!({}));
        let before = format!("{:?}", project.configs());
        let p = Parameter::new(
            &project,
            &context,
            "x",
            None,
            &definition(json!({"type": "integer", "default": 0, "min": "configs.A.min"})),
        );
        assert_eq!(project.watches().watcher_count(), 1);
        drop(p);
        assert_eq!(project.watches().watcher_count(), 0);
        assert_eq!(format!("{:?}", project.configs()), before);
    }

    #[test]
    fn test_conditional_slot_switches_parameter() {
        let (project, context) = setup(json!({}), json!({}));
        let definition: Conditional<ParameterDefinition> = serde_json::from_value(json!([
            {"condition": "configs.RCM.div == '/1'", "content": {"type": "enum", "default": "x1", "values": {"x1": {}}}},
            {"condition": "default", "content": {"type": "enum", "default": "x2", "values": {"x2": {}, "x4": {}}}}
        ]))
        .unwrap();
        let slot = ParameterSlot::new(&project, &context, "mul", None, &definition);
        assert_eq!(slot.variants().len(), 2);
        assert_eq!(slot.current().unwrap().default_value(), &json!("x2"));

        project.configs().set("RCM.div", json!("/1"));
        let current = slot.current().unwrap();
        assert_eq!(current.default_value(), &json!("x1"));
        assert_eq!(current.path(), "USART1.mul");
        assert!(slot.selector().is_some());
    }
}
