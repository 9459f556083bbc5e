//! Static IP definition types.
//!
//! These mirror the definition documents shipped with each chip package:
//! - Parameter definitions (typed, optionally gated by expressions)
//! - Conditional blocks (`[{condition, content}]` with a `default` sentinel)
//! - Reference parameters, containers, presets and diagram image sets
//!
//! Everything here is plain data. The engine crate turns it into live,
//! reactive objects bound to a project.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Condition text that marks the fallback entry of a conditional block.
pub const DEFAULT_CONDITION: &str = "default";

/// A localized string keyed by locale (`en`, `zh_CN`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(pub BTreeMap<String, String>);

impl LocalizedText {
    /// Text for `locale`, falling back to English, then to empty.
    pub fn get(&self, locale: &str) -> &str {
        self.0
            .get(locale)
            .filter(|s| !s.is_empty())
            .or_else(|| self.0.get("en"))
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl From<&str> for LocalizedText {
    fn from(en: &str) -> Self {
        LocalizedText(BTreeMap::from([("en".to_string(), en.to_string())]))
    }
}

/// A flag that is either fixed or computed from an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Toggle {
    Fixed(bool),
    Expression(String),
}

/// A numeric bound that is either fixed or computed from an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Literal(f64),
    Expression(String),
}

/// One entry of a conditional block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalEntry<T> {
    pub condition: String,
    pub content: T,
}

impl<T> ConditionalEntry<T> {
    pub fn is_default(&self) -> bool {
        self.condition == DEFAULT_CONDITION
    }
}

/// Either an ordered list of conditional variants or a single plain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Conditional<T> {
    Variants(Vec<ConditionalEntry<T>>),
    Plain(T),
}

impl<T> Conditional<T> {
    /// All contents in list order (a plain value is a single entry).
    pub fn contents(&self) -> Vec<&T> {
        match self {
            Conditional::Variants(entries) => entries.iter().map(|e| &e.content).collect(),
            Conditional::Plain(content) => vec![content],
        }
    }
}

/// Static definition of one configurable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(flatten)]
    pub kind: ParameterKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<LocalizedText>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LocalizedText>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Toggle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

/// The closed set of parameter types, keyed by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterKind {
    Enum {
        #[serde(default)]
        default: String,
        #[serde(default)]
        values: BTreeMap<String, ValueUnitDefinition>,
    },
    Integer(NumberDefinition),
    Float(NumberDefinition),
    Boolean {
        #[serde(default)]
        default: bool,
    },
    String {
        #[serde(default)]
        default: String,
    },
}

impl ParameterKind {
    /// The `type` tag as written in definitions.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterKind::Enum { .. } => "enum",
            ParameterKind::Integer(_) => "integer",
            ParameterKind::Float(_) => "float",
            ParameterKind::Boolean { .. } => "boolean",
            ParameterKind::String { .. } => "string",
        }
    }

    /// The declared default as a JSON value.
    pub fn default_value(&self) -> Value {
        match self {
            ParameterKind::Enum { default, .. } | ParameterKind::String { default } => {
                Value::String(default.clone())
            }
            ParameterKind::Integer(n) | ParameterKind::Float(n) => crate::expr::number(n.default),
            ParameterKind::Boolean { default } => Value::Bool(*default),
        }
    }
}

/// Integer and float parameters share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberDefinition {
    #[serde(default)]
    pub default: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound>,
}

/// One selectable value of an enum parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueUnitDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<LocalizedText>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Toggle>,

    /// Hardware signals this value claims, keyed by signal name (may contain
    /// instance placeholders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<BTreeMap<String, SignalUnitDefinition>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalUnitDefinition {
    #[serde(default)]
    pub mode: String,
}

/// A contextual overlay on a base parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefParameterDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Allowed subset of the base enum's values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

/// A group of reference parameters (container section or preset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    #[serde(rename = "refParameters", default)]
    pub ref_parameters: BTreeMap<String, RefParameterDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainersDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<Conditional<ObjectDefinition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<Conditional<ObjectDefinition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurations: Option<Conditional<ObjectDefinition>>,

    #[serde(rename = "clockTree", default, skip_serializing_if = "Option::is_none")]
    pub clock_tree: Option<Conditional<ObjectDefinition>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramDefinition {
    #[serde(default)]
    pub images: Vec<String>,
}

/// Full static definition of one IP (peripheral type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpDefinition {
    /// Generic type name (`USART`, `SPI`), used to derive instance affixes.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated: Option<Toggle>,

    #[serde(default)]
    pub parameters: BTreeMap<String, Conditional<ParameterDefinition>>,

    #[serde(default)]
    pub containers: ContainersDefinition,

    #[serde(default)]
    pub presets: BTreeMap<String, Conditional<ObjectDefinition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagrams: Option<Conditional<DiagramDefinition>>,
}

/// Per-pin entry under `configs.pins.<PIN>` in the project document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parameter_kinds_deserialize_by_tag() {
        let enum_def: ParameterDefinition = serde_json::from_value(json!({
            "type": "enum",
            "default": "async",
            "values": {"async": {}, "sync": {"enabled": "configs.RCM.clk > 0"}},
            "display": {"en": "Mode"}
        }))
        .unwrap();
        assert_eq!(enum_def.kind.type_name(), "enum");
        assert_eq!(enum_def.kind.default_value(), json!("async"));
        match &enum_def.kind {
            ParameterKind::Enum { values, .. } => {
                assert_eq!(
                    values["sync"].enabled,
                    Some(Toggle::Expression("configs.RCM.clk > 0".into()))
                );
            }
            other => panic!("expected enum, got {other:?}"),
        }

        let number: ParameterDefinition = serde_json::from_value(json!({
            "type": "integer", "default": 5, "min": 0, "max": "configs.X.limit",
            "enabled": false
        }))
        .unwrap();
        assert_eq!(
            number.kind,
            ParameterKind::Integer(NumberDefinition {
                default: 5.0,
                min: Some(Bound::Literal(0.0)),
                max: Some(Bound::Expression("configs.X.limit".into())),
            })
        );
        assert_eq!(number.enabled, Some(Toggle::Fixed(false)));
    }

    #[test]
    fn test_conditional_or_plain() {
        let variants: Conditional<DiagramDefinition> = serde_json::from_value(json!([
            {"condition": "x > 0", "content": {"images": ["a.svg"]}},
            {"condition": "default", "content": {"images": []}}
        ]))
        .unwrap();
        match &variants {
            Conditional::Variants(entries) => {
                assert_eq!(entries.len(), 2);
                assert!(entries[1].is_default());
            }
            other => panic!("expected variants, got {other:?}"),
        }

        let plain: Conditional<DiagramDefinition> =
            serde_json::from_value(json!({"images": ["b.svg"]})).unwrap();
        assert_eq!(plain.contents()[0].images, vec!["b.svg"]);
    }

    #[test]
    fn test_ip_definition_sections() {
        let ip: IpDefinition = serde_json::from_value(json!({
            "name": "USART",
            "activated": "configs.${IP_INSTANCE}.mode != 'disabled'",
            "parameters": {
                "mode": {"type": "enum", "default": "disabled", "values": {"disabled": {}}}
            },
            "containers": {
                "clockTree": {"refParameters": {"mode": {"default": "async"}}}
            },
            "presets": {
                "tx": [{"condition": "default", "content": {"refParameters": {}}}]
            }
        }))
        .unwrap();
        assert_eq!(ip.name, "USART");
        assert!(ip.containers.clock_tree.is_some());
        assert!(ip.containers.overview.is_none());
        assert!(matches!(ip.presets["tx"], Conditional::Variants(_)));
    }

    #[test]
    fn test_localized_text_fallback() {
        let text = LocalizedText(BTreeMap::from([
            ("en".to_string(), "Baud rate".to_string()),
            ("zh_CN".to_string(), "波特率".to_string()),
        ]));
        assert_eq!(text.get("zh_CN"), "波特率");
        assert_eq!(text.get("de"), "Baud rate");
        assert_eq!(LocalizedText::default().get("en"), "");
    }
}
