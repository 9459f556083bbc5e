//! Protocol message types for the host boundary.
//!
//! This module defines all messages exchanged with the engine's host:
//! - Host → Engine: Set, Get, ApplyPreset, Describe, Subscribe
//! - Engine → Host: Changed, Value, Ip, Ack, Error
//!
//! Messages are JSON objects discriminated by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Host → Engine
// ============================================================================

/// Write a value at a document path (`configs.USART1.mode`, `gen.hal`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Read the value at a document path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub path: String,
}

/// Write the defaults of a named preset of one IP instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPresetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub vendor: String,
    pub instance: String,
    pub preset: String,
}

/// Ask for a snapshot of one IP instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub vendor: String,
    pub instance: String,
}

/// Replace the set of path patterns whose changes are forwarded.
///
/// Patterns are dot-delimited and may use `*` for one segment, or as the
/// last segment for any depth. An empty list forwards everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Messages that can be received from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostRequest {
    Set(SetRequest),
    Get(GetRequest),
    ApplyPreset(ApplyPresetRequest),
    Describe(DescribeRequest),
    Subscribe(SubscribeRequest),
}

impl HostRequest {
    /// The correlation id the host attached, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            HostRequest::Set(r) => r.request_id.as_deref(),
            HostRequest::Get(r) => r.request_id.as_deref(),
            HostRequest::ApplyPreset(r) => r.request_id.as_deref(),
            HostRequest::Describe(r) => r.request_id.as_deref(),
            HostRequest::Subscribe(r) => r.request_id.as_deref(),
        }
    }
}

// ============================================================================
// Engine → Host
// ============================================================================

/// Event channel a change was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Configs,
    Gen,
    Modules,
}

/// A configuration change, with the path as seen from the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedMessage {
    pub channel: Channel,
    pub path: String,
    pub new_value: Value,
    pub old_value: Value,
}

/// Answer to a [`GetRequest`]. Absent paths carry `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub path: String,
    pub value: Value,
}

/// Completion of a request that has no payload of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether the request changed the document.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub message: String,
}

/// One selectable value of an enum parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueUnitSnapshot {
    pub name: String,
    pub comment: String,
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The typed parameter surface at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSnapshot {
    #[serde(rename = "type")]
    pub type_name: String,
    pub path: String,
    pub value: Value,
    pub enabled: bool,
    pub readonly: bool,
    pub visible: bool,
    pub display: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ValueUnitSnapshot>,
}

/// State of one conditional block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSnapshot {
    /// Position of the active entry, `None` when no entry is active.
    pub active_index: Option<usize>,
}

/// Answer to a [`DescribeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub vendor: String,
    pub instance: String,
    pub activated: bool,
    pub parameters: BTreeMap<String, ParameterSnapshot>,
    /// Containers and the parameter block, keyed by section name.
    pub selectors: BTreeMap<String, SelectorSnapshot>,
    pub images: Vec<String>,
}

/// Messages that can be sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineMessage {
    Changed(ChangedMessage),
    Value(ValueMessage),
    Ip(IpSnapshot),
    Ack(AckMessage),
    Error(ErrorMessage),
}

impl EngineMessage {
    pub fn error(request_id: Option<&str>, message: impl Into<String>) -> Self {
        EngineMessage::Error(ErrorMessage {
            request_id: request_id.map(String::from),
            message: message.into(),
        })
    }
}
