//! Request handling for one host connection.
//!
//! A [`Session`] answers [`HostRequest`]s against a project and its IP
//! manager and queues every outgoing [`EngineMessage`]:
//! - `changed` messages for project changes that pass the subscription filter
//! - one response per request (`value`, `ip`, `ack` or `error`)
//!
//! Changes are queued synchronously while a request runs, so the `changed`
//! messages a `set` caused always precede its `ack`.

use csp_core::event::ListenerId;
use csp_core::store::{ConfigStore, DocumentStore};
use csp_protocol::{
    decode_host_request, AckMessage, EngineMessage, HostRequest, IpSnapshot, ParameterSnapshot,
    SelectorSnapshot, ValueMessage, ValueUnitSnapshot,
};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::ip::Ip;
use crate::manager::IpManager;
use crate::parameter::Parameter;
use crate::project::Project;
use crate::subscription::SubscriptionFilter;

pub struct Session {
    manager: Rc<IpManager>,
    filter: Rc<RefCell<SubscriptionFilter>>,
    outbox: Rc<RefCell<VecDeque<EngineMessage>>>,
    listener: ListenerId,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("filter", &self.filter.borrow())
            .field("pending", &self.outbox.borrow().len())
            .finish()
    }
}

impl Session {
    pub fn new(manager: Rc<IpManager>) -> Self {
        let filter = Rc::new(RefCell::new(SubscriptionFilter::new()));
        let outbox = Rc::new(RefCell::new(VecDeque::new()));

        let listener = {
            let filter = Rc::clone(&filter);
            let outbox = Rc::clone(&outbox);
            manager.project().on_changed(move |event| {
                if let Some(message) = filter.borrow().filter(event) {
                    outbox.borrow_mut().push_back(EngineMessage::Changed(message));
                }
            })
        };

        Session {
            manager,
            filter,
            outbox,
            listener,
        }
    }

    pub fn project(&self) -> &Rc<Project> {
        self.manager.project()
    }

    pub fn manager(&self) -> &Rc<IpManager> {
        &self.manager
    }

    /// Decode one JSON frame and handle it. Undecodable frames are answered
    /// with an `error` message.
    pub fn handle_frame(&self, frame: &str) {
        match decode_host_request(frame) {
            Ok(request) => self.handle(request),
            Err(e) => {
                warn!(error = %e, "rejected host frame");
                self.push(EngineMessage::error(None, EngineError::from(e).to_string()));
            }
        }
    }

    /// Handle one request, queueing its response.
    pub fn handle(&self, request: HostRequest) {
        let request_id = request.request_id().map(String::from);
        debug!(?request, "host request");
        let response = match self.respond(request) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "request failed");
                EngineMessage::error(request_id.as_deref(), e.to_string())
            }
        };
        self.push(response);
    }

    fn respond(&self, request: HostRequest) -> Result<EngineMessage, EngineError> {
        match request {
            HostRequest::Set(req) => {
                let (store, path) = self.route(&req.path)?;
                let changed = store.set(path, req.value);
                Ok(EngineMessage::Ack(AckMessage {
                    request_id: req.request_id,
                    changed,
                }))
            }
            HostRequest::Get(req) => {
                let (store, path) = self.route(&req.path)?;
                let value = store.get(path).unwrap_or(Value::Null);
                Ok(EngineMessage::Value(ValueMessage {
                    request_id: req.request_id,
                    path: req.path,
                    value,
                }))
            }
            HostRequest::ApplyPreset(req) => {
                let ip = self.manager.require(&req.vendor, &req.instance)?;
                let written = ip.apply_preset(&req.preset)?;
                Ok(EngineMessage::Ack(AckMessage {
                    request_id: req.request_id,
                    changed: written > 0,
                }))
            }
            HostRequest::Describe(req) => {
                let mut snapshot = self.describe(&req.vendor, &req.instance)?;
                snapshot.request_id = req.request_id;
                Ok(EngineMessage::Ip(snapshot))
            }
            HostRequest::Subscribe(req) => {
                self.filter.borrow_mut().replace(&req.patterns)?;
                Ok(EngineMessage::Ack(AckMessage {
                    request_id: req.request_id,
                    changed: false,
                }))
            }
        }
    }

    /// Split a document path into its store and the store-relative rest.
    fn route<'a>(&self, path: &'a str) -> Result<(&DocumentStore, &'a str), EngineError> {
        let project = self.project();
        match path.split_once('.') {
            Some(("configs", rest)) if !rest.is_empty() => Ok((project.configs(), rest)),
            Some(("gen", rest)) if !rest.is_empty() => Ok((project.gen(), rest)),
            _ => Err(EngineError::UnsupportedPath(path.to_string())),
        }
    }

    /// Snapshot the typed surface of one IP instance.
    pub fn describe(&self, vendor: &str, instance: &str) -> Result<IpSnapshot, EngineError> {
        let ip = self.manager.require(vendor, instance)?;
        let locale = self.project().locale();

        let mut parameters = BTreeMap::new();
        let mut selectors = BTreeMap::new();
        for (name, slot) in ip.parameters() {
            if let Some(selector) = slot.selector() {
                selectors.insert(
                    format!("parameters.{name}"),
                    SelectorSnapshot {
                        active_index: selector.active_index(),
                    },
                );
            }
            if let Some(parameter) = slot.current() {
                parameters.insert(name.clone(), parameter_snapshot(&ip, name, &parameter, &locale));
            }
        }
        for (section, object) in ip.containers().iter() {
            selectors.insert(
                section.to_string(),
                SelectorSnapshot {
                    active_index: object.active_index(),
                },
            );
        }
        for (name, preset) in ip.presets() {
            if preset.selector().is_some() {
                selectors.insert(
                    format!("presets.{name}"),
                    SelectorSnapshot {
                        active_index: preset.active_index(),
                    },
                );
            }
        }
        if let Some(selector) = ip.diagrams().and_then(|d| d.selector()) {
            selectors.insert(
                "diagrams".to_string(),
                SelectorSnapshot {
                    active_index: selector.active_index(),
                },
            );
        }

        Ok(IpSnapshot {
            request_id: None,
            vendor: ip.vendor().to_string(),
            instance: ip.instance().to_string(),
            activated: ip.activated(),
            parameters,
            selectors,
            images: ip.images(),
        })
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<EngineMessage> {
        self.outbox.borrow_mut().drain(..).collect()
    }

    fn push(&self, message: EngineMessage) {
        self.outbox.borrow_mut().push_back(message);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.manager.project().off_changed(self.listener);
    }
}

/// A parameter is read-only when its definition says so or when an active
/// container overlay on it is.
fn parameter_snapshot(ip: &Ip, name: &str, parameter: &Parameter, locale: &str) -> ParameterSnapshot {
    let gated = ip
        .containers()
        .iter()
        .filter_map(|(_, object)| object.ref_parameter(name))
        .any(|overlay| overlay.is_active() && overlay.readonly());

    let (min, max) = match parameter.as_number() {
        Some(number) => (Some(number.min()), Some(number.max())),
        None => (None, None),
    };
    let values = parameter
        .as_enum()
        .map(|e| {
            e.values()
                .values()
                .map(|unit| {
                    let validity = unit.validity();
                    ValueUnitSnapshot {
                        name: unit.name().to_string(),
                        comment: unit.comment(locale).to_string(),
                        is_enabled: unit.enabled() && validity.is_enabled,
                        reason: (!validity.reason.is_empty()).then_some(validity.reason),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let base = parameter.base();
    ParameterSnapshot {
        type_name: parameter.type_name().to_string(),
        path: parameter.path().to_string(),
        value: parameter.value(),
        enabled: parameter.enabled(),
        readonly: parameter.readonly() || gated,
        visible: parameter.visible(),
        display: base.display(),
        description: base.description(),
        min,
        max,
        values,
    }
}
