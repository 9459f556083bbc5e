//! # csp-engine
//!
//! The reactive layer of the IP configuration engine.
//!
//! A [`Project`] owns the configuration document. IPs instantiated through
//! the [`IpManager`] bind their parameters to it, and every store write
//! propagates synchronously, depth first, to the parameters, selectors and
//! reference overlays that depend on the written path. A [`Session`] puts a
//! request/response surface on top for a host process.

pub mod error;
pub mod ip;
pub mod manager;
pub mod object;
pub mod parameter;
pub mod project;
pub mod reference;
pub mod selector;
pub mod session;
pub mod subscription;
pub mod tracked;
pub mod watch;

pub use error::EngineError;
pub use ip::{Ip, IpContext};
pub use manager::IpManager;
pub use object::{Containers, DiagramSet, IpObject};
pub use parameter::{
    EnumParameter, NumberParameter, Parameter, ParameterBase, ParameterSlot, Validity, ValueChange,
    ValueUnit,
};
pub use project::{LinkerSettings, ModulesChanged, Project};
pub use reference::RefParameter;
pub use selector::{ConditionalBlock, Selector, SelectorChange};
pub use session::Session;
pub use subscription::SubscriptionFilter;
pub use tracked::{Derived, Tracked, TrackedValue};
pub use watch::{WatchRegistry, WatcherId};
