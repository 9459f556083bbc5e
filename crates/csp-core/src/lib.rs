//! # csp-core
//!
//! Runtime-agnostic building blocks of the IP configuration engine.
//!
//! This crate provides:
//! - Condition expression parsing, evaluation and dependency extraction
//! - Configuration paths and the path-addressed configuration store
//! - Synchronous change notification
//! - Static IP definition and chip summary types
//!
//! Nothing here is reactive on its own: the `csp-engine` crate wires these
//! pieces into live parameters bound to a project.

pub mod config;
pub mod event;
pub mod expr;
pub mod model;
pub mod path;
pub mod store;
pub mod summary;

pub use config::{ConfigError, DefinitionSource, EngineSettings, IpKind, MemoryDefinitionSource};
pub use event::{ChangeEvent, Emitter, ListenerId};
pub use expr::{is_empty, Evaluator, Placeholders};
pub use model::*;
pub use path::{ConfigPath, PathPattern};
pub use store::{ConfigStore, DocumentStore, SharedDocument};
pub use summary::{ChipSummary, ModuleUnit, PinDefinition, SummaryModules};
