//! # csp-protocol
//!
//! Message types exchanged between the configuration engine and its host
//! (UI, IPC bridge or the command line driver), plus a JSON codec.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
