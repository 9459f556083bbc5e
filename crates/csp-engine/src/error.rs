//! Engine error types.

use csp_core::path::PatternError;
use csp_core::ConfigError;
use csp_protocol::CodecError;

/// Errors surfaced to callers of the engine's request-level API.
///
/// Evaluation problems never show up here: they resolve to fallbacks and
/// are only logged.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown IP instance: {vendor}/{instance}")]
    UnknownIp { vendor: String, instance: String },

    #[error("Unknown preset {preset} on {instance}")]
    UnknownPreset { instance: String, preset: String },

    /// Paths must start with `configs.` or `gen.`.
    #[error("Unsupported path: {0}")]
    UnsupportedPath(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
