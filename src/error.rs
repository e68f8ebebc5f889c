//! Error types for the ensemble engine

use thiserror::Error;

/// Engine-wide result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
///
/// Per-model inference failures are handled internally (the failing member is
/// dropped from the ensemble); only whole-call failures surface here.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid input (unknown context, malformed config value, bad feature map)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Model name not present in the registry
    #[error("Model not found: {0}")]
    NotFound(String),

    /// Registration attempted with a name that is already taken
    #[error("Model already registered: {0}")]
    AlreadyExists(String),

    /// Selection produced zero usable models
    #[error("No models available for prediction")]
    NoModelsAvailable,

    /// Every member inference failed or timed out
    #[error("No member predictions available")]
    NoPredictions,

    /// Degenerate weighting (all weights zero)
    #[error("Total ensemble weight is zero")]
    ZeroWeight,

    /// An operation exceeded its deadline
    #[error("Timeout after {ms}ms: {what}")]
    Timeout { what: String, ms: u64 },

    /// Model artifact missing or unreadable
    #[error("Model load error: {0}")]
    Load(String),

    /// Configuration file / environment error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the error is a caller mistake rather than an engine fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::NotFound(_) | EngineError::AlreadyExists(_)
        )
    }
}
