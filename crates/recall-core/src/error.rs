use thiserror::Error;

/// A convenience `Result` alias using [`RecallError`].
pub type RecallResult<T> = Result<T, RecallError>;

/// Top-level error type for the Recall memory engine.
///
/// Each variant corresponds to a failure class the engine can surface to its
/// caller. [`RecallError::Corruption`] is produced internally while restoring
/// persisted sessions and is degraded to a cache miss before it reaches the
/// facade.
#[derive(Error, Debug)]
pub enum RecallError {
    /// Invalid input: dimension mismatch or a missing search parameter.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation needed a capability (e.g. embedding) that is not configured.
    #[error("Capability unsupported: {0}")]
    CapabilityUnsupported(String),

    /// The embedding provider failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The persistence adapter failed to load, save or delete a snapshot.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A persisted snapshot could not be decoded or is schema-incompatible.
    #[error("Corrupt snapshot: {0}")]
    Corruption(String),

    /// Configuration could not be parsed or failed validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecallError {
    /// Whether this error came from a persisted snapshot that cannot be used.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}
