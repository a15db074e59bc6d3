use thiserror::Error;

/// Result alias for fund operations.
pub type FundResult<T> = Result<T, FundError>;

/// Error taxonomy surfaced by the ledger engine. Every rejection names the
/// specific constraint that fired.
#[derive(Debug, Error)]
pub enum FundError {
    #[error("validation failed for {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("movement {id} is already being edited or was edited moments ago")]
    ConcurrentEdit { id: String },
    #[error("movement {id} is locked: {reason}")]
    LockedMovement { id: String, reason: String },
    #[error("movement {id} already has the maximum of {max} edits")]
    AuditCapExceeded { id: String, max: usize },
    #[error("storage error: {0}")]
    Persistence(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for FundError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<std::io::Error> for FundError {
    fn from(value: std::io::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<serde_json::Error> for FundError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
