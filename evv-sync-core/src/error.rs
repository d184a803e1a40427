use thiserror::Error;

/// Error kinds surfaced across the crate. Facade operations never
/// auto-recover: a validation or persistence failure is always surfaced
/// to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("compliance violation: {0:?}")]
    Compliance(Vec<String>),

    /// Soft failure: the record is still written, enqueued, and flagged for
    /// supervisor review. Never returned by a facade call; used internally to
    /// describe why a verification produced a degraded verification level.
    #[error("geofence warning: {0}")]
    GeofenceWarning(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error {status}: {code:?}")]
    Server { status: u16, code: Option<String> },

    #[error("conflict requires server reconciliation")]
    Conflict,

    #[error("integrity check failed: hash_match={hash_match} checksum_match={checksum_match}")]
    Integrity {
        hash_match: bool,
        checksum_match: bool,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Store(format!("serialization failure: {e}"))
    }
}
