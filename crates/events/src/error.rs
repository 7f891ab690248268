/// Failure taxonomy for the event store.
///
/// `Conflict` (a CAS failure on a session head) is the only retriable
/// variant — the caller should re-read the head and try again.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("no rows".into()),
            other => StoreError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Internal(format!("payload codec: {e}"))
    }
}

impl From<StoreError> for sb_domain::error::Error {
    fn from(e: StoreError) -> Self {
        use sb_domain::error::Error;
        match e {
            StoreError::NotFound(m) => Error::NotFound(m),
            StoreError::InvalidOperation(m) => Error::InvalidOperation(m),
            StoreError::Conflict(m) => Error::Conflict(m),
            StoreError::Internal(m) => Error::Other(m),
        }
    }
}
