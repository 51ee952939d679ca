use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("room {0} has expired")]
    Expired(String),

    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("backend error: {0}")]
    Backend(#[from] opendal::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(e) if e.is_temporary())
    }
}

impl From<StoreError> for roomcrypt_core::RoomError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthorized(msg) => roomcrypt_core::RoomError::Unauthorized(msg),
            other => roomcrypt_core::RoomError::Storage(other.to_string()),
        }
    }
}
