use thiserror::Error;

pub type RoomResult<T> = Result<T, RoomError>;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    /// No secret is known for a room that needs one; prompt for the password.
    #[error("no encryption key for room {room_id}: password required")]
    EncryptionKeyMissing { room_id: String },

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("re-encrypted {succeeded} of {total} items")]
    RotationPartialFailure { succeeded: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
