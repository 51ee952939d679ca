use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Sealing was requested without usable key material. Never recovered
    /// from by storing plaintext instead.
    #[error("no encryption key available")]
    EncryptionKeyMissing,

    #[error("ciphertext failed authentication under the supplied key")]
    AuthenticationFailed,

    #[error("none of {tried} candidate keys opened the envelope")]
    NoKeyMatched { tried: usize },

    #[error("sealed envelope did not decrypt back to its source plaintext")]
    RoundTripVerificationFailed,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

impl From<CryptoError> for roomcrypt_core::RoomError {
    fn from(e: CryptoError) -> Self {
        roomcrypt_core::RoomError::Crypto(e.to_string())
    }
}
