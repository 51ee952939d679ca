//! Key sources: the secrets a room's content can be sealed under

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_from_room_id, DerivationMode, DerivedKey, KdfParams};
use crate::KEY_SIZE;

/// A raw 256-bit key, as generated for legacy password-less rooms and
/// carried in a URL fragment or session storage. Zeroized on drop.
#[derive(Clone)]
pub struct RawKey {
    bytes: [u8; KEY_SIZE],
}

impl RawKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Import a key exported by [`RawKey::to_base64`].
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut decoded = B64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("base64 decode: {e}")))?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "raw key has wrong size: {len} bytes (expected {KEY_SIZE})"
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    pub fn to_base64(&self) -> String {
        B64.encode(self.bytes)
    }
}

impl Drop for RawKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for RawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit raw key.
pub fn generate_random_key() -> RawKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    RawKey::from_bytes(bytes)
}

/// Secret material a payload can be sealed under or opened with.
pub enum KeySource {
    /// Room password; a fresh salt is drawn for every seal.
    Password(SecretString),
    /// Implicit secret of a password-less room.
    RoomId(String),
    /// Legacy random key.
    Raw(RawKey),
}

impl KeySource {
    pub fn password(password: impl Into<String>) -> Self {
        KeySource::Password(SecretString::from(password.into()))
    }

    pub fn room_id(room_id: impl Into<String>) -> Self {
        KeySource::RoomId(room_id.into())
    }

    /// Password-derived envelopes carry a salt segment; the others do not.
    pub fn is_password_derived(&self) -> bool {
        matches!(self, KeySource::Password(_))
    }

    /// Short non-secret label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            KeySource::Password(_) => "password",
            KeySource::RoomId(_) => "room-id",
            KeySource::Raw(_) => "raw",
        }
    }

    /// Whether this source holds any usable secret.
    pub fn is_usable(&self) -> bool {
        match self {
            KeySource::Password(p) => !p.expose_secret().is_empty(),
            KeySource::RoomId(id) => !id.is_empty(),
            KeySource::Raw(_) => true,
        }
    }

    /// Resolve the key for a source that needs no per-envelope salt.
    pub(crate) fn unsalted_key(&self, params: &KdfParams) -> CryptoResult<Option<DerivedKey>> {
        match self {
            KeySource::Password(_) => Ok(None),
            KeySource::RoomId(id) => derive_from_room_id(id, params).map(Some),
            KeySource::Raw(raw) => Ok(Some(DerivedKey::from_bytes(
                *raw.as_bytes(),
                DerivationMode::Raw,
            ))),
        }
    }
}

impl Clone for KeySource {
    fn clone(&self) -> Self {
        match self {
            KeySource::Password(p) => {
                KeySource::Password(SecretString::from(p.expose_secret().to_owned()))
            }
            KeySource::RoomId(id) => KeySource::RoomId(id.clone()),
            KeySource::Raw(raw) => KeySource::Raw(raw.clone()),
        }
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Password(_) => f.write_str("KeySource::Password([REDACTED])"),
            KeySource::RoomId(id) => write!(f, "KeySource::RoomId({id})"),
            KeySource::Raw(_) => f.write_str("KeySource::Raw([REDACTED])"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_key_generation() {
        let k1 = generate_random_key();
        let k2 = generate_random_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_raw_key_base64_roundtrip() {
        let key = generate_random_key();
        let exported = key.to_base64();
        let imported = RawKey::from_base64(&exported).unwrap();
        assert_eq!(key.as_bytes(), imported.as_bytes());
    }

    #[test]
    fn test_raw_key_wrong_length() {
        let short = B64.encode([7u8; 16]);
        assert!(matches!(
            RawKey::from_base64(&short),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(RawKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_key_source_usability() {
        assert!(!KeySource::password("").is_usable());
        assert!(!KeySource::room_id("").is_usable());
        assert!(KeySource::password("p@ss").is_usable());
        assert!(KeySource::Raw(generate_random_key()).is_usable());
    }

    #[test]
    fn test_key_source_debug_redacts_password() {
        let dbg = format!("{:?}", KeySource::password("hunter2"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn test_password_source_has_no_unsalted_key() {
        let params = KdfParams::default();
        assert!(KeySource::password("pw").unsalted_key(&params).unwrap().is_none());
        let raw = generate_random_key();
        let key = KeySource::Raw(raw.clone()).unsalted_key(&params).unwrap().unwrap();
        assert_eq!(key.as_bytes(), raw.as_bytes());
    }
}
