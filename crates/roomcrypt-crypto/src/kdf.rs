//! Key derivation: password or room id → 256-bit content key (PBKDF2-HMAC-SHA256)

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// How a [`DerivedKey`] was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationMode {
    /// Derived from a password; the salt travels with the envelope.
    PasswordDerived { salt: [u8; SALT_SIZE] },
    /// Derived from the room id with a deterministic salt; nothing transmitted.
    IdentifierDerived,
    /// Imported raw key material.
    Raw,
}

/// A 256-bit content key. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
    mode: DerivationMode,
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE], mode: DerivationMode) -> Self {
        Self { bytes, mode }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn mode(&self) -> &DerivationMode {
        &self.mode
    }

    /// The salt to transmit alongside the ciphertext, if any.
    pub fn salt(&self) -> Option<&[u8; SALT_SIZE]> {
        match &self.mode {
            DerivationMode::PasswordDerived { salt } => Some(salt),
            _ => None,
        }
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .field("mode", &self.mode)
            .finish()
    }
}

/// PBKDF2 iteration counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Iterations for password-derived keys (default: 100000)
    pub password_iterations: u32,
    /// Iterations for room-id derived keys (default: 1000).
    ///
    /// The room id is not secret, so this only needs to be cheap.
    pub room_id_iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            password_iterations: 100_000,
            room_id_iterations: 1_000,
        }
    }
}

impl KdfParams {
    pub fn from_config(cfg: &roomcrypt_core::config::CryptoConfig) -> Self {
        Self {
            password_iterations: cfg.password_iterations,
            room_id_iterations: cfg.room_id_iterations,
        }
    }
}

/// Derive a content key from a password and a per-seal random salt.
pub fn derive_from_password(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    let bytes = pbkdf2_sha256(
        password.expose_secret().as_bytes(),
        salt,
        params.password_iterations,
    )?;
    Ok(DerivedKey::from_bytes(
        bytes,
        DerivationMode::PasswordDerived { salt: *salt },
    ))
}

/// Derive the deterministic content key of a password-less room.
///
/// Anyone holding the room id can recompute this key.
pub fn derive_from_room_id(room_id: &str, params: &KdfParams) -> CryptoResult<DerivedKey> {
    if room_id.is_empty() {
        return Err(CryptoError::EncryptionKeyMissing);
    }
    let salt = room_id_salt(room_id);
    let bytes = pbkdf2_sha256(room_id.as_bytes(), &salt, params.room_id_iterations)?;
    Ok(DerivedKey::from_bytes(bytes, DerivationMode::IdentifierDerived))
}

/// The fixed salt for a room id: its first 16 bytes, right-padded with `'0'`.
pub fn room_id_salt(room_id: &str) -> [u8; SALT_SIZE] {
    let mut salt = [b'0'; SALT_SIZE];
    for (dst, src) in salt.iter_mut().zip(room_id.as_bytes()) {
        *dst = *src;
    }
    salt
}

fn pbkdf2_sha256(secret: &[u8], salt: &[u8], rounds: u32) -> CryptoResult<[u8; KEY_SIZE]> {
    if rounds == 0 {
        return Err(CryptoError::KeyDerivation(
            "PBKDF2 iteration count must be non-zero".into(),
        ));
    }
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret, salt, rounds, &mut key);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            password_iterations: 10,
            room_id_iterations: 2,
        }
    }

    #[test]
    fn test_password_kdf_deterministic_for_same_salt() {
        let password = SecretString::from("test-passphrase-123");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_from_password(&password, &salt, &fast_params()).unwrap();
        let key2 = derive_from_password(&password, &salt, &fast_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
        assert_eq!(key1.salt(), Some(&salt));
    }

    #[test]
    fn test_password_kdf_different_salts() {
        let password = SecretString::from("same-passphrase");

        let key1 = derive_from_password(&password, &[1u8; SALT_SIZE], &fast_params()).unwrap();
        let key2 = derive_from_password(&password, &[2u8; SALT_SIZE], &fast_params()).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_room_id_kdf_deterministic() {
        let key1 = derive_from_room_id("room-1", &fast_params()).unwrap();
        let key2 = derive_from_room_id("room-1", &fast_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_eq!(key1.mode(), &DerivationMode::IdentifierDerived);
        assert!(key1.salt().is_none());
    }

    #[test]
    fn test_room_id_kdf_distinct_rooms() {
        let key1 = derive_from_room_id("room-1", &fast_params()).unwrap();
        let key2 = derive_from_room_id("room-2", &fast_params()).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_room_id_mode_tag_differs_from_password() {
        let params = KdfParams {
            password_iterations: 2,
            room_id_iterations: 2,
        };
        let salt = room_id_salt("room-1");
        let from_password =
            derive_from_password(&SecretString::from("room-1"), &salt, &params).unwrap();
        let from_room = derive_from_room_id("room-1", &params).unwrap();

        // Same PBKDF2 inputs, so only the mode tag differs.
        assert_eq!(from_password.as_bytes(), from_room.as_bytes());
        assert_ne!(from_password.mode(), from_room.mode());
    }

    #[test]
    fn test_room_id_salt_padding_and_truncation() {
        assert_eq!(&room_id_salt("abc"), b"abc0000000000000");
        assert_eq!(
            &room_id_salt("0123456789abcdefXYZ"),
            b"0123456789abcdef"
        );
    }

    #[test]
    fn test_empty_room_id_is_missing_key() {
        let result = derive_from_room_id("", &fast_params());
        assert!(matches!(result, Err(CryptoError::EncryptionKeyMissing)));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let params = KdfParams {
            password_iterations: 0,
            room_id_iterations: 0,
        };
        let result = derive_from_password(&SecretString::from("pw"), &[0u8; SALT_SIZE], &params);
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = derive_from_room_id("room-1", &fast_params()).unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
    }
}
