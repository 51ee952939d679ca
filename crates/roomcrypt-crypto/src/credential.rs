//! Password verification hash for store-side authorization
//!
//! The store only ever sees `hex(SHA-256(password))`. Content keys are
//! derived from the raw password through PBKDF2 with a random salt, so the
//! stored hash cannot be turned into a content key.

use roomcrypt_core::types::CredentialHash;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// One-way digest of a password.
pub fn hash_password(password: &SecretString) -> CredentialHash {
    let digest = Sha256::digest(password.expose_secret().as_bytes());
    CredentialHash::from_hex(hex::encode(digest))
}

/// Compare a password against a stored hash.
pub fn verify_password(password: &SecretString, expected: &CredentialHash) -> bool {
    hash_password(password) == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        let hash = hash_password(&SecretString::from("abc"));
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_deterministic_and_distinct() {
        let a1 = hash_password(&SecretString::from("alpha"));
        let a2 = hash_password(&SecretString::from("alpha"));
        let b = hash_password(&SecretString::from("beta"));
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn test_verify_password() {
        let stored = hash_password(&SecretString::from("p@ss"));
        assert!(verify_password(&SecretString::from("p@ss"), &stored));
        assert!(!verify_password(&SecretString::from("p@ss "), &stored));
    }
}
