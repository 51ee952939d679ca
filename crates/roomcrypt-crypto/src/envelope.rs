//! AES-256-GCM envelope codec
//!
//! Envelope format (text, each segment standard base64, `:`-separated):
//! ```text
//! [rc1.]salt:nonce:ciphertext+tag     password-derived (16-byte salt)
//! [rc1.]nonce:ciphertext+tag          room-id derived or raw key
//! ```
//!
//! `open` is lenient about input that is not an envelope at all: it returns
//! the input unchanged so legacy plaintext fields can be displayed as-is.
//! A genuine envelope that fails authentication is always an error.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_from_password, DerivedKey, KdfParams};
use crate::keys::KeySource;
use crate::{NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Segment separator
pub const SEPARATOR: char = ':';

/// Optional format tag. `.` is outside the base64 alphabet, so a tagged
/// envelope can never be mistaken for an untagged one.
pub const FORMAT_TAG: &str = "rc1.";

/// A parsed envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tagged: bool,
    pub salt: Option<[u8; SALT_SIZE]>,
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte GCM tag appended
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Parse an envelope string. Returns `None` for anything that is not
    /// 2 or 3 well-formed base64 segments of the expected sizes.
    pub fn parse(s: &str) -> Option<Self> {
        let (tagged, body) = match s.strip_prefix(FORMAT_TAG) {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let parts: Vec<&str> = body.split(SEPARATOR).collect();
        let (salt_b64, nonce_b64, payload_b64) = match parts.as_slice() {
            [nonce, payload] => (None, *nonce, *payload),
            [salt, nonce, payload] => (Some(*salt), *nonce, *payload),
            _ => return None,
        };

        let salt = match salt_b64 {
            Some(encoded) => Some(decode_fixed::<SALT_SIZE>(encoded)?),
            None => None,
        };
        let nonce = decode_fixed::<NONCE_SIZE>(nonce_b64)?;
        let payload = B64.decode(payload_b64).ok()?;
        if payload.len() < TAG_SIZE {
            return None;
        }

        Some(Self {
            tagged,
            salt,
            nonce,
            payload,
        })
    }

    pub fn is_password_derived(&self) -> bool {
        self.salt.is_some()
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        if self.tagged {
            out.push_str(FORMAT_TAG);
        }
        if let Some(salt) = &self.salt {
            out.push_str(&B64.encode(salt));
            out.push(SEPARATOR);
        }
        out.push_str(&B64.encode(self.nonce));
        out.push(SEPARATOR);
        out.push_str(&B64.encode(&self.payload));
        out
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Option<[u8; N]> {
    let bytes = B64.decode(encoded).ok()?;
    bytes.try_into().ok()
}

/// Seals and opens item payloads.
///
/// Pure given its inputs; safe to share across tasks.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    kdf: KdfParams,
    tagged: bool,
}

impl EnvelopeCodec {
    pub fn new(kdf: KdfParams, tagged: bool) -> Self {
        Self { kdf, tagged }
    }

    pub fn from_config(cfg: &roomcrypt_core::config::CryptoConfig) -> Self {
        Self::new(KdfParams::from_config(cfg), cfg.tagged_envelopes)
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Seal `plaintext` under `key` with a fresh random nonce (and, for
    /// passwords, a fresh random salt).
    ///
    /// Fails with [`CryptoError::EncryptionKeyMissing`] when `key` holds no
    /// secret; there is no plaintext fallback.
    pub fn seal(&self, plaintext: &str, key: &KeySource) -> CryptoResult<String> {
        if !key.is_usable() {
            return Err(CryptoError::EncryptionKeyMissing);
        }

        let derived = match key {
            KeySource::Password(password) => {
                let mut salt = [0u8; SALT_SIZE];
                rand::thread_rng().fill_bytes(&mut salt);
                derive_from_password(password, &salt, &self.kdf)?
            }
            other => other
                .unsalted_key(&self.kdf)?
                .ok_or(CryptoError::EncryptionKeyMissing)?,
        };

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new(derived.as_bytes().into());
        let payload = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("AES-256-GCM: {e}")))?;

        Ok(Envelope {
            tagged: self.tagged,
            salt: derived.salt().copied(),
            nonce,
            payload,
        }
        .encode())
    }

    /// Seal, then prove the envelope opens back to `plaintext` under `key`.
    pub fn seal_verified(&self, plaintext: &str, key: &KeySource) -> CryptoResult<String> {
        let sealed = self.seal(plaintext, key)?;
        match self.open(&sealed, key) {
            Ok(opened) if opened == plaintext && opened != sealed => Ok(sealed),
            Ok(_) | Err(_) => Err(CryptoError::RoundTripVerificationFailed),
        }
    }

    /// Open an envelope with `key`.
    ///
    /// Input that does not parse as an envelope, or whose shape does not
    /// match the key kind (salted vs unsalted), is returned unchanged.
    /// A tag mismatch is [`CryptoError::AuthenticationFailed`].
    pub fn open(&self, input: &str, key: &KeySource) -> CryptoResult<String> {
        let Some(envelope) = Envelope::parse(input) else {
            tracing::trace!("open: input is not an envelope, returning unchanged");
            return Ok(input.to_string());
        };

        let derived: DerivedKey = match (key, envelope.salt.as_ref()) {
            (KeySource::Password(password), Some(salt)) => {
                derive_from_password(password, salt, &self.kdf)?
            }
            (KeySource::Password(_), None) | (_, Some(_)) => {
                tracing::trace!(
                    key = key.label(),
                    "open: envelope shape does not match key kind, returning unchanged"
                );
                return Ok(input.to_string());
            }
            (other, None) => match other.unsalted_key(&self.kdf)? {
                Some(k) => k,
                None => return Ok(input.to_string()),
            },
        };

        let cipher = Aes256Gcm::new(derived.as_bytes().into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.payload.as_ref())
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}
