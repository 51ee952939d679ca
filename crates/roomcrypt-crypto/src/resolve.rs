//! Multi-key resolution: find the candidate key that opens an envelope
//!
//! A room's secret can change while older items are still sealed under a
//! previous one. The resolver tries each candidate in priority order and
//! accepts the first output that no longer classifies as ciphertext. An
//! output that still looks like an envelope means `open` handed its input
//! back (wrong key kind), so it is never accepted as plaintext.

use crate::classify::looks_like_ciphertext;
use crate::envelope::EnvelopeCodec;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::KeySource;

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub plaintext: String,
    /// Position in the ring of the key that opened the envelope
    pub key_index: usize,
}

/// Ordered candidate keys, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    candidates: Vec<KeySource>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: KeySource) -> Self {
        Self {
            candidates: vec![key],
        }
    }

    /// Append a candidate at the lowest priority.
    pub fn push(&mut self, key: KeySource) {
        self.candidates.push(key);
    }

    pub fn with(mut self, key: KeySource) -> Self {
        self.push(key);
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&KeySource> {
        self.candidates.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeySource> {
        self.candidates.iter()
    }

    /// Open `envelope` with the first candidate that yields plaintext.
    pub fn resolve(&self, codec: &EnvelopeCodec, envelope: &str) -> CryptoResult<Resolved> {
        for (key_index, key) in self.candidates.iter().enumerate() {
            match codec.open(envelope, key) {
                Ok(plaintext) if !looks_like_ciphertext(&plaintext) => {
                    tracing::trace!(key = key.label(), key_index, "resolved envelope");
                    return Ok(Resolved {
                        plaintext,
                        key_index,
                    });
                }
                Ok(_) => {
                    tracing::trace!(key = key.label(), key_index, "candidate returned ciphertext");
                }
                Err(CryptoError::AuthenticationFailed) | Err(CryptoError::InvalidUtf8) => {
                    tracing::trace!(key = key.label(), key_index, "candidate failed");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CryptoError::NoKeyMatched {
            tried: self.candidates.len(),
        })
    }
}

impl FromIterator<KeySource> for KeyRing {
    fn from_iter<I: IntoIterator<Item = KeySource>>(iter: I) -> Self {
        Self {
            candidates: iter.into_iter().collect(),
        }
    }
}
