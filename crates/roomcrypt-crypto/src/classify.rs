//! Ciphertext classification
//!
//! Untagged envelopes carry no format marker, so whether a stored string is
//! an envelope is decided from its shape: 2 or 3 `:`-separated segments, each
//! from the base64 alphabet and at least [`MIN_SEGMENT_LEN`] long, and at
//! least [`MIN_TOTAL_LEN`] characters overall. This rejects ordinary content
//! that happens to contain `:` (URLs, timestamps, code) but is a heuristic:
//! short or oddly shaped plaintext can still be misclassified.
//!
//! Tagged envelopes (`rc1.` prefix) are recognised structurally: the value
//! must parse as an [`Envelope`] with full-size salt, nonce and tag, so user
//! text that merely starts with the tag stays plaintext.

use crate::envelope::{Envelope, FORMAT_TAG, SEPARATOR};

/// Minimum length of every segment of an untagged envelope
pub const MIN_SEGMENT_LEN: usize = 10;

/// Minimum total length of an untagged envelope
pub const MIN_TOTAL_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Produced by the envelope codec (as far as shape can tell).
    Ciphertext { tagged: bool },
    /// Has the separator and a plausible segment count but fails the
    /// charset/length checks. Treated as plaintext.
    Ambiguous,
    Plaintext,
}

impl Classification {
    pub fn is_ciphertext(self) -> bool {
        matches!(self, Classification::Ciphertext { .. })
    }
}

/// Classify a stored string.
pub fn classify(s: &str) -> Classification {
    if s.starts_with(FORMAT_TAG) {
        return if Envelope::parse(s).is_some() {
            Classification::Ciphertext { tagged: true }
        } else {
            Classification::Ambiguous
        };
    }

    if !s.contains(SEPARATOR) {
        return Classification::Plaintext;
    }

    let segments = s.split(SEPARATOR).count();
    if !(2..=3).contains(&segments) {
        return Classification::Plaintext;
    }

    if s.len() >= MIN_TOTAL_LEN && segments_ok(s, MIN_SEGMENT_LEN) {
        Classification::Ciphertext { tagged: false }
    } else {
        Classification::Ambiguous
    }
}

/// Whether `s` should be treated as an envelope.
pub fn looks_like_ciphertext(s: &str) -> bool {
    classify(s).is_ciphertext()
}

fn segments_ok(body: &str, min_len: usize) -> bool {
    let parts: Vec<&str> = body.split(SEPARATOR).collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| p.len() >= min_len && p.bytes().all(is_base64_byte))
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')
}
