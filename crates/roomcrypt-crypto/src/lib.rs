//! roomcrypt-crypto: content encryption for shared rooms
//!
//! Every item payload is sealed client-side before it reaches the store.
//!
//! Key sources:
//! ```text
//! Password   -> PBKDF2-SHA256 (random 16-byte salt per seal, high iteration count)
//! Room id    -> PBKDF2-SHA256 (salt built from the room id, low iteration count)
//! Raw key    -> random 256-bit key (legacy password-less rooms)
//! ```
//!
//! Envelope (each part standard base64, joined by `:`):
//! ```text
//! password-derived:  salt:nonce:ciphertext+tag
//! room-id / raw:     nonce:ciphertext+tag
//! ```
//! An optional `rc1.` prefix tags the envelope format explicitly.

pub mod classify;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod resolve;
pub mod secret;
pub mod session;

pub use classify::{classify, looks_like_ciphertext, Classification};
pub use credential::{hash_password, verify_password};
pub use envelope::{Envelope, EnvelopeCodec};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_from_password, derive_from_room_id, DerivationMode, DerivedKey, KdfParams};
pub use keys::{generate_random_key, KeySource, RawKey};
pub use resolve::{KeyRing, Resolved};
pub use secret::{RoomSecretState, Secret};
pub use session::SecretCache;

/// Size of a content key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a password salt
pub const SALT_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
