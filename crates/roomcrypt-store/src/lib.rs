//! roomcrypt-store: the item/room store consumed by the encryption core
//!
//! The store never sees plaintext or keys. It holds sealed item fields and
//! room settings, and is the authoritative gate for settings changes: a
//! protected room's settings only change when the caller presents the
//! matching credential hash.

pub mod dal;
pub mod error;
pub mod operator;
pub mod store;

pub use dal::OpendalStore;
pub use error::{StoreError, StoreResult};
pub use operator::build_operator;
pub use store::ItemStore;
