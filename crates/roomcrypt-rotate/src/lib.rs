//! roomcrypt-rotate: re-keying room content when its secret changes
//!
//! Settings flow:
//! ```text
//! update_room_secret (authorized, written first)
//!   -> fetch all items of the room
//!   -> per item: open under the old key ring, seal under the new secret
//!   -> write back only the fields that changed, one item at a time
//! ```
//! There is no multi-item transaction. A pass reports how many items made
//! it; items that failed keep their previous, still-readable envelope.

pub mod engine;
pub mod room;

pub use engine::{
    rekey_item, FailureReason, ItemOutcome, RotationEngine, RotationKind, RotationPhase,
    RotationPlan, RotationReport, RotationTarget,
};
pub use room::{OpenedItem, PasswordUpdate, RoomController, RotationStatus, SettingsOutcome, SettingsRequest};
