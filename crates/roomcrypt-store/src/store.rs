use async_trait::async_trait;
use roomcrypt_core::types::{CredentialHash, Item, ItemPatch, NewItem, RoomSettings, SettingsChange};

use crate::error::StoreResult;

/// Item and room persistence.
///
/// There is no multi-row transaction: every call touches one item or one
/// room's settings.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Persist a new item; the store assigns its id and creation time.
    async fn create_item(&self, item: NewItem) -> StoreResult<Item>;

    /// All items of a room, oldest first.
    async fn fetch_items(&self, room_id: &str) -> StoreResult<Vec<Item>>;

    /// Replace the fields set in `patch`; omitted fields are untouched.
    async fn update_item_fields(&self, item_id: &str, patch: &ItemPatch) -> StoreResult<()>;

    /// Delete an item. Protected rooms require the matching credential.
    async fn delete_item(
        &self,
        item_id: &str,
        credential: Option<&CredentialHash>,
    ) -> StoreResult<()>;

    /// Current settings of a room (defaults for a room never configured).
    async fn room_settings(&self, room_id: &str) -> StoreResult<RoomSettings>;

    /// Apply `change` after checking `change.current_credential` against the
    /// stored hash. Nothing is written when the check fails.
    async fn update_room_secret(
        &self,
        room_id: &str,
        change: &SettingsChange,
    ) -> StoreResult<RoomSettings>;
}
