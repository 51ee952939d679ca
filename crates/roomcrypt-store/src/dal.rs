//! OpenDAL-backed store
//!
//! Object layout:
//! ```text
//! items/{item_id}.json             Item document
//! rooms/{room_id}/index/{item_id}  empty marker, lists a room's items
//! rooms/{room_id}/settings.json    RoomSettings document
//! ```
//!
//! Each call reads and writes individual objects; concurrent writers to the
//! same item are last-write-wins.

use async_trait::async_trait;
use chrono::Utc;
use opendal::{ErrorKind, Operator};
use roomcrypt_core::types::{
    CredentialHash, Item, ItemPatch, NewItem, PasswordChange, Permissions, RoomSettings,
    SettingsChange,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::ItemStore;

#[derive(Debug, Clone)]
pub struct OpendalStore {
    op: Operator,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// A store over a fresh in-memory operator.
    pub fn memory() -> StoreResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())?.finish();
        Ok(Self::new(op))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        match self.op.read(path).await {
            Ok(buf) => Ok(Some(serde_json::from_slice(&buf.to_vec())?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.op.write(path, bytes).await?;
        Ok(())
    }

    async fn load_item(&self, item_id: &str) -> StoreResult<Item> {
        check_id(item_id)?;
        self.read_json(&item_path(item_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))
    }

    async fn load_settings(&self, room_id: &str) -> StoreResult<RoomSettings> {
        check_id(room_id)?;
        Ok(self
            .read_json(&settings_path(room_id))
            .await?
            .unwrap_or_else(|| RoomSettings::new(room_id)))
    }

    async fn ensure_live(&self, room_id: &str) -> StoreResult<RoomSettings> {
        let settings = self.load_settings(room_id).await?;
        match settings.expires_at {
            Some(at) if at <= Utc::now() => Err(StoreError::Expired(room_id.to_string())),
            _ => Ok(settings),
        }
    }
}

#[async_trait]
impl ItemStore for OpendalStore {
    async fn create_item(&self, new: NewItem) -> StoreResult<Item> {
        self.ensure_live(&new.room_id).await?;

        let item = Item {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: new.room_id,
            kind: new.kind,
            content: new.content,
            display_name: new.display_name,
            language: new.language,
            file: new.file,
            created_at: Utc::now(),
        };

        self.write_json(&item_path(&item.id), &item).await?;
        self.op
            .write(&index_path(&item.room_id, &item.id), Vec::<u8>::new())
            .await?;

        debug!(room_id = %item.room_id, item_id = %item.id, kind = %item.kind, "item created");
        Ok(item)
    }

    async fn fetch_items(&self, room_id: &str) -> StoreResult<Vec<Item>> {
        self.ensure_live(room_id).await?;

        let entries = match self.op.list(&index_dir(room_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let item_id = entry.name();
            if item_id.is_empty() || item_id.ends_with('/') {
                continue;
            }
            match self.read_json::<Item>(&item_path(item_id)).await? {
                Some(item) => items.push(item),
                None => warn!(room_id, item_id, "index entry without item document"),
            }
        }

        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update_item_fields(&self, item_id: &str, patch: &ItemPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut item = self.load_item(item_id).await?;
        if let Some(content) = &patch.content {
            item.content = content.clone();
        }
        if let Some(name) = &patch.display_name {
            item.display_name = Some(name.clone());
        }
        self.write_json(&item_path(item_id), &item).await?;
        debug!(item_id, "item fields updated");
        Ok(())
    }

    async fn delete_item(
        &self,
        item_id: &str,
        credential: Option<&CredentialHash>,
    ) -> StoreResult<()> {
        let item = self.load_item(item_id).await?;
        let settings = self.load_settings(&item.room_id).await?;

        let authorized = match &settings.password_hash {
            Some(expected) => credential == Some(expected),
            None => settings.permissions == Permissions::Edit,
        };
        if !authorized {
            return Err(StoreError::Unauthorized(format!(
                "deleting item {item_id} from room {}",
                item.room_id
            )));
        }

        self.op.delete(&index_path(&item.room_id, item_id)).await?;
        self.op.delete(&item_path(item_id)).await?;
        debug!(room_id = %item.room_id, item_id, "item deleted");
        Ok(())
    }

    async fn room_settings(&self, room_id: &str) -> StoreResult<RoomSettings> {
        self.load_settings(room_id).await
    }

    async fn update_room_secret(
        &self,
        room_id: &str,
        change: &SettingsChange,
    ) -> StoreResult<RoomSettings> {
        let mut settings = self.load_settings(room_id).await?;

        if let Some(expected) = &settings.password_hash {
            if change.current_credential.as_ref() != Some(expected) {
                warn!(room_id, "settings update rejected: credential mismatch");
                return Err(StoreError::Unauthorized(format!(
                    "room {room_id} requires the current password"
                )));
            }
        }

        match &change.password {
            PasswordChange::Keep => {}
            PasswordChange::Set(hash) => settings.password_hash = Some(hash.clone()),
            PasswordChange::Remove => settings.password_hash = None,
        }
        if let Some(permissions) = change.permissions {
            settings.permissions = permissions;
        }
        if let Some(expires_at) = change.expires_at {
            settings.expires_at = Some(expires_at);
        }

        self.write_json(&settings_path(room_id), &settings).await?;
        info!(
            room_id,
            protected = settings.is_protected(),
            permissions = ?settings.permissions,
            "room settings updated"
        );
        Ok(settings)
    }
}

/// Ids become path segments, so they must not contain separators.
fn check_id(id: &str) -> StoreResult<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn item_path(item_id: &str) -> String {
    format!("items/{item_id}.json")
}

fn index_dir(room_id: &str) -> String {
    format!("rooms/{room_id}/index/")
}

fn index_path(room_id: &str, item_id: &str) -> String {
    format!("rooms/{room_id}/index/{item_id}")
}

fn settings_path(room_id: &str) -> String {
    format!("rooms/{room_id}/settings.json")
}
