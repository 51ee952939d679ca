//! Client-side room operations
//!
//! Items are sealed before they reach the store and opened with the room's
//! key ring when listed. Secrets live in a [`SecretCache`] for the duration
//! of a visit. Settings changes go to the store first; only an accepted
//! change triggers a rotation pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roomcrypt_core::config::{RoomcryptConfig, RotationConfig};
use roomcrypt_core::types::{
    CredentialHash, Item, ItemPatch, NewItem, PasswordChange, Permissions, RoomSettings,
    SettingsChange,
};
use roomcrypt_core::{RoomError, RoomResult};
use roomcrypt_crypto::{
    hash_password, looks_like_ciphertext, verify_password, CryptoError, EnvelopeCodec, KeyRing,
    RawKey, RoomSecretState, Secret, SecretCache,
};
use roomcrypt_store::ItemStore;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::engine::{RotationEngine, RotationKind, RotationPlan, RotationReport, RotationTarget};

/// Requested change to the room password
#[derive(Default)]
pub enum PasswordUpdate {
    #[default]
    Keep,
    Set(SecretString),
    Remove,
}

impl std::fmt::Debug for PasswordUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordUpdate::Keep => f.write_str("Keep"),
            PasswordUpdate::Set(_) => f.write_str("Set([REDACTED])"),
            PasswordUpdate::Remove => f.write_str("Remove"),
        }
    }
}

#[derive(Debug, Default)]
pub struct SettingsRequest {
    pub password: PasswordUpdate,
    pub permissions: Option<Permissions>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum RotationStatus {
    /// The secret did not change
    NotNeeded,
    Completed(RotationReport),
    /// Settings were saved but the pass could not start (e.g. fetch failed)
    Failed(String),
}

#[derive(Debug)]
pub struct SettingsOutcome {
    pub settings: RoomSettings,
    pub rotation: RotationStatus,
}

impl SettingsOutcome {
    /// Non-blocking notice for the user when content was not fully re-keyed.
    pub fn warning(&self) -> Option<String> {
        match &self.rotation {
            RotationStatus::Completed(report) if report.is_partial() => Some(report.summary()),
            RotationStatus::Completed(_) | RotationStatus::NotNeeded => None,
            RotationStatus::Failed(e) => {
                Some(format!("settings saved, content not re-encrypted: {e}"))
            }
        }
    }
}

/// An item with its sealed fields opened where possible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedItem {
    pub item: Item,
    /// At least one field could not be opened with any known key and still
    /// holds its envelope.
    pub locked: bool,
}

pub struct RoomController {
    store: Arc<dyn ItemStore>,
    codec: EnvelopeCodec,
    cache: Arc<SecretCache>,
    engine: RotationEngine,
    plaintext_on_remove: bool,
}

impl RoomController {
    pub fn new(
        store: Arc<dyn ItemStore>,
        codec: EnvelopeCodec,
        cache: Arc<SecretCache>,
        rotation: &RotationConfig,
    ) -> Self {
        let engine = RotationEngine::new(Arc::clone(&store), codec.clone(), rotation.max_concurrency);
        Self {
            store,
            codec,
            cache,
            engine,
            plaintext_on_remove: rotation.plaintext_on_remove,
        }
    }

    pub fn from_config(store: Arc<dyn ItemStore>, cfg: &RoomcryptConfig) -> Self {
        Self::new(
            store,
            EnvelopeCodec::from_config(&cfg.crypto),
            Arc::new(SecretCache::from_config(&cfg.session)),
            &cfg.rotation,
        )
    }

    pub fn engine(&self) -> &RotationEngine {
        &self.engine
    }

    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }

    /// Unlock a room for this session.
    ///
    /// Protected rooms need the password, checked against the stored
    /// credential hash. Keys already cached for the room (earlier passwords,
    /// legacy keys) are kept.
    pub async fn enter_room(
        &self,
        room_id: &str,
        password: Option<SecretString>,
    ) -> RoomResult<RoomSecretState> {
        let settings = self.store.room_settings(room_id).await?;
        let current = match (&settings.password_hash, password) {
            (Some(expected), Some(password)) => {
                if !verify_password(&password, expected) {
                    warn!(room_id, "wrong room password");
                    return Err(RoomError::Unauthorized(format!(
                        "wrong password for room {room_id}"
                    )));
                }
                Secret::Password(password)
            }
            (Some(_), None) => return Err(key_missing(room_id)),
            (None, _) => Secret::Implicit {
                room_id: room_id.to_string(),
            },
        };

        let state = match self.cache.get(room_id) {
            Some(mut cached) => {
                cached.rotate_to(current);
                cached
            }
            None => match current {
                Secret::Password(password) => RoomSecretState::with_password(room_id, password),
                Secret::Implicit { .. } => RoomSecretState::implicit(room_id),
            },
        };
        self.cache.insert(state.clone());
        debug!(room_id, protected = state.is_protected(), "entered room");
        Ok(state)
    }

    /// Forget the room's secret (navigation away).
    pub fn leave_room(&self, room_id: &str) -> bool {
        self.cache.forget(room_id)
    }

    /// Offer an earlier password for reading items sealed before a change.
    pub fn remember_previous_password(&self, room_id: &str, password: SecretString) -> bool {
        self.cache
            .update(room_id, |state| state.push_previous_password(password))
    }

    /// Offer a raw key from a password-less link or an earlier session.
    pub fn remember_legacy_key(&self, room_id: &str, key: RawKey) -> bool {
        self.cache.update(room_id, |state| state.add_legacy_key(key))
    }

    async fn secret_state(&self, room_id: &str) -> RoomResult<RoomSecretState> {
        if let Some(state) = self.cache.get(room_id) {
            return Ok(state);
        }
        let settings = self.store.room_settings(room_id).await?;
        if settings.is_protected() {
            return Err(key_missing(room_id));
        }
        let state = RoomSecretState::implicit(room_id);
        self.cache.insert(state.clone());
        Ok(state)
    }

    /// Seal and store a new item.
    ///
    /// Fails with [`RoomError::EncryptionKeyMissing`] if the room's secret is
    /// unknown; nothing is stored in that case.
    pub async fn create_item(&self, new: NewItem) -> RoomResult<Item> {
        let room_id = new.room_id.clone();
        let state = self.secret_state(&room_id).await?;
        let key = state.sealing_key();
        let codec = self.codec.clone();

        let sealed = tokio::task::spawn_blocking(move || -> Result<NewItem, CryptoError> {
            let mut new = new;
            new.content = codec.seal_verified(&new.content, &key)?;
            if new.kind.has_sealed_name() {
                if let Some(name) = new.display_name.take() {
                    new.display_name = Some(codec.seal_verified(&name, &key)?);
                }
            }
            Ok(new)
        })
        .await
        .map_err(|e| RoomError::Other(anyhow::Error::new(e)))?
        .map_err(|e| match e {
            CryptoError::EncryptionKeyMissing => key_missing(&room_id),
            other => other.into(),
        })?;

        let item = self.store.create_item(sealed).await?;
        debug!(room_id, item_id = %item.id, kind = %item.kind, "sealed item stored");
        Ok(item)
    }

    /// All items of a room, opened with every key known for it.
    pub async fn list_items(&self, room_id: &str) -> RoomResult<Vec<OpenedItem>> {
        let state = self.secret_state(room_id).await?;
        let items = self.store.fetch_items(room_id).await?;
        let ring = state.key_ring();
        let codec = self.codec.clone();

        let opened = tokio::task::spawn_blocking(move || {
            items
                .into_iter()
                .map(|item| open_item(&codec, &ring, item))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| RoomError::Other(anyhow::Error::new(e)))?;

        let locked = opened.iter().filter(|o| o.locked).count();
        if locked > 0 {
            warn!(room_id, locked, total = opened.len(), "some items could not be opened");
        }
        Ok(opened)
    }

    pub async fn delete_item(&self, room_id: &str, item_id: &str) -> RoomResult<()> {
        let credential = self
            .cache
            .get(room_id)
            .and_then(|state| credential_of(state.current()));
        self.store.delete_item(item_id, credential.as_ref()).await?;
        Ok(())
    }

    /// Apply a settings change and re-key the room's content if its secret
    /// changed.
    ///
    /// The change is authorized and written by the store first; a rejected
    /// change runs no rotation. A rotation that fails for some items still
    /// returns `Ok`, with the count in the outcome. An empty password is
    /// refused before anything is written.
    pub async fn update_settings(
        &self,
        room_id: &str,
        request: SettingsRequest,
    ) -> RoomResult<SettingsOutcome> {
        if let PasswordUpdate::Set(password) = &request.password {
            if password.expose_secret().is_empty() {
                return Err(key_missing(room_id));
            }
        }
        let state = self.secret_state(room_id).await?;

        let (password, next, kind) = match request.password {
            PasswordUpdate::Keep => (PasswordChange::Keep, None, None),
            PasswordUpdate::Set(password) => {
                let kind = match state.current() {
                    Secret::Password(current)
                        if current.expose_secret() == password.expose_secret() =>
                    {
                        None
                    }
                    Secret::Password(_) => Some(RotationKind::ChangePassword),
                    Secret::Implicit { .. } => Some(RotationKind::SetPassword),
                };
                (
                    PasswordChange::Set(hash_password(&password)),
                    Some(Secret::Password(password)),
                    kind,
                )
            }
            PasswordUpdate::Remove if state.is_protected() => (
                PasswordChange::Remove,
                Some(Secret::Implicit {
                    room_id: room_id.to_string(),
                }),
                Some(RotationKind::RemovePassword),
            ),
            PasswordUpdate::Remove => (PasswordChange::Keep, None, None),
        };

        let change = SettingsChange {
            current_credential: credential_of(state.current()),
            password,
            permissions: request.permissions,
            expires_at: request.expires_at,
        };
        let settings = self.store.update_room_secret(room_id, &change).await?;

        let Some(next) = next else {
            return Ok(SettingsOutcome {
                settings,
                rotation: RotationStatus::NotNeeded,
            });
        };

        let from = state.key_ring();
        let to = match kind {
            Some(RotationKind::RemovePassword) if self.plaintext_on_remove => {
                RotationTarget::Plaintext
            }
            _ => RotationTarget::Sealed(next.sealing_key()),
        };
        let mut updated = state;
        updated.rotate_to(next);
        self.cache.insert(updated);

        let Some(kind) = kind else {
            return Ok(SettingsOutcome {
                settings,
                rotation: RotationStatus::NotNeeded,
            });
        };

        let plan = RotationPlan {
            room_id: room_id.to_string(),
            kind,
            from,
            to,
        };
        let rotation = match self.engine.rotate(plan).await {
            Ok(report) => RotationStatus::Completed(report),
            Err(e) => {
                warn!(room_id, error = %e, "rotation pass could not run");
                RotationStatus::Failed(e.to_string())
            }
        };
        info!(room_id, %kind, "room secret changed");
        Ok(SettingsOutcome { settings, rotation })
    }
}

impl std::fmt::Debug for RoomController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomController")
            .field("codec", &self.codec)
            .field("cache", &self.cache)
            .field("engine", &self.engine)
            .field("plaintext_on_remove", &self.plaintext_on_remove)
            .finish()
    }
}

fn key_missing(room_id: &str) -> RoomError {
    RoomError::EncryptionKeyMissing {
        room_id: room_id.to_string(),
    }
}

fn credential_of(secret: &Secret) -> Option<CredentialHash> {
    match secret {
        Secret::Password(password) => Some(hash_password(password)),
        Secret::Implicit { .. } => None,
    }
}

/// Open every sealed field the ring can; plaintext fields pass through.
fn open_item(codec: &EnvelopeCodec, ring: &KeyRing, mut item: Item) -> OpenedItem {
    let mut locked = false;
    let mut opened = ItemPatch::default();
    for (field, value) in item.sealed_fields() {
        if !looks_like_ciphertext(value) {
            continue;
        }
        match ring.resolve(codec, value) {
            Ok(resolved) => opened.set(field, resolved.plaintext),
            Err(e) => {
                debug!(item_id = %item.id, %field, error = %e, "field stays locked");
                locked = true;
            }
        }
    }
    if let Some(content) = opened.content {
        item.content = content;
    }
    if let Some(name) = opened.display_name {
        item.display_name = Some(name);
    }
    OpenedItem { item, locked }
}
