//! Short-lived client-side cache of room secrets
//!
//! Entries expire after a fixed TTL and are dropped explicitly when the
//! client leaves a room. Secret material is zeroized when entries drop.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::secret::RoomSecretState;

struct CachedSecret {
    state: RoomSecretState,
    stored_at: Instant,
}

/// Room secrets keyed by room id
pub struct SecretCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSecret>>,
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &roomcrypt_core::config::SessionConfig) -> Self {
        Self::new(Duration::from_secs(cfg.ttl_secs))
    }

    /// Store (or replace) the secret state of a room, restarting its TTL.
    pub fn insert(&self, state: RoomSecretState) {
        let room_id = state.room_id().to_string();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                room_id,
                CachedSecret {
                    state,
                    stored_at: Instant::now(),
                },
            );
    }

    /// A copy of the cached state, if present and not expired.
    pub fn get(&self, room_id: &str) -> Option<RoomSecretState> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(room_id) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.state.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.evict_expired(room_id)
    }

    /// Remove an entry seen as expired under the read lock. The entry may
    /// have been replaced since; a fresh one is kept and returned.
    fn evict_expired(&self, room_id: &str) -> Option<RoomSecretState> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(room_id) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.state.clone()),
            Some(_) => {
                tracing::debug!(room_id, "cached room secret expired");
                entries.remove(room_id);
                None
            }
            None => None,
        }
    }

    /// Mutate a cached state in place. Returns false if the room is not cached.
    pub fn update<F>(&self, room_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut RoomSecretState),
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(room_id) {
            Some(entry) => {
                f(&mut entry.state);
                entry.stored_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Drop a room's secret (e.g. when the client navigates away).
    pub fn forget(&self, room_id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id)
            .is_some()
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
