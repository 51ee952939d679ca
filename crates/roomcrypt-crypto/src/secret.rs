//! Room secrets and the candidate keys they imply

use secrecy::{ExposeSecret, SecretString};

use crate::keys::{KeySource, RawKey};
use crate::resolve::KeyRing;

/// The secret gating a room
pub enum Secret {
    Password(SecretString),
    /// No password set: the room id itself is the secret.
    Implicit { room_id: String },
}

impl Secret {
    pub fn password(password: impl Into<String>) -> Self {
        Secret::Password(SecretString::from(password.into()))
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Secret::Password(_))
    }

    /// The key new content is sealed under.
    pub fn sealing_key(&self) -> KeySource {
        match self {
            Secret::Password(p) => KeySource::Password(clone_secret(p)),
            Secret::Implicit { room_id } => KeySource::RoomId(room_id.clone()),
        }
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        match self {
            Secret::Password(p) => Secret::Password(clone_secret(p)),
            Secret::Implicit { room_id } => Secret::Implicit {
                room_id: room_id.clone(),
            },
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Secret::Password([REDACTED])"),
            Secret::Implicit { room_id } => write!(f, "Secret::Implicit({room_id})"),
        }
    }
}

/// Current secret of a room plus the superseded passwords still needed to
/// read content sealed before the last change.
pub struct RoomSecretState {
    room_id: String,
    current: Secret,
    /// Most recent first
    previous_passwords: Vec<SecretString>,
    /// Raw keys from older password-less schemes (URL fragment, session key)
    legacy_keys: Vec<RawKey>,
}

impl RoomSecretState {
    pub fn implicit(room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        Self {
            current: Secret::Implicit {
                room_id: room_id.clone(),
            },
            room_id,
            previous_passwords: Vec::new(),
            legacy_keys: Vec::new(),
        }
    }

    pub fn with_password(room_id: impl Into<String>, password: SecretString) -> Self {
        Self {
            room_id: room_id.into(),
            current: Secret::Password(password),
            previous_passwords: Vec::new(),
            legacy_keys: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn current(&self) -> &Secret {
        &self.current
    }

    pub fn previous_passwords(&self) -> &[SecretString] {
        &self.previous_passwords
    }

    pub fn is_protected(&self) -> bool {
        self.current.is_password()
    }

    /// Record an earlier password, below any already known.
    pub fn push_previous_password(&mut self, password: SecretString) {
        self.previous_passwords.push(password);
    }

    pub fn add_legacy_key(&mut self, key: RawKey) {
        self.legacy_keys.push(key);
    }

    /// Key for sealing new content.
    pub fn sealing_key(&self) -> KeySource {
        self.current.sealing_key()
    }

    /// Candidate keys in resolution order: current secret, previous
    /// passwords (most recent first), the room-id key, then legacy raw keys.
    ///
    /// The room-id key is offered for protected rooms too, so items a
    /// partially failed "set password" rotation left behind stay readable.
    pub fn key_ring(&self) -> KeyRing {
        let mut ring = KeyRing::single(self.current.sealing_key());
        for password in &self.previous_passwords {
            ring.push(KeySource::Password(clone_secret(password)));
        }
        if self.current.is_password() {
            ring.push(KeySource::RoomId(self.room_id.clone()));
        }
        for key in &self.legacy_keys {
            ring.push(KeySource::Raw(key.clone()));
        }
        ring
    }

    /// Switch to `next`. A superseded password moves to the front of
    /// `previous_passwords`; setting the same password again is a no-op.
    pub fn rotate_to(&mut self, next: Secret) {
        if let (Secret::Password(old), Secret::Password(new)) = (&self.current, &next) {
            if old.expose_secret() == new.expose_secret() {
                return;
            }
        }
        let old = std::mem::replace(&mut self.current, next);
        if let Secret::Password(old_password) = old {
            self.previous_passwords
                .retain(|p| p.expose_secret() != old_password.expose_secret());
            self.previous_passwords.insert(0, old_password);
        }
        if let Secret::Password(new) = &self.current {
            self.previous_passwords
                .retain(|p| p.expose_secret() != new.expose_secret());
        }
    }
}

impl Clone for RoomSecretState {
    fn clone(&self) -> Self {
        Self {
            room_id: self.room_id.clone(),
            current: self.current.clone(),
            previous_passwords: self.previous_passwords.iter().map(clone_secret).collect(),
            legacy_keys: self.legacy_keys.clone(),
        }
    }
}

impl std::fmt::Debug for RoomSecretState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSecretState")
            .field("room_id", &self.room_id)
            .field("current", &self.current)
            .field("previous_passwords", &self.previous_passwords.len())
            .field("legacy_keys", &self.legacy_keys.len())
            .finish()
    }
}

pub(crate) fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_random_key;

    fn labels(ring: &KeyRing) -> Vec<&'static str> {
        ring.iter().map(KeySource::label).collect()
    }

    #[test]
    fn test_implicit_ring() {
        let mut state = RoomSecretState::implicit("room-1");
        state.add_legacy_key(generate_random_key());
        assert_eq!(labels(&state.key_ring()), vec!["room-id", "raw"]);
        assert!(!state.is_protected());
    }

    #[test]
    fn test_protected_ring_order() {
        let mut state = RoomSecretState::with_password("room-1", SecretString::from("v1"));
        state.rotate_to(Secret::password("v2"));
        state.rotate_to(Secret::password("v3"));

        let ring = state.key_ring();
        assert_eq!(labels(&ring), vec!["password", "password", "password", "room-id"]);

        let previous: Vec<&str> = state
            .previous_passwords()
            .iter()
            .map(|p| p.expose_secret())
            .collect();
        assert_eq!(previous, vec!["v2", "v1"], "most recent first");
    }

    #[test]
    fn test_rotate_to_same_password_is_noop() {
        let mut state = RoomSecretState::with_password("room-1", SecretString::from("pw"));
        state.rotate_to(Secret::password("pw"));
        assert!(state.previous_passwords().is_empty());
    }

    #[test]
    fn test_remove_password_keeps_it_readable() {
        let mut state = RoomSecretState::with_password("room-1", SecretString::from("pw"));
        state.rotate_to(Secret::Implicit {
            room_id: "room-1".into(),
        });

        assert!(!state.is_protected());
        assert_eq!(labels(&state.key_ring()), vec!["room-id", "password"]);
    }

    #[test]
    fn test_reusing_old_password_dedupes_history() {
        let mut state = RoomSecretState::with_password("room-1", SecretString::from("a"));
        state.rotate_to(Secret::password("b"));
        state.rotate_to(Secret::password("a"));

        let previous: Vec<&str> = state
            .previous_passwords()
            .iter()
            .map(|p| p.expose_secret())
            .collect();
        assert_eq!(previous, vec!["b"]);
    }

    #[test]
    fn test_debug_hides_passwords() {
        let state = RoomSecretState::with_password("room-1", SecretString::from("hunter2"));
        assert!(!format!("{state:?}").contains("hunter2"));
    }
}
