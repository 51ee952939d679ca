use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of shared content held by an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Code,
    Url,
    /// Reference to a blob held by the file store; only metadata lives here
    File,
}

impl ItemKind {
    /// Whether `display_name` carries user content that must be sealed.
    pub fn has_sealed_name(self) -> bool {
        matches!(self, ItemKind::File)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemKind::Text => "text",
            ItemKind::Code => "code",
            ItemKind::Url => "url",
            ItemKind::File => "file",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ItemKind::Text),
            "code" => Ok(ItemKind::Code),
            "url" => Ok(ItemKind::Url),
            "file" => Ok(ItemKind::File),
            other => Err(format!("unknown item kind: {other}")),
        }
    }
}

/// Blob metadata for file items (the blob itself is stored elsewhere)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
}

/// A stored unit of shared content.
///
/// `content` and, for file items, `display_name` hold a ciphertext envelope
/// (or, for legacy rows, plaintext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub room_id: String,
    pub kind: ItemKind,
    pub content: String,
    pub display_name: Option<String>,
    /// Syntax hint for code items
    pub language: Option<String>,
    pub file: Option<FileRef>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// The fields whose stored value is sealed, in a fixed order.
    pub fn sealed_fields(&self) -> Vec<(SealedField, &str)> {
        let mut fields = vec![(SealedField::Content, self.content.as_str())];
        if self.kind.has_sealed_name() {
            if let Some(name) = &self.display_name {
                fields.push((SealedField::DisplayName, name.as_str()));
            }
        }
        fields
    }
}

/// Names a sealed field of an [`Item`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealedField {
    Content,
    DisplayName,
}

impl std::fmt::Display for SealedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealedField::Content => f.write_str("content"),
            SealedField::DisplayName => f.write_str("display_name"),
        }
    }
}

/// Producer input for a new item; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub room_id: String,
    pub kind: ItemKind,
    pub content: String,
    pub display_name: Option<String>,
    pub language: Option<String>,
    pub file: Option<FileRef>,
}

/// Partial update of an item's sealed fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub content: Option<String>,
    pub display_name: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.display_name.is_none()
    }

    pub fn set(&mut self, field: SealedField, value: String) {
        match field {
            SealedField::Content => self.content = Some(value),
            SealedField::DisplayName => self.display_name = Some(value),
        }
    }
}

/// Hex-encoded one-way digest of a room password.
///
/// Only ever compared for equality by the store; never used to derive keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialHash(String);

impl CredentialHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "CredentialHash({prefix}…)")
    }
}

/// Who may change a room's content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permissions {
    /// Anyone holding the room secret can view only
    View,
    /// Anyone holding the room secret can add and remove items
    #[default]
    Edit,
}

impl std::str::FromStr for Permissions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Permissions::View),
            "edit" => Ok(Permissions::Edit),
            other => Err(format!("unknown permissions: {other}")),
        }
    }
}

/// Server-side view of a room's settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub room_id: String,
    pub password_hash: Option<CredentialHash>,
    #[serde(default)]
    pub permissions: Permissions,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoomSettings {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            password_hash: None,
            permissions: Permissions::default(),
            expires_at: None,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Requested change to a room's stored password hash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PasswordChange {
    #[default]
    Keep,
    Set(CredentialHash),
    Remove,
}

/// An atomic settings update, validated by the store against
/// `current_credential` before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub current_credential: Option<CredentialHash>,
    pub password: PasswordChange,
    pub permissions: Option<Permissions>,
    pub expires_at: Option<DateTime<Utc>>,
}
