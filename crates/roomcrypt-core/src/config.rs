use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RoomError, RoomResult};

/// Top-level configuration (loaded from roomcrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcryptConfig {
    pub crypto: CryptoConfig,
    pub store: StoreConfig,
    pub rotation: RotationConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

impl RoomcryptConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> RoomResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| RoomError::Config(format!("{}: {e}", path.display())))
    }
}

/// Key derivation and envelope format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-SHA256 iterations for password-derived keys (default: 100000)
    pub password_iterations: u32,
    /// PBKDF2-SHA256 iterations for room-id derived keys (default: 1000)
    pub room_id_iterations: u32,
    /// Write envelopes with the `rc1.` format tag (default: false)
    pub tagged_envelopes: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            password_iterations: 100_000,
            room_id_iterations: 1_000,
            tagged_envelopes: false,
        }
    }
}

/// Which OpenDAL service backs the item store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Fs,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    pub bucket: String,
    /// Refuse plaintext HTTP S3 endpoints
    pub enforce_tls: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fs,
            root: PathBuf::from("~/.local/share/roomcrypt"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "roomcrypt".into(),
            enforce_tls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Maximum outstanding per-item writes during a rotation pass
    pub max_concurrency: usize,
    /// Removing a password stores plaintext instead of re-keying to the room id
    pub plaintext_on_remove: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            plaintext_on_remove: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a cached room secret in seconds
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 1800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
