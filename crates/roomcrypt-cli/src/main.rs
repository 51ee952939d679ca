//! roomcrypt: sealed content rooms from the command line
//!
//! Envelope tools:
//!   seal [TEXT]          - seal text (or stdin) under a password, room id, or raw key
//!   open [ENVELOPE]      - open an envelope, trying every key given
//!   classify [TEXT]      - report whether a string looks like an envelope
//!   hash-password        - print the credential hash of a password
//!   gen-key              - print a fresh random base64 key
//!
//! Room commands (against the configured store):
//!   room add <room> <content>      - seal and store an item
//!   room list <room>               - list and open a room's items
//!   room delete <room> <item-id>   - delete an item
//!   room settings <room> ...       - change password/permissions/expiry, re-keying content
//!
//!   config show          - display current configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use roomcrypt_core::config::RoomcryptConfig;
use roomcrypt_core::types::{ItemKind, NewItem, Permissions};
use roomcrypt_core::RoomError;
use roomcrypt_crypto::{
    classify, generate_random_key, hash_password, Classification, EnvelopeCodec, KeyRing,
    KeySource, RawKey,
};
use roomcrypt_rotate::{
    PasswordUpdate, RoomController, RotationPhase, RotationStatus, SettingsRequest,
};
use roomcrypt_store::{build_operator, ItemStore, OpendalStore};
use secrecy::SecretString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "roomcrypt",
    version,
    about = "Client-side encryption for shared rooms",
    long_about = "roomcrypt: seal, open and re-key the content of transient sharing rooms"
)]
struct Cli {
    /// Path to roomcrypt.toml configuration file
    #[arg(long, short = 'c', env = "ROOMCRYPT_CONFIG", default_value = "roomcrypt.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "ROOMCRYPT_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "ROOMCRYPT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seal text under one key
    Seal {
        #[command(flatten)]
        keys: KeyArgs,
        /// Text to seal (default: stdin)
        text: Option<String>,
    },

    /// Open an envelope with the first key that fits
    ///
    /// Keys are tried in order: password, room id, raw key.
    Open {
        #[command(flatten)]
        keys: KeyArgs,
        /// Envelope to open (default: stdin)
        envelope: Option<String>,
    },

    /// Classify a string as envelope, ambiguous, or plaintext
    Classify {
        /// Text to classify (default: stdin)
        text: Option<String>,
    },

    /// Print the hex credential hash of a password
    #[command(name = "hash-password")]
    HashPassword,

    /// Generate a random 256-bit key (base64)
    #[command(name = "gen-key")]
    GenKey,

    /// Room operations against the configured store
    Room {
        #[command(subcommand)]
        action: RoomAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Use a password (read from ROOMCRYPT_PASSWORD or prompted)
    #[arg(long, short = 'p')]
    password: bool,

    /// Derive the key from a room id
    #[arg(long, short = 'r')]
    room: Option<String>,

    /// Raw base64 key from a password-less link
    #[arg(long, short = 'k', env = "ROOMCRYPT_KEY", hide_env_values = true)]
    key: Option<String>,
}

#[derive(Args, Debug)]
struct RoomKeyArgs {
    /// Earlier room password to try when opening items (prompted)
    #[arg(long)]
    previous_password: bool,

    /// Legacy raw base64 key to try when opening items (repeatable)
    #[arg(long = "legacy-key")]
    legacy_keys: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum RoomAction {
    /// Seal and store a new item
    Add {
        room: String,
        /// Item content (default: stdin)
        content: Option<String>,
        #[arg(long, default_value = "text")]
        kind: ItemKind,
        /// File name (file items only; sealed)
        #[arg(long)]
        name: Option<String>,
        /// Syntax hint for code items
        #[arg(long)]
        language: Option<String>,
    },

    /// List a room's items, opening what the known keys can
    List {
        room: String,
        /// Print items as JSON lines
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        keys: RoomKeyArgs,
    },

    /// Delete an item
    Delete { room: String, item_id: String },

    /// Change room settings; a password change re-keys existing items
    Settings {
        room: String,
        /// Set or change the password (new one from ROOMCRYPT_NEW_PASSWORD or prompted)
        #[arg(long, conflicts_with = "remove_password")]
        set_password: bool,
        /// Remove the password
        #[arg(long)]
        remove_password: bool,
        /// view or edit
        #[arg(long)]
        permissions: Option<Permissions>,
        /// Expire the room this many seconds from now
        #[arg(long)]
        expires_in: Option<i64>,
        #[command(flatten)]
        keys: RoomKeyArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RoomcryptConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "roomcrypt starting"
    );

    let codec = EnvelopeCodec::from_config(&config.crypto);

    match cli.command {
        Commands::Seal { keys, text } => cmd_seal(&codec, &keys, text),
        Commands::Open { keys, envelope } => cmd_open(&codec, &keys, envelope),
        Commands::Classify { text } => cmd_classify(text),
        Commands::HashPassword => cmd_hash_password(),
        Commands::GenKey => {
            println!("{}", generate_random_key().to_base64());
            Ok(())
        }
        Commands::Room { action } => cmd_room(&config, action).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Input helpers ─────────────────────────────────────────────────────────────

/// The positional argument, or all of stdin without its trailing newline.
fn arg_or_stdin(arg: Option<String>) -> Result<String> {
    if let Some(arg) = arg {
        return Ok(arg);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("reading stdin")?;
    let trimmed = buf.strip_suffix('\n').unwrap_or(&buf);
    Ok(trimmed.strip_suffix('\r').unwrap_or(trimmed).to_string())
}

fn read_password(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(password) = std::env::var(env_var) {
        return Ok(SecretString::from(password));
    }
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(password))
}

/// Prompt twice for a new password unless it comes from the environment.
fn read_new_password() -> Result<SecretString> {
    const ENV: &str = "ROOMCRYPT_NEW_PASSWORD";
    if let Ok(password) = std::env::var(ENV) {
        return Ok(SecretString::from(password));
    }
    let first = rpassword::prompt_password("New room password: ").context("reading password")?;
    let second = rpassword::prompt_password("Repeat password: ").context("reading password")?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }
    if first.is_empty() {
        anyhow::bail!("empty password; use --remove-password to unprotect a room");
    }
    Ok(SecretString::from(first))
}

fn key_sources(keys: &KeyArgs) -> Result<Vec<KeySource>> {
    let mut sources = Vec::new();
    if keys.password {
        sources.push(KeySource::Password(read_password(
            "ROOMCRYPT_PASSWORD",
            "Password: ",
        )?));
    }
    if let Some(room) = &keys.room {
        sources.push(KeySource::room_id(room.clone()));
    }
    if let Some(key) = &keys.key {
        sources.push(KeySource::Raw(
            RawKey::from_base64(key).context("parsing --key")?,
        ));
    }
    Ok(sources)
}

// ── Envelope commands ─────────────────────────────────────────────────────────

fn cmd_seal(codec: &EnvelopeCodec, keys: &KeyArgs, text: Option<String>) -> Result<()> {
    let mut sources = key_sources(keys)?;
    if sources.len() != 1 {
        anyhow::bail!("seal needs exactly one of --password, --room, --key");
    }
    let key = sources.remove(0);
    let plaintext = arg_or_stdin(text)?;
    let sealed = codec
        .seal_verified(&plaintext, &key)
        .context("sealing input")?;
    println!("{sealed}");
    Ok(())
}

fn cmd_open(codec: &EnvelopeCodec, keys: &KeyArgs, envelope: Option<String>) -> Result<()> {
    let ring: KeyRing = key_sources(keys)?.into_iter().collect();
    if ring.is_empty() {
        anyhow::bail!("open needs at least one of --password, --room, --key");
    }
    let envelope = arg_or_stdin(envelope)?;
    if !classify(&envelope).is_ciphertext() {
        // Legacy plaintext passes through unchanged.
        println!("{envelope}");
        return Ok(());
    }
    let resolved = ring.resolve(codec, &envelope).context("opening envelope")?;
    tracing::debug!(key_index = resolved.key_index, "envelope opened");
    println!("{}", resolved.plaintext);
    Ok(())
}

fn cmd_classify(text: Option<String>) -> Result<()> {
    let text = arg_or_stdin(text)?;
    let label = match classify(&text) {
        Classification::Ciphertext { tagged: true } => "ciphertext (tagged)",
        Classification::Ciphertext { tagged: false } => "ciphertext",
        Classification::Ambiguous => "ambiguous (treated as plaintext)",
        Classification::Plaintext => "plaintext",
    };
    println!("{label}");
    Ok(())
}

fn cmd_hash_password() -> Result<()> {
    let password = read_password("ROOMCRYPT_PASSWORD", "Password: ")?;
    println!("{}", hash_password(&password).as_str());
    Ok(())
}

// ── Room commands ─────────────────────────────────────────────────────────────

fn open_store(config: &RoomcryptConfig) -> Result<Arc<dyn ItemStore>> {
    let op = build_operator(&config.store).context("building store operator")?;
    Ok(Arc::new(OpendalStore::new(op)))
}

/// Unlock a room, prompting for its password only if it has one.
async fn enter(ctl: &RoomController, room: &str, keys: Option<&RoomKeyArgs>) -> Result<()> {
    match ctl.enter_room(room, None).await {
        Ok(_) => {}
        Err(RoomError::EncryptionKeyMissing { .. }) => {
            let password = read_password("ROOMCRYPT_PASSWORD", &format!("Password for {room}: "))?;
            ctl.enter_room(room, Some(password)).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let Some(keys) = keys else {
        return Ok(());
    };
    if keys.previous_password {
        let previous = rpassword::prompt_password("Previous password: ")
            .context("reading password")?;
        ctl.remember_previous_password(room, SecretString::from(previous));
    }
    for key in &keys.legacy_keys {
        let key = RawKey::from_base64(key).context("parsing --legacy-key")?;
        ctl.remember_legacy_key(room, key);
    }
    Ok(())
}

async fn cmd_room(config: &RoomcryptConfig, action: RoomAction) -> Result<()> {
    let ctl = RoomController::from_config(open_store(config)?, config);

    match action {
        RoomAction::Add {
            room,
            content,
            kind,
            name,
            language,
        } => {
            enter(&ctl, &room, None).await?;
            let content = arg_or_stdin(content)?;
            let item = ctl
                .create_item(NewItem {
                    room_id: room,
                    kind,
                    content,
                    display_name: name,
                    language,
                    file: None,
                })
                .await?;
            println!("{}", item.id);
        }

        RoomAction::List { room, json, keys } => {
            enter(&ctl, &room, Some(&keys)).await?;
            for opened in ctl.list_items(&room).await? {
                let item = &opened.item;
                if json {
                    let line = serde_json::json!({
                        "id": item.id,
                        "kind": item.kind,
                        "content": item.content,
                        "display_name": item.display_name,
                        "language": item.language,
                        "created_at": item.created_at,
                        "locked": opened.locked,
                    });
                    println!("{line}");
                    continue;
                }
                let lock = if opened.locked { " [locked]" } else { "" };
                let name = item.display_name.as_deref().unwrap_or("");
                println!(
                    "{}  {:<4}  {}{lock}  {name}",
                    item.id,
                    item.kind.to_string(),
                    item.created_at.format("%Y-%m-%d %H:%M:%S")
                );
                if !opened.locked {
                    println!("    {}", item.content);
                }
            }
        }

        RoomAction::Delete { room, item_id } => {
            enter(&ctl, &room, None).await?;
            ctl.delete_item(&room, &item_id).await?;
            println!("deleted {item_id}");
        }

        RoomAction::Settings {
            room,
            set_password,
            remove_password,
            permissions,
            expires_in,
            keys,
        } => {
            enter(&ctl, &room, Some(&keys)).await?;
            let password = if set_password {
                PasswordUpdate::Set(read_new_password()?)
            } else if remove_password {
                PasswordUpdate::Remove
            } else {
                PasswordUpdate::Keep
            };
            let expires_at =
                expires_in.map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));

            let mut phases = ctl.engine().subscribe();
            let progress = tokio::spawn(async move {
                while phases.changed().await.is_ok() {
                    let phase = *phases.borrow_and_update();
                    if phase != RotationPhase::Idle {
                        eprintln!("rotation: {phase}");
                    }
                }
            });

            let outcome = ctl
                .update_settings(
                    &room,
                    SettingsRequest {
                        password,
                        permissions,
                        expires_at,
                    },
                )
                .await;
            progress.abort();
            let outcome = outcome?;

            println!(
                "room {}: {}, {:?}",
                room,
                if outcome.settings.is_protected() {
                    "password protected"
                } else {
                    "no password"
                },
                outcome.settings.permissions
            );
            if let Some(at) = outcome.settings.expires_at {
                println!("  expires: {}", at.to_rfc3339());
            }
            if let RotationStatus::Completed(report) = &outcome.rotation {
                println!("  {}", report.summary());
            }
            if let Some(warning) = outcome.warning() {
                eprintln!("warning: {warning}");
            }
        }
    }
    Ok(())
}

// ── `roomcrypt config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &RoomcryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
