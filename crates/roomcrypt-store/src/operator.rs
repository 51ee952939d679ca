//! OpenDAL Operator factory for roomcrypt store backends

use anyhow::{Context, Result};
use opendal::Operator;
use roomcrypt_core::config::{StoreBackend, StoreConfig};
use std::path::{Path, PathBuf};

/// Build an operator for the configured backend.
///
/// S3 credentials are read from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
/// If `enforce_tls` is set and the S3 endpoint uses HTTP, this returns an error.
pub fn build_operator(cfg: &StoreConfig) -> Result<Operator> {
    let op = match cfg.backend {
        StoreBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        StoreBackend::Fs => {
            let root = expand_home(&cfg.root);
            let root_str = root
                .to_str()
                .with_context(|| format!("store root is not UTF-8: {}", root.display()))?;
            let builder = opendal::services::Fs::default().root(root_str);
            Operator::new(builder)
                .context("creating OpenDAL fs operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
        StoreBackend::S3 => {
            check_endpoint_tls(cfg)?;
            let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
                .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
            let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY not set")?;

            let builder = opendal::services::S3::default()
                .endpoint(&cfg.endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket)
                .access_key_id(&access_key_id)
                .secret_access_key(&secret_access_key);

            Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .layer(
                    opendal::layers::RetryLayer::new()
                        .with_max_times(5)
                        .with_jitter(),
                )
                .finish()
        }
    };

    tracing::debug!(backend = ?cfg.backend, "store operator ready");
    Ok(op)
}

fn check_endpoint_tls(cfg: &StoreConfig) -> Result<()> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set store.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }
    Ok(())
}

/// Expand a leading `~/` using `$HOME`.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
