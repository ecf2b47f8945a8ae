use anyhow::{Context, Result};
use iobio_rpc::{Client, ClientConfig};
use iroh::SecretKey;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub remote: Option<String>,
    pub auth_key: Option<String>,
}

/// Reads the client config; a missing file yields the defaults.
pub fn load_config(config_file: &Path) -> Result<ClientConfig> {
    if !config_file.exists() {
        debug!("no config file at {config_file:?}, using defaults");
        return Ok(ClientConfig::default());
    }
    let content = std::fs::read_to_string(config_file)
        .with_context(|| format!("failed to read {}", config_file.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("could not parse client config {}", config_file.display()))
}

/// Resolves `path` against the config file's directory unless absolute.
pub fn resolve(config_file: &Path, path: &Path) -> PathBuf {
    match config_file.parent() {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Accepts 32 raw bytes or 64 hex characters.
pub fn parse_secret_key_bytes(bytes: &[u8]) -> Option<SecretKey> {
    if let Ok(arr) = <[u8; 32]>::try_from(bytes) {
        return Some(SecretKey::from_bytes(&arr));
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let decoded = hex::decode(text.trim()).ok()?;
    let arr = <[u8; 32]>::try_from(decoded.as_slice()).ok()?;
    Some(SecretKey::from_bytes(&arr))
}

pub fn load_secret_key(path: &Path) -> Result<SecretKey> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read secret key {}", path.display()))?;
    parse_secret_key_bytes(&bytes)
        .with_context(|| format!("{} does not hold a 32-byte secret key", path.display()))
}

/// Builds a connected client from the config file and overrides.
pub async fn connect(config_file: &Path, overrides: Overrides) -> Result<(Client, ClientConfig)> {
    let config = load_config(config_file)?;

    let mut builder = Client::builder();
    if let Some(remote) = overrides.remote.or_else(|| config.remote.clone()) {
        builder = builder.remote(remote);
    }
    if let Some(auth_key) = overrides.auth_key.or_else(|| config.auth_key.clone()) {
        builder = builder.auth_key(auth_key);
    }
    if let Some(file) = &config.secret_key_file {
        builder = builder.secret_key(load_secret_key(&resolve(config_file, file))?);
    }

    let client = builder
        .build()
        .await
        .context("failed to set up client (is `remote` configured?)")?;
    Ok((client, config))
}
