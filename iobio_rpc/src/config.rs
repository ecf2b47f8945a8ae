use std::path::PathBuf;

use iobio_sync::DEFAULT_WINDOW;
use serde::{Deserialize, Serialize};

/// Client settings as stored in `client.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Endpoint id of the remote node.
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub auth_key: Option<String>,
    /// Credits granted to the reinstate feed.
    #[serde(default = "default_window")]
    pub reinstate_window: u32,
    /// File holding the local endpoint's secret key, relative to the config
    /// file's directory unless absolute.
    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,
}

fn default_window() -> u32 {
    DEFAULT_WINDOW
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: None,
            auth_key: None,
            reinstate_window: DEFAULT_WINDOW,
            secret_key_file: None,
        }
    }
}
