use std::{fs, io::Write, path::Path};

use anyhow::Context;
use clap::Subcommand;
use iobio_sync::DEFAULT_WINDOW;
use rand::RngCore;
use toml_edit::DocumentMut;
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the client config file if it doesn't exist and generates a keypair
    Init {
        /// Endpoint id of the remote node
        #[arg(long, value_name = "NODE_ID")]
        remote: Option<String>,
        /// Auth key sent with every request
        #[arg(long, value_name = "KEY")]
        auth_key: Option<String>,
    },
}

impl CmdConfig {
    pub fn run(self, config_file: &Path) -> anyhow::Result<()> {
        let mut doc = if config_file.exists() {
            fs::read_to_string(config_file)?
        } else {
            if let Some(dir) = config_file.parent() {
                fs::create_dir_all(dir)?;
            }
            String::new()
        }
        .parse::<DocumentMut>()
        .context("could not parse client config file")?;

        match self {
            Self::Init { remote, auth_key } => {
                let secretkey_file = config_file.with_extension("secretkey");
                let secretkey_name = secretkey_file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .context("secret key path is not valid UTF-8")?
                    .to_owned();

                if let Some(remote) = remote {
                    doc["remote"] = toml_edit::value(remote);
                }
                if let Some(auth_key) = auth_key {
                    doc["auth_key"] = toml_edit::value(auth_key);
                }
                if !doc.contains_key("reinstate_window") {
                    doc["reinstate_window"] = toml_edit::value(i64::from(DEFAULT_WINDOW));
                }
                doc["secret_key_file"] = toml_edit::value(secretkey_name);

                if !secretkey_file.exists() {
                    info!("generating secure random secret key for client");
                    let mut bytes = [0u8; 32];
                    rand::rng().fill_bytes(&mut bytes);
                    fs::write(&secretkey_file, bytes)?;
                }
            }
        }

        info!("writing to config file {config_file:?}");

        let tmp_path = config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, config_file)?;
        Ok(())
    }
}
