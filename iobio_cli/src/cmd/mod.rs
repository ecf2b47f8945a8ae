use std::path::PathBuf;

use anyhow::Result;
use iobio_rpc::{Client, ClientConfig};

use crate::RemoteCommand;
use crate::helpers::{self, Overrides};

mod files;
mod serve;
mod watch;

pub use files::{run_tag, run_viewer};
pub use serve::run_serve;
pub use watch::run_watch;

pub async fn run_command(
    config_file: PathBuf,
    overrides: Overrides,
    cmd: crate::Commands,
) -> Result<()> {
    match cmd {
        crate::Commands::Config { cmd } => cmd.run(&config_file),
        crate::Commands::Serve {
            keys,
            secret_key_file,
        } => run_serve(keys, secret_key_file).await,
        crate::Commands::Remote(cmd) => {
            let (client, config) = helpers::connect(&config_file, overrides).await?;
            run_remote(&client, &config, cmd).await
        }
    }
}

async fn run_remote(client: &Client, config: &ClientConfig, cmd: RemoteCommand) -> Result<()> {
    match cmd {
        RemoteCommand::Upload { file, path } => files::run_upload(client, &file, &path).await,
        RemoteCommand::Download { path, out } => files::run_download(client, &path, &out).await,
        RemoteCommand::SaveText { path, text } => {
            files::print_metadata(&client.save_text_file(&path, &text).await?);
            Ok(())
        }
        RemoteCommand::Meta { path } => {
            files::print_metadata(&client.get_metadata(&path).await?);
            Ok(())
        }
        RemoteCommand::Ls { path } => files::run_ls(client, &path).await,
        RemoteCommand::Rm { path } => {
            if !client.delete_file(&path).await? {
                println!("{path}: not found");
            }
            Ok(())
        }
        RemoteCommand::Tag { cmd } => run_tag(client, cmd).await,
        RemoteCommand::Viewer { cmd } => run_viewer(client, cmd).await,
        RemoteCommand::Watch { window } => {
            run_watch(client, window.unwrap_or(config.reinstate_window)).await
        }
    }
}
