use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use std::path::PathBuf;

mod cmd;
mod helpers;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// client config file to use instead of the default location
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// endpoint id of the remote node (overrides the config file)
    #[arg(long, value_name = "NODE_ID", global = true)]
    remote: Option<String>,

    /// auth key sent with every request (overrides the config file)
    #[arg(long, value_name = "KEY", global = true)]
    auth_key: Option<String>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the client config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Serve an in-memory iobio node until Ctrl-C
    Serve {
        /// Auth key accepted by the server (repeatable)
        #[arg(long = "key", value_name = "KEY", required = true)]
        keys: Vec<String>,
        /// Secret key file for a stable node id
        #[arg(long, value_name = "PATH")]
        secret_key_file: Option<PathBuf>,
    },
    #[command(flatten)]
    Remote(RemoteCommand),
}

/// Commands that talk to a remote node.
#[derive(Subcommand)]
enum RemoteCommand {
    /// Upload a local file
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Destination path on the remote node
        path: String,
    },
    /// Download a remote file into a local file
    Download {
        /// Remote file path
        path: String,
        /// Output file path
        #[arg(long)]
        out: PathBuf,
    },
    /// Store a text file
    SaveText {
        /// Remote file path
        path: String,
        /// File content
        text: String,
    },
    /// Print the metadata of a remote file
    Meta { path: String },
    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Delete a remote file
    Rm { path: String },
    /// Add or remove file tags
    Tag {
        #[command(subcommand)]
        cmd: TagCmd,
    },
    /// Grant or revoke read access for a viewer
    Viewer {
        #[command(subcommand)]
        cmd: ViewerCmd,
    },
    /// Mirror the remote tree and print it after every change
    Watch {
        /// Flow-control window (defaults to the config value)
        #[arg(long, value_name = "CREDITS")]
        window: Option<u32>,
    },
}

#[derive(Subcommand)]
enum TagCmd {
    Add { path: String, tag: String },
    Rm { path: String, tag: String },
}

#[derive(Subcommand)]
enum ViewerCmd {
    Add { path: String, viewer_id: String },
    Rm { path: String, viewer_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Default config location: ~/.config/iobio/client.toml
    let config_file = match cli.config {
        Some(path) => path,
        None => ProjectDirs::from("", "", "iobio")
            .context("failed to determine config directory path")?
            .config_dir()
            .join("client.toml"),
    };

    let overrides = helpers::Overrides {
        remote: cli.remote,
        auth_key: cli.auth_key,
    };
    cmd::run_command(config_file, overrides, cli.cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().cmd
    }

    #[test]
    fn remote_commands_parse_next_to_local_ones() {
        assert!(matches!(
            parse(&["iobio", "ls"]),
            Commands::Remote(RemoteCommand::Ls { path }) if path == "/"
        ));
        assert!(matches!(
            parse(&["iobio", "--remote", "abc", "watch", "--window", "3"]),
            Commands::Remote(RemoteCommand::Watch { window: Some(3) })
        ));
        assert!(matches!(
            parse(&["iobio", "tag", "add", "a.txt", "red"]),
            Commands::Remote(RemoteCommand::Tag { cmd: TagCmd::Add { .. } })
        ));
        assert!(matches!(
            parse(&["iobio", "config", "init"]),
            Commands::Config { cmd: CmdConfig::Init { remote: None, auth_key: None } }
        ));
        assert!(matches!(
            parse(&["iobio", "serve", "--key", "k1", "--key", "k2"]),
            Commands::Serve { keys, secret_key_file: None } if keys == ["k1", "k2"]
        ));
    }

    #[test]
    fn serve_needs_a_key() {
        assert!(Cli::try_parse_from(["iobio", "serve"]).is_err());
    }
}
