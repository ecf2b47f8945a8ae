use std::path::PathBuf;

use anyhow::Result;
use iobio_rpc::{ALPN, MemoryServer};
use iroh::{Endpoint, protocol::Router};
use tracing::info;

use crate::helpers::load_secret_key;

pub async fn run_serve(keys: Vec<String>, secret_key_file: Option<PathBuf>) -> Result<()> {
    let mut builder = Endpoint::builder();
    if let Some(path) = secret_key_file {
        builder = builder.secret_key(load_secret_key(&path)?);
    }
    let endpoint = builder.bind().await?;
    println!("node id: {}", endpoint.id());

    let server = MemoryServer::new(keys);
    let router = Router::builder(endpoint)
        .accept(ALPN, server.clone())
        .spawn();
    info!("serving iobio files over {}", String::from_utf8_lossy(ALPN));

    tokio::signal::ctrl_c().await?;
    println!("Shutting down.");
    info!("{} files held at shutdown", server.file_count());
    router.shutdown().await?;
    Ok(())
}
