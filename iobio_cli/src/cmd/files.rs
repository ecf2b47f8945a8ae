use std::path::Path;

use anyhow::{Context, Result};
use iobio_rpc::{Client, EntryKind, FileMetadata};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{TagCmd, ViewerCmd};

pub async fn run_upload(client: &Client, file: &Path, path: &str) -> Result<()> {
    let local = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    info!("uploading {} to {path}", file.display());
    let meta = client.upload_file(path, ReaderStream::new(local)).await?;
    print_metadata(&meta);
    Ok(())
}

pub async fn run_download(client: &Client, path: &str, out: &Path) -> Result<()> {
    let data = client.download_file(path).await?;
    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("wrote {} bytes to {}", data.len(), out.display());
    Ok(())
}

pub async fn run_ls(client: &Client, path: &str) -> Result<()> {
    for entry in client.list_directory(path).await? {
        match entry.kind {
            EntryKind::Directory => println!("{}/", entry.name),
            EntryKind::File => println!("{}", entry.name),
        }
    }
    Ok(())
}

pub async fn run_tag(client: &Client, cmd: TagCmd) -> Result<()> {
    match cmd {
        TagCmd::Add { path, tag } => client.add_tag(&path, &tag).await?,
        TagCmd::Rm { path, tag } => client.remove_tag(&path, &tag).await?,
    }
    Ok(())
}

pub async fn run_viewer(client: &Client, cmd: ViewerCmd) -> Result<()> {
    match cmd {
        ViewerCmd::Add { path, viewer_id } => client.add_viewer(&path, &viewer_id).await?,
        ViewerCmd::Rm { path, viewer_id } => client.remove_viewer(&path, &viewer_id).await?,
    }
    Ok(())
}

pub fn print_metadata(meta: &FileMetadata) {
    println!("path:     {}", meta.path);
    println!("kind:     {}", meta.kind.as_str());
    println!("size:     {}", meta.size);
    println!("hash:     {}", meta.hash_hex());
    println!("tags:     {}", meta.tags.join(", "));
    println!("viewers:  {}", meta.viewers.join(", "));
    println!("modified: {}", meta.modified);
}
