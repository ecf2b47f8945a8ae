//! iroh-based file service protocol for iobio.
//!
//! - [`RpcProto`]: the irpc request set, served under [`ALPN`].
//! - [`Client`]: typed client; every request carries the auth key.
//! - [`RemoteDeltaSource`]: the reinstate feed as an
//!   [`iobio_sync::DeltaSource`], so a [`iobio_sync::Session`] can mirror
//!   the remote tree.
//! - [`MemoryServer`] (feature `server`): in-memory reference server that
//!   serves the protocol over iroh or in-process.

pub mod rpc;
pub use crate::rpc::{
    ALPN, DirEntry, EntryKind, FileKind, FileMetadata, ReinstateFrame, RpcProto, UploadChunk,
};

mod client;
pub use client::{Client, ClientBuilder, ClientError, DownloadStream, UPLOAD_CHUNK_SIZE};

mod config;
pub use config::ClientConfig;

mod reinstate;
pub use reinstate::{RemoteDeltaSource, RemoteFeed};

#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
pub use server::MemoryServer;
