use bytes::Bytes;
use iobio_core::Delta;
use irpc::channel::{mpsc, oneshot};
use irpc::rpc_requests;
use serde::{Deserialize, Serialize};

/// The ALPN string for this protocol
pub const ALPN: &[u8] = b"iobio/fs/0";

/// Every request carries the client's auth key in `key`; the server answers
/// with `Err(String)` when it does not accept it.
#[derive(Debug, Serialize, Deserialize)]
#[rpc_requests(message = RpcMessage)]
pub enum RpcProto {
    // Client streams file bytes; the server stores them only after
    // `UploadChunk::Finish` and replies once the stream ends.
    #[rpc(tx = oneshot::Sender<Result<FileMetadata, String>>, rx = mpsc::Receiver<UploadChunk>)]
    UploadFile(UploadFile),
    // Server streams the file content. An `Err` item ends the stream.
    #[rpc(tx = mpsc::Sender<Result<Bytes, String>>)]
    DownloadFile(DownloadFile),
    #[rpc(tx = oneshot::Sender<Result<FileMetadata, String>>)]
    SaveTextFile(SaveTextFile),
    #[rpc(tx = oneshot::Sender<Result<FileMetadata, String>>)]
    GetMetadata(GetMetadata),
    #[rpc(tx = oneshot::Sender<Result<Vec<DirEntry>, String>>)]
    ListDirectory(ListDirectory),
    /// `Ok(true)` if the file existed and was removed.
    #[rpc(tx = oneshot::Sender<Result<bool, String>>)]
    DeleteFile(DeleteFile),
    #[rpc(tx = oneshot::Sender<Result<(), String>>)]
    AddTag(AddTag),
    #[rpc(tx = oneshot::Sender<Result<(), String>>)]
    RemoveTag(RemoveTag),
    #[rpc(tx = oneshot::Sender<Result<(), String>>)]
    AddViewer(AddViewer),
    #[rpc(tx = oneshot::Sender<Result<(), String>>)]
    RemoveViewer(RemoveViewer),
    /// Live tree feed. The server first sends [`ReinstateFrame::Opened`],
    /// then one [`ReinstateFrame::Delta`] per credit received on `rx`.
    #[rpc(tx = mpsc::Sender<ReinstateFrame>, rx = mpsc::Receiver<u32>)]
    GetReinstate(GetReinstate),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadFile {
    pub key: String,
    pub path: String,
    /// Total size announced by the client, checked once the stream ends.
    pub size: Option<u64>,
}

/// One frame of an upload stream.
///
/// A stream that ends without `Finish` is discarded, so a client that fails
/// halfway never leaves a truncated file behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadChunk {
    Data(Bytes),
    /// All data was sent; commit the file.
    Finish,
    /// The client gave up; the reason ends up in the server log.
    Abort(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadFile {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveTextFile {
    pub key: String,
    pub path: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMetadata {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListDirectory {
    pub key: String,
    /// Directory path; empty or `/` lists the root.
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteFile {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddTag {
    pub key: String,
    pub path: String,
    pub tag: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveTag {
    pub key: String,
    pub path: String,
    pub tag: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddViewer {
    pub key: String,
    pub path: String,
    pub viewer_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveViewer {
    pub key: String,
    pub path: String,
    pub viewer_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetReinstate {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReinstateFrame {
    /// Subscription acknowledgement, always the first frame.
    Opened { success: bool },
    Delta(Delta),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Uploaded as a byte stream.
    File,
    /// Saved through `SaveTextFile`.
    Text,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
    /// BLAKE3 hash of the content.
    pub hash: [u8; 32],
    pub tags: Vec<String>,
    pub viewers: Vec<String>,
    /// Unix time of the last content change, in milliseconds.
    pub modified: u64,
}

impl FileMetadata {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}
