//! In-memory reference server for the iobio file protocol.
//!
//! Files live in a map keyed by their normalized path. Next to it the
//! server keeps the tree that reinstate subscribers mirror:
//!
//! ```text
//! { "docs": { "a.txt": { kind, size, hash, tags, viewers, modified } } }
//! ```
//!
//! Every mutation is expressed as a [`Delta`], applied to that tree and
//! forwarded to all subscribers.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::{Bytes, BytesMut};
use iobio_core::{Delta, Tree, Value, split_path};
use iroh::{
    endpoint::Connection,
    protocol::{AcceptError, ProtocolHandler},
};
use irpc::channel::mpsc;
use irpc_iroh::read_request;
use tracing::{debug, info, warn};

use crate::Client;
use crate::rpc::{
    AddTag, AddViewer, DeleteFile, DirEntry, DownloadFile, EntryKind, FileKind, FileMetadata,
    GetMetadata, GetReinstate, ListDirectory, ReinstateFrame, RemoveTag, RemoveViewer, RpcMessage,
    RpcProto, SaveTextFile, UploadChunk, UploadFile,
};

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;
const LOCAL_QUEUE_CAPACITY: usize = 32;
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;
/// Deltas buffered for a reinstate subscriber that has no credits left.
/// A subscriber whose backlog grows past this is disconnected.
const MAX_PENDING_DELTAS: usize = 1024;

#[derive(Debug, Clone)]
struct FileRecord {
    kind: FileKind,
    data: Bytes,
    hash: [u8; 32],
    tags: Vec<String>,
    viewers: Vec<String>,
    modified: u64,
}

impl FileRecord {
    fn metadata(&self, path: &str) -> FileMetadata {
        FileMetadata {
            path: path.to_owned(),
            kind: self.kind,
            size: self.data.len() as u64,
            hash: self.hash,
            tags: self.tags.clone(),
            viewers: self.viewers.clone(),
            modified: self.modified,
        }
    }

    fn tree_entry(&self) -> Value {
        Value::map([
            ("kind", Value::from(self.kind.as_str())),
            ("size", Value::from(self.data.len() as u64)),
            ("hash", Value::from(hex::encode(self.hash))),
            ("tags", string_array(&self.tags)),
            ("viewers", string_array(&self.viewers)),
            ("modified", Value::from(self.modified)),
        ])
    }
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().map(|item| Value::from(item.as_str())).collect())
}

#[derive(Debug, Clone, Copy)]
enum ListField {
    Tags,
    Viewers,
}

impl ListField {
    fn key(self) -> &'static str {
        match self {
            ListField::Tags => "tags",
            ListField::Viewers => "viewers",
        }
    }

    fn of(self, record: &mut FileRecord) -> &mut Vec<String> {
        match self {
            ListField::Tags => &mut record.tags,
            ListField::Viewers => &mut record.viewers,
        }
    }
}

struct State {
    files: BTreeMap<String, FileRecord>,
    tree: Tree,
    subscribers: Vec<tokio::sync::mpsc::UnboundedSender<Delta>>,
}

impl State {
    /// Applies `delta` to the served tree and forwards it to every live
    /// subscriber.
    fn publish(&mut self, delta: Delta) {
        if let Err(err) = self.tree.apply(delta.clone()) {
            warn!("server tree rejected its own delta: {err}");
            return;
        }
        self.subscribers
            .retain(|subscriber| subscriber.send(delta.clone()).is_ok());
    }

    fn has_files_under(&self, prefix: &str) -> bool {
        let prefix = format!("{prefix}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(path, _)| path.starts_with(&prefix))
    }
}

struct Inner {
    keys: BTreeSet<String>,
    state: Mutex<State>,
}

/// Serves [`RpcProto`] from memory, over iroh (as a [`ProtocolHandler`]) or
/// in-process through [`MemoryServer::local_client`].
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<Inner>,
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryServer")
            .field("keys", &self.inner.keys.len())
            .finish_non_exhaustive()
    }
}

/// Normalizes a client path to its segments and the `a/b` map key.
fn parse_file_path(path: &str) -> Result<(Vec<String>, String), String> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err("path must name a file".to_owned());
    }
    if segments.iter().any(|segment| segment == "." || segment == "..") {
        return Err(format!("invalid path '{path}'"));
    }
    let key = segments.join("/");
    Ok((segments, key))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

impl MemoryServer {
    /// Creates an empty server accepting the given auth keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Inner {
                keys: keys.into_iter().map(Into::into).collect(),
                state: Mutex::new(State {
                    files: BTreeMap::new(),
                    tree: Tree::new(),
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    /// A client connected to this server through an in-process channel.
    pub fn local_client(&self, auth_key: impl Into<String>) -> Client {
        let (tx, mut rx) = tokio::sync::mpsc::channel(LOCAL_QUEUE_CAPACITY);
        let server = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                server.handle(msg).await;
            }
        });
        Client::local(tx, auth_key)
    }

    /// The tree reinstate subscribers currently mirror.
    pub fn tree_snapshot(&self) -> Value {
        self.state().tree.snapshot()
    }

    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    /// Number of reinstate subscribers still attached. Subscribers that went
    /// away are only noticed on the next mutation.
    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, key: &str) -> Result<(), String> {
        if self.inner.keys.contains(key) {
            Ok(())
        } else {
            Err("unauthorized: unknown auth key".to_owned())
        }
    }

    /// Dispatches one request. Streaming requests are served on their own
    /// task so the connection keeps accepting requests.
    pub async fn handle(&self, msg: RpcMessage) {
        match msg {
            RpcMessage::UploadFile(irpc::WithChannels { inner, tx, rx, .. }) => {
                let server = self.clone();
                tokio::spawn(async move {
                    let result = server.handle_upload(inner, rx).await;
                    let _ = tx.send(result).await;
                });
            }
            RpcMessage::DownloadFile(irpc::WithChannels { inner, tx, .. }) => {
                let server = self.clone();
                tokio::spawn(async move { server.handle_download(inner, tx).await });
            }
            RpcMessage::SaveTextFile(irpc::WithChannels { inner, tx, .. }) => {
                let _ = tx.send(self.handle_save_text(inner)).await;
            }
            RpcMessage::GetMetadata(irpc::WithChannels { inner, tx, .. }) => {
                let _ = tx.send(self.handle_get_metadata(inner)).await;
            }
            RpcMessage::ListDirectory(irpc::WithChannels { inner, tx, .. }) => {
                let _ = tx.send(self.handle_list_directory(inner)).await;
            }
            RpcMessage::DeleteFile(irpc::WithChannels { inner, tx, .. }) => {
                let _ = tx.send(self.handle_delete(inner)).await;
            }
            RpcMessage::AddTag(irpc::WithChannels { inner, tx, .. }) => {
                let AddTag { key, path, tag } = inner;
                let _ = tx
                    .send(self.add_to_list(&key, &path, ListField::Tags, tag))
                    .await;
            }
            RpcMessage::RemoveTag(irpc::WithChannels { inner, tx, .. }) => {
                let RemoveTag { key, path, tag } = inner;
                let _ = tx
                    .send(self.remove_from_list(&key, &path, ListField::Tags, &tag))
                    .await;
            }
            RpcMessage::AddViewer(irpc::WithChannels { inner, tx, .. }) => {
                let AddViewer {
                    key,
                    path,
                    viewer_id,
                } = inner;
                let _ = tx
                    .send(self.add_to_list(&key, &path, ListField::Viewers, viewer_id))
                    .await;
            }
            RpcMessage::RemoveViewer(irpc::WithChannels { inner, tx, .. }) => {
                let RemoveViewer {
                    key,
                    path,
                    viewer_id,
                } = inner;
                let _ = tx
                    .send(self.remove_from_list(&key, &path, ListField::Viewers, &viewer_id))
                    .await;
            }
            RpcMessage::GetReinstate(irpc::WithChannels { inner, tx, rx, .. }) => {
                let server = self.clone();
                tokio::spawn(async move { server.serve_reinstate(inner, tx, rx).await });
            }
        }
    }

    async fn handle_upload(
        &self,
        req: UploadFile,
        mut rx: mpsc::Receiver<UploadChunk>,
    ) -> Result<FileMetadata, String> {
        self.authorize(&req.key)?;
        let (segments, path) = parse_file_path(&req.path)?;

        let capacity = req.size.unwrap_or(0).min(MAX_PREALLOCATION) as usize;
        let mut data = BytesMut::with_capacity(capacity);
        loop {
            match rx.recv().await {
                Ok(Some(UploadChunk::Data(chunk))) => data.extend_from_slice(&chunk),
                Ok(Some(UploadChunk::Finish)) => break,
                Ok(Some(UploadChunk::Abort(reason))) => {
                    debug!("client aborted upload of {path}: {reason}");
                    return Err(format!("upload of {path} aborted: {reason}"));
                }
                Ok(None) => {
                    debug!("upload of {path} ended without finishing, discarding");
                    return Err(format!("upload of {path} ended before it was finished"));
                }
                Err(err) => return Err(format!("upload of {path} aborted: {err}")),
            }
        }
        if let Some(expected) = req.size
            && expected != data.len() as u64
        {
            return Err(format!(
                "upload of {path} incomplete: expected {expected} bytes, got {}",
                data.len()
            ));
        }

        self.put(segments, path, FileKind::File, data.freeze())
    }

    async fn handle_download(
        &self,
        req: DownloadFile,
        tx: mpsc::Sender<Result<Bytes, String>>,
    ) {
        let data = self.authorize(&req.key).and_then(|()| {
            let (_, path) = parse_file_path(&req.path)?;
            self.state()
                .files
                .get(&path)
                .map(|record| record.data.clone())
                .ok_or_else(|| format!("no such file: {path}"))
        });

        match data {
            Ok(data) => {
                let mut offset = 0;
                while offset < data.len() {
                    let end = (offset + DOWNLOAD_CHUNK_SIZE).min(data.len());
                    if tx.send(Ok(data.slice(offset..end))).await.is_err() {
                        debug!("download receiver went away");
                        return;
                    }
                    offset = end;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
            }
        }
    }

    fn handle_save_text(&self, req: SaveTextFile) -> Result<FileMetadata, String> {
        self.authorize(&req.key)?;
        let (segments, path) = parse_file_path(&req.path)?;
        self.put(segments, path, FileKind::Text, Bytes::from(req.text))
    }

    fn handle_get_metadata(&self, req: GetMetadata) -> Result<FileMetadata, String> {
        self.authorize(&req.key)?;
        let (_, path) = parse_file_path(&req.path)?;
        self.state()
            .files
            .get(&path)
            .map(|record| record.metadata(&path))
            .ok_or_else(|| format!("no such file: {path}"))
    }

    fn handle_list_directory(&self, req: ListDirectory) -> Result<Vec<DirEntry>, String> {
        self.authorize(&req.key)?;
        let dir = split_path(&req.path).join("/");
        let state = self.state();
        if state.files.contains_key(&dir) {
            return Err(format!("not a directory: {dir}"));
        }

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
        for path in state.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((name, _)) => entries.insert(name.to_owned(), EntryKind::Directory),
                None => entries.insert(rest.to_owned(), EntryKind::File),
            };
        }
        if entries.is_empty() && !dir.is_empty() {
            return Err(format!("no such directory: {dir}"));
        }

        Ok(entries
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    fn handle_delete(&self, req: DeleteFile) -> Result<bool, String> {
        self.authorize(&req.key)?;
        let (segments, path) = parse_file_path(&req.path)?;
        let mut state = self.state();
        if state.files.remove(&path).is_none() {
            return Ok(false);
        }
        state.publish(Delta::delete(segments.clone()));

        // Drop directories that became empty, deepest first.
        for depth in (1..segments.len()).rev() {
            let dir = &segments[..depth];
            if state.has_files_under(&dir.join("/")) {
                break;
            }
            state.publish(Delta::delete(dir.to_vec()));
        }
        debug!("deleted {path}");
        Ok(true)
    }

    fn put(
        &self,
        segments: Vec<String>,
        path: String,
        kind: FileKind,
        data: Bytes,
    ) -> Result<FileMetadata, String> {
        let mut state = self.state();
        for depth in 1..segments.len() {
            let ancestor = segments[..depth].join("/");
            if state.files.contains_key(&ancestor) {
                return Err(format!("{ancestor} is a file, not a directory"));
            }
        }
        if state.has_files_under(&path) {
            return Err(format!("{path} is a directory"));
        }

        let (tags, viewers) = state
            .files
            .get(&path)
            .map(|old| (old.tags.clone(), old.viewers.clone()))
            .unwrap_or_default();
        let record = FileRecord {
            kind,
            hash: *blake3::hash(&data).as_bytes(),
            data,
            tags,
            viewers,
            modified: now_millis(),
        };
        let metadata = record.metadata(&path);
        state.publish(Delta::add(segments, record.tree_entry()));
        state.files.insert(path, record);
        info!(path = %metadata.path, size = metadata.size, "stored file");
        Ok(metadata)
    }

    fn add_to_list(
        &self,
        key: &str,
        path: &str,
        field: ListField,
        item: String,
    ) -> Result<(), String> {
        self.authorize(key)?;
        let (mut segments, path) = parse_file_path(path)?;
        let mut state = self.state();
        let record = state
            .files
            .get_mut(&path)
            .ok_or_else(|| format!("no such file: {path}"))?;
        let items = field.of(record);
        if items.contains(&item) {
            return Ok(());
        }
        items.push(item.clone());
        segments.push(field.key().to_owned());
        state.publish(Delta::append(segments, item));
        Ok(())
    }

    fn remove_from_list(
        &self,
        key: &str,
        path: &str,
        field: ListField,
        item: &str,
    ) -> Result<(), String> {
        self.authorize(key)?;
        let (mut segments, path) = parse_file_path(path)?;
        let mut state = self.state();
        let record = state
            .files
            .get_mut(&path)
            .ok_or_else(|| format!("no such file: {path}"))?;
        let items = field.of(record);
        let before = items.len();
        items.retain(|existing| existing != item);
        if items.len() == before {
            return Ok(());
        }
        let remaining = string_array(items);
        segments.push(field.key().to_owned());
        state.publish(Delta::update(segments, remaining));
        Ok(())
    }

    async fn serve_reinstate(
        &self,
        req: GetReinstate,
        tx: mpsc::Sender<ReinstateFrame>,
        mut credits: mpsc::Receiver<u32>,
    ) {
        if self.authorize(&req.key).is_err() {
            debug!("rejecting reinstate subscription with unknown key");
            let _ = tx.send(ReinstateFrame::Opened { success: false }).await;
            return;
        }

        // Snapshot and registration happen under one lock, so no mutation
        // falls between the initial tree and the live deltas.
        let (deltas_tx, mut deltas) = tokio::sync::mpsc::unbounded_channel();
        let snapshot = {
            let mut state = self.state();
            state.subscribers.push(deltas_tx);
            state.tree.snapshot()
        };
        if tx.send(ReinstateFrame::Opened { success: true }).await.is_err() {
            return;
        }
        debug!("reinstate subscriber attached");

        // Credits are read on a separate task; the select below only polls
        // tokio channels.
        let (grants_tx, mut grants) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(Some(n)) = credits.recv().await {
                if grants_tx.send(n).is_err() {
                    break;
                }
            }
        });

        let mut pending = VecDeque::from([Delta::replace_root(snapshot)]);
        let mut available: u64 = 0;
        loop {
            while available > 0 {
                let Some(delta) = pending.pop_front() else {
                    break;
                };
                if tx.send(ReinstateFrame::Delta(delta)).await.is_err() {
                    debug!("reinstate subscriber went away");
                    return;
                }
                available -= 1;
            }

            tokio::select! {
                grant = grants.recv() => match grant {
                    Some(n) => available += u64::from(n),
                    None => break,
                },
                delta = deltas.recv() => match delta {
                    Some(_) if pending.len() >= MAX_PENDING_DELTAS => {
                        warn!("reinstate subscriber stopped granting credits, dropping it");
                        return;
                    }
                    Some(delta) => pending.push_back(delta),
                    None => break,
                },
            }
        }
        debug!("reinstate subscriber detached");
    }
}

impl ProtocolHandler for MemoryServer {
    async fn accept(&self, conn: Connection) -> Result<(), AcceptError> {
        while let Some(msg) = read_request::<RpcProto>(&conn).await? {
            self.handle(msg).await;
        }
        conn.closed().await;
        Ok(())
    }
}
