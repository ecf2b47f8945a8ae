use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use iobio_sync::{Session, SyncError};
use iroh::{Endpoint, EndpointAddr, EndpointId, SecretKey};
use irpc::Client as IrpcClient;
use irpc::channel::{mpsc, oneshot};
use irpc_iroh::IrohRemoteConnection;
use thiserror::Error;
use tracing::debug;

use crate::reinstate::RemoteDeltaSource;
use crate::rpc::{
    AddTag, AddViewer, DeleteFile, DirEntry, DownloadFile, FileMetadata, GetMetadata,
    ListDirectory, RemoveTag, RemoveViewer, RpcProto, SaveTextFile, UploadChunk, UploadFile,
};

/// Chunk size used by [`Client::upload_bytes`].
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
const UPLOAD_CHANNEL_CAPACITY: usize = 8;
const DOWNLOAD_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("rpc failed: {0}")]
    Rpc(#[from] irpc::Error),
    #[error("stream failed: {0}")]
    Channel(String),
    /// The server answered the request with an error.
    #[error("remote error: {0}")]
    Remote(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("invalid remote node id '{id}': {reason}")]
    InvalidRemote { id: String, reason: String },
    #[error("failed to bind endpoint: {0}")]
    Bind(String),
    #[error("no remote node configured")]
    MissingRemote,
}

fn remote<T>(result: Result<T, String>) -> Result<T, ClientError> {
    result.map_err(ClientError::Remote)
}

type UploadReply = oneshot::Receiver<Result<FileMetadata, String>>;

/// File content as returned by [`Client::download_stream`].
pub type DownloadStream =
    std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send + 'static>>;

async fn send_chunk(tx: &mpsc::Sender<UploadChunk>, chunk: UploadChunk) -> Result<(), ClientError> {
    tx.send(chunk)
        .await
        .map_err(|err| ClientError::Channel(format!("failed to send upload chunk: {err}")))
}

async fn finish_upload(
    tx: mpsc::Sender<UploadChunk>,
    rx: UploadReply,
) -> Result<FileMetadata, ClientError> {
    send_chunk(&tx, UploadChunk::Finish).await?;
    drop(tx);
    remote(rx.await.map_err(|err| ClientError::Channel(err.to_string()))?)
}

/// Typed client for the iobio file service.
///
/// Every request is sent with the auth key currently set on the client.
#[derive(Clone)]
pub struct Client {
    inner: IrpcClient<RpcProto>,
    auth_key: String,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    pub const ALPN: &'static [u8] = crate::rpc::ALPN;

    pub fn connect(
        endpoint: Endpoint,
        addr: impl Into<EndpointAddr>,
        auth_key: impl Into<String>,
    ) -> Self {
        let conn = IrohRemoteConnection::new(endpoint, addr.into(), Self::ALPN.to_vec());
        Client {
            inner: IrpcClient::boxed(conn),
            auth_key: auth_key.into(),
        }
    }

    /// A client talking to an in-process server through a channel.
    #[cfg(feature = "server")]
    pub fn local(
        sender: tokio::sync::mpsc::Sender<crate::rpc::RpcMessage>,
        auth_key: impl Into<String>,
    ) -> Self {
        Client {
            inner: IrpcClient::local(sender),
            auth_key: auth_key.into(),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn set_auth_key(&mut self, auth_key: impl Into<String>) {
        self.auth_key = auth_key.into();
    }

    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    /// Streams `chunks` to the server as the content of `path`.
    ///
    /// The file is only stored once every chunk was sent. If `chunks`
    /// yields an error the upload is aborted and nothing is stored.
    pub async fn upload_file<S>(
        &self,
        path: &str,
        mut chunks: S,
    ) -> Result<FileMetadata, ClientError>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
    {
        let (tx, rx) = self.start_upload(path, None).await?;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => send_chunk(&tx, UploadChunk::Data(chunk)).await?,
                Err(err) => {
                    debug!("aborting upload of {path}: {err}");
                    let _ = tx.send(UploadChunk::Abort(err.to_string())).await;
                    return Err(ClientError::Channel(err.to_string()));
                }
            }
        }
        finish_upload(tx, rx).await
    }

    /// Uploads an in-memory buffer in [`UPLOAD_CHUNK_SIZE`] chunks.
    pub async fn upload_bytes(&self, path: &str, data: Bytes) -> Result<FileMetadata, ClientError> {
        let (tx, rx) = self.start_upload(path, Some(data.len() as u64)).await?;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(data.len());
            send_chunk(&tx, UploadChunk::Data(data.slice(offset..end))).await?;
            offset = end;
        }
        finish_upload(tx, rx).await
    }

    async fn start_upload(
        &self,
        path: &str,
        size: Option<u64>,
    ) -> Result<(mpsc::Sender<UploadChunk>, UploadReply), ClientError> {
        let channels = self
            .inner
            .client_streaming(
                UploadFile {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                    size,
                },
                UPLOAD_CHANNEL_CAPACITY,
            )
            .await?;
        Ok(channels)
    }

    pub async fn download_stream(&self, path: &str) -> Result<DownloadStream, ClientError> {
        let receiver = self
            .inner
            .server_streaming(
                DownloadFile {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                },
                DOWNLOAD_CHANNEL_CAPACITY,
            )
            .await?;
        let stream = futures::stream::unfold(Some(receiver), |rx| async move {
            let mut rx: mpsc::Receiver<Result<Bytes, String>> = rx?;
            match rx.recv().await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(rx))),
                Ok(Some(Err(err))) => Some((Err(ClientError::Remote(err)), None)),
                Ok(None) => None,
                Err(err) => Some((Err(ClientError::Channel(err.to_string())), None)),
            }
        });
        Ok(Box::pin(stream))
    }

    pub async fn download_file(&self, path: &str) -> Result<Bytes, ClientError> {
        let mut stream = self.download_stream(path).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    pub async fn save_text_file(
        &self,
        path: &str,
        text: &str,
    ) -> Result<FileMetadata, ClientError> {
        remote(
            self.inner
                .rpc(SaveTextFile {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                    text: text.to_owned(),
                })
                .await?,
        )
    }

    pub async fn get_metadata(&self, path: &str) -> Result<FileMetadata, ClientError> {
        remote(
            self.inner
                .rpc(GetMetadata {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                })
                .await?,
        )
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, ClientError> {
        remote(
            self.inner
                .rpc(ListDirectory {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                })
                .await?,
        )
    }

    /// Returns `true` if the file existed.
    pub async fn delete_file(&self, path: &str) -> Result<bool, ClientError> {
        remote(
            self.inner
                .rpc(DeleteFile {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                })
                .await?,
        )
    }

    pub async fn add_tag(&self, path: &str, tag: &str) -> Result<(), ClientError> {
        remote(
            self.inner
                .rpc(AddTag {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                    tag: tag.to_owned(),
                })
                .await?,
        )
    }

    pub async fn remove_tag(&self, path: &str, tag: &str) -> Result<(), ClientError> {
        remote(
            self.inner
                .rpc(RemoveTag {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                    tag: tag.to_owned(),
                })
                .await?,
        )
    }

    /// Grants `viewer_id` read access to `path`.
    pub async fn add_viewer(&self, path: &str, viewer_id: &str) -> Result<(), ClientError> {
        remote(
            self.inner
                .rpc(AddViewer {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                    viewer_id: viewer_id.to_owned(),
                })
                .await?,
        )
    }

    pub async fn remove_viewer(&self, path: &str, viewer_id: &str) -> Result<(), ClientError> {
        remote(
            self.inner
                .rpc(RemoveViewer {
                    key: self.auth_key.clone(),
                    path: path.to_owned(),
                    viewer_id: viewer_id.to_owned(),
                })
                .await?,
        )
    }

    /// The reinstate feed of this client, as a source for [`Session`].
    pub fn reinstate(&self) -> RemoteDeltaSource {
        RemoteDeltaSource::new(self.clone())
    }

    /// Opens the reinstate feed and starts mirroring the remote tree with
    /// `window` flow-control credits.
    pub async fn start_reinstate(&self, window: u32) -> Result<Session, ClientError> {
        Ok(Session::start(&self.reinstate(), window).await?)
    }

    pub(crate) fn irpc(&self) -> &IrpcClient<RpcProto> {
        &self.inner
    }
}

/// Builds a [`Client`] connected to a remote node over a fresh endpoint.
#[derive(Debug, Default)]
pub struct ClientBuilder {
    remote: Option<String>,
    auth_key: String,
    secret_key: Option<SecretKey>,
}

impl ClientBuilder {
    /// Endpoint id of the remote node, as printed by `iobio serve`.
    pub fn remote(mut self, node_id: impl Into<String>) -> Self {
        self.remote = Some(node_id.into());
        self
    }

    pub fn auth_key(mut self, auth_key: impl Into<String>) -> Self {
        self.auth_key = auth_key.into();
        self
    }

    /// Identity of the local endpoint. A random one is used if unset.
    pub fn secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub async fn build(self) -> Result<Client, ClientError> {
        let id = self.remote.ok_or(ClientError::MissingRemote)?;
        let remote_id = EndpointId::from_str(id.trim()).map_err(|err| ClientError::InvalidRemote {
            id: id.clone(),
            reason: err.to_string(),
        })?;

        let mut builder = Endpoint::builder();
        if let Some(secret_key) = self.secret_key {
            builder = builder.secret_key(secret_key);
        }
        let endpoint = builder
            .bind()
            .await
            .map_err(|err| ClientError::Bind(err.to_string()))?;
        debug!("connecting to {}", remote_id.fmt_short());

        Ok(Client::connect(
            endpoint,
            EndpointAddr::from(remote_id),
            self.auth_key,
        ))
    }
}
