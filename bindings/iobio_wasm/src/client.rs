//! iobio client for browser WASM.
//!
//! All operations go to a remote iobio node over iroh. The reinstate
//! session keeps a local mirror of the node's file tree and calls back into
//! JS after every applied delta.

use bytes::Bytes;
use iobio_rpc::{Client, FileMetadata};
use iobio_sync::{DEFAULT_WINDOW, Session, SessionEnd, SessionEvent};
use iroh::{Endpoint, EndpointAddr, RelayMode, SecretKey};
use js_sys::{Function, Reflect};
use tokio::sync::broadcast::error::RecvError;
use wasm_bindgen::prelude::*;

use crate::convert::value_to_js;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

macro_rules! console_log {
    ($($t:tt)*) => (log(&format_args!($($t)*).to_string()))
}

fn js_err(context: &str, err: impl std::fmt::Display) -> JsError {
    JsError::new(&format!("{context}: {err}"))
}

fn metadata_to_js(meta: &FileMetadata) -> Result<JsValue, JsError> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    let value = serde::Serialize::serialize(meta, &serializer)
        .map_err(|e| js_err("Failed to serialize metadata", e))?;
    Reflect::set(&value, &"hash".into(), &meta.hash_hex().into())
        .map_err(|_| JsError::new("Failed to set metadata hash"))?;
    Ok(value)
}

/// Browser client for a remote iobio node.
#[wasm_bindgen]
pub struct IobioClient {
    /// Remote node ID to connect to
    remote_node_id: String,
    auth_key: String,
    /// Set by `connect`
    client: Option<Client>,
}

#[wasm_bindgen]
impl IobioClient {
    #[wasm_bindgen(constructor)]
    pub fn new(remote_node_id: String, auth_key: String) -> IobioClient {
        console_log!("IobioClient will connect to remote node: {}", remote_node_id);
        IobioClient {
            remote_node_id,
            auth_key,
            client: None,
        }
    }

    /// Binds an iroh endpoint and prepares the connection to the remote node.
    ///
    /// In the browser connections go through relay servers, so this waits
    /// until the endpoint is online.
    #[wasm_bindgen]
    pub async fn connect(&mut self) -> Result<(), JsError> {
        let mut secret = [0u8; 32];
        getrandom::getrandom(&mut secret).map_err(|e| js_err("RNG failed", e))?;

        let endpoint = Endpoint::builder()
            .secret_key(SecretKey::from_bytes(&secret))
            .relay_mode(RelayMode::Default)
            .bind()
            .await
            .map_err(|e| js_err("Failed to bind endpoint", e))?;

        console_log!("Endpoint bound, waiting for relay connection...");
        endpoint.online().await;
        console_log!("Endpoint online. Our address: {}", endpoint.id().fmt_short());

        let remote_id: iroh::EndpointId = self
            .remote_node_id
            .trim()
            .parse()
            .map_err(|e| js_err("Invalid remote node ID", e))?;

        self.client = Some(Client::connect(
            endpoint,
            EndpointAddr::from(remote_id),
            self.auth_key.clone(),
        ));
        Ok(())
    }

    #[wasm_bindgen(getter)]
    pub fn connected(&self) -> bool {
        self.client.is_some()
    }

    /// Replaces the auth key used by this and all later requests.
    #[wasm_bindgen]
    pub fn set_auth_key(&mut self, auth_key: String) {
        if let Some(client) = self.client.as_mut() {
            client.set_auth_key(auth_key.clone());
        }
        self.auth_key = auth_key;
    }

    fn client(&self) -> Result<&Client, JsError> {
        self.client
            .as_ref()
            .ok_or_else(|| JsError::new("Not connected"))
    }

    /// Uploads `data` to `path`; resolves to the file metadata.
    #[wasm_bindgen]
    pub async fn upload_file(&self, path: String, data: Vec<u8>) -> Result<JsValue, JsError> {
        let meta = self
            .client()?
            .upload_bytes(&path, Bytes::from(data))
            .await
            .map_err(|e| js_err("Upload failed", e))?;
        metadata_to_js(&meta)
    }

    #[wasm_bindgen]
    pub async fn save_text_file(&self, path: String, text: String) -> Result<JsValue, JsError> {
        let meta = self
            .client()?
            .save_text_file(&path, &text)
            .await
            .map_err(|e| js_err("Saving text file failed", e))?;
        metadata_to_js(&meta)
    }

    #[wasm_bindgen]
    pub async fn download_file(&self, path: String) -> Result<Vec<u8>, JsError> {
        let data = self
            .client()?
            .download_file(&path)
            .await
            .map_err(|e| js_err("Download failed", e))?;
        Ok(data.to_vec())
    }

    #[wasm_bindgen]
    pub async fn get_metadata(&self, path: String) -> Result<JsValue, JsError> {
        let meta = self
            .client()?
            .get_metadata(&path)
            .await
            .map_err(|e| js_err("Failed to get metadata", e))?;
        metadata_to_js(&meta)
    }

    /// Lists a directory as `[{ name, kind }]` with kind `File` or `Directory`.
    #[wasm_bindgen]
    pub async fn list_directory(&self, path: String) -> Result<JsValue, JsError> {
        let entries = self
            .client()?
            .list_directory(&path)
            .await
            .map_err(|e| js_err("Failed to list directory", e))?;
        serde_wasm_bindgen::to_value(&entries).map_err(|e| js_err("Failed to serialize listing", e))
    }

    /// Resolves to `false` when the file did not exist.
    #[wasm_bindgen]
    pub async fn delete_file(&self, path: String) -> Result<bool, JsError> {
        self.client()?
            .delete_file(&path)
            .await
            .map_err(|e| js_err("Delete failed", e))
    }

    #[wasm_bindgen]
    pub async fn add_tag(&self, path: String, tag: String) -> Result<(), JsError> {
        self.client()?
            .add_tag(&path, &tag)
            .await
            .map_err(|e| js_err("Failed to add tag", e))
    }

    #[wasm_bindgen]
    pub async fn remove_tag(&self, path: String, tag: String) -> Result<(), JsError> {
        self.client()?
            .remove_tag(&path, &tag)
            .await
            .map_err(|e| js_err("Failed to remove tag", e))
    }

    #[wasm_bindgen]
    pub async fn add_viewer(&self, path: String, viewer_id: String) -> Result<(), JsError> {
        self.client()?
            .add_viewer(&path, &viewer_id)
            .await
            .map_err(|e| js_err("Failed to add viewer", e))
    }

    #[wasm_bindgen]
    pub async fn remove_viewer(&self, path: String, viewer_id: String) -> Result<(), JsError> {
        self.client()?
            .remove_viewer(&path, &viewer_id)
            .await
            .map_err(|e| js_err("Failed to remove viewer", e))
    }

    /// Starts mirroring the remote tree.
    ///
    /// `callback(tree, seq)` runs after every applied delta with the full
    /// mirrored tree as a plain JS object.
    #[wasm_bindgen]
    pub async fn start_reinstate(
        &self,
        callback: Function,
        window: Option<u32>,
    ) -> Result<ReinstateHandle, JsError> {
        let session = self
            .client()?
            .start_reinstate(window.unwrap_or(DEFAULT_WINDOW))
            .await
            .map_err(|e| js_err("Reinstate failed", e))?;

        let mirror = session.mirror();
        let mut events = session.subscribe();
        wasm_bindgen_futures::spawn_local(async move {
            loop {
                let seq = match events.recv().await {
                    Ok(SessionEvent::Updated { seq }) => seq,
                    Ok(SessionEvent::Ended(end)) => {
                        console_log!("Reinstate session ended: {:?}", end);
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        console_log!("Reinstate callback skipped {} updates", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let tree = match value_to_js(&mirror.snapshot()) {
                    Ok(tree) => tree,
                    Err(e) => {
                        console_log!("Failed to convert tree: {:?}", e);
                        continue;
                    }
                };
                let seq = JsValue::from_f64(seq as f64);
                if let Err(e) = callback.call2(&JsValue::NULL, &tree, &seq) {
                    console_log!("Reinstate callback threw: {:?}", e);
                }
            }
        });

        Ok(ReinstateHandle { session })
    }
}

/// A running reinstate session. Dropping it stops the session.
#[wasm_bindgen]
pub struct ReinstateHandle {
    session: Session,
}

#[wasm_bindgen]
impl ReinstateHandle {
    /// The current mirrored tree.
    #[wasm_bindgen]
    pub fn tree(&self) -> Result<JsValue, JsError> {
        value_to_js(&self.session.mirror().snapshot())
            .map_err(|_| JsError::new("Failed to convert tree"))
    }

    #[wasm_bindgen(getter)]
    pub fn running(&self) -> bool {
        self.session.is_running()
    }

    /// Stops the session; resolves to how it ended.
    #[wasm_bindgen]
    pub async fn stop(&self) -> String {
        match self.session.stop().await {
            SessionEnd::Stopped => "stopped".to_owned(),
            SessionEnd::FeedClosed => "feed closed".to_owned(),
            SessionEnd::Failed(err) => format!("failed: {err}"),
        }
    }
}
