//! Cross-platform async task spawning.
//!
//! - On native: uses `tokio::spawn`
//! - On WASM: uses `wasm_bindgen_futures::spawn_local`

use std::future::Future;

#[cfg(target_arch = "wasm32")]
pub fn spawn_task<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_task<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}
