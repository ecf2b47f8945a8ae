//! iobio WebAssembly bindings for browser clients.
//!
//! The browser client connects to a remote iobio node through an iroh relay
//! and exposes the file operations plus a reinstate session whose mirrored
//! tree is handed to a JS callback after every applied delta.

use wasm_bindgen::prelude::*;

mod client;
mod convert;

pub use client::*;

/// Install the panic hook so Rust panics show up in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}
