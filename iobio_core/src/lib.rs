//! Core iobio types.
//!
//! This crate defines the types shared by all iobio crates:
//!
//! - [`Value`]: the dynamically shaped payload carried by the protocol.
//! - [`Delta`] and [`Action`]: path-addressed mutation records streamed by
//!   the reinstate feed.
//! - [`Tree`]: the arena-backed local mirror those records are applied to,
//!   together with the [`TreeChange`] records it reports per mutation.
//!
//! Nothing here does I/O; the synchronizer lives in `iobio_sync` and the
//! wire protocol in `iobio_rpc`.

pub mod delta;
pub mod error;
pub mod tree;
pub mod value;

pub use delta::{Action, Delta, display_path, split_path};
pub use error::MalformedDelta;
pub use tree::{ChangeKind, Node, NodeId, Tree, TreeChange};
pub use value::Value;
