//! Reinstate tree synchronizer.
//!
//! A [`Session`] subscribes to a remote delta feed ([`DeltaSource`]), grants
//! it a window of flow-control credits and applies every received
//! [`Delta`](iobio_core::Delta) to a local [`Tree`](iobio_core::Tree)
//! mirror, strictly in arrival order. Each applied record is announced to
//! listeners and answered with exactly one new credit.

pub mod error;
pub mod feed;
pub mod mirror;
pub mod session;
mod spawn;
pub mod window;

pub use error::{FeedError, SyncError};
pub use feed::{ChannelFeed, ChannelSource, DeltaFeed, DeltaSource, FeedOpened, FeedProducer};
pub use mirror::{ListenerId, MirrorHandle};
pub use session::{Session, SessionEnd, SessionEvent};
pub use spawn::spawn_task;
pub use window::{CreditWindow, DEFAULT_WINDOW};
