//! Collaborator traits for the remote delta feed, and an in-process
//! implementation backed by tokio channels.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use iobio_core::Delta;
use tokio::sync::{Semaphore, mpsc};

use crate::FeedError;

/// The subscription acknowledgement together with the opened feed.
pub struct FeedOpened<F> {
    pub success: bool,
    pub feed: F,
}

/// A pull-based stream of delta records.
///
/// The producer behind a feed may only emit one record per credit granted
/// through [`DeltaFeed::request_more`].
#[async_trait]
pub trait DeltaFeed: Send + 'static {
    /// Grants `credits` more records to the producer.
    async fn request_more(&mut self, credits: u32) -> Result<(), FeedError>;

    /// Waits for the next record. `Ok(None)` means the producer closed the
    /// feed.
    async fn next_delta(&mut self) -> Result<Option<Delta>, FeedError>;
}

/// Something a reinstate session can be started from.
#[async_trait]
pub trait DeltaSource: Send + Sync {
    type Feed: DeltaFeed;

    /// Opens the feed and waits for the remote acknowledgement.
    async fn open_feed(&self) -> Result<FeedOpened<Self::Feed>, FeedError>;
}

/// In-process [`DeltaSource`] that can be opened once.
pub struct ChannelSource {
    accept: bool,
    pending: Mutex<Option<ChannelFeed>>,
}

/// Feed side of [`ChannelSource`]. Dropping it closes the credit semaphore,
/// so blocked producers wake up with [`FeedError::Closed`].
pub struct ChannelFeed {
    deltas: mpsc::UnboundedReceiver<Delta>,
    credits: Arc<Semaphore>,
    granted: Arc<AtomicU64>,
}

/// Producer side of [`ChannelSource`]. The feed closes once every clone is
/// dropped.
#[derive(Clone)]
pub struct FeedProducer {
    deltas: mpsc::UnboundedSender<Delta>,
    credits: Arc<Semaphore>,
    granted: Arc<AtomicU64>,
}

impl ChannelSource {
    /// Creates a connected source/producer pair. With `accept == false` the
    /// source acknowledges the subscription with a failure.
    pub fn pair(accept: bool) -> (Self, FeedProducer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let credits = Arc::new(Semaphore::new(0));
        let granted = Arc::new(AtomicU64::new(0));
        let feed = ChannelFeed {
            deltas: rx,
            credits: credits.clone(),
            granted: granted.clone(),
        };
        let producer = FeedProducer {
            deltas: tx,
            credits,
            granted,
        };
        let source = Self {
            accept,
            pending: Mutex::new(Some(feed)),
        };
        (source, producer)
    }
}

#[async_trait]
impl DeltaSource for ChannelSource {
    type Feed = ChannelFeed;

    async fn open_feed(&self) -> Result<FeedOpened<ChannelFeed>, FeedError> {
        let feed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(FeedError::AlreadyOpened)?;
        Ok(FeedOpened {
            success: self.accept,
            feed,
        })
    }
}

#[async_trait]
impl DeltaFeed for ChannelFeed {
    async fn request_more(&mut self, credits: u32) -> Result<(), FeedError> {
        if self.credits.is_closed() {
            return Err(FeedError::Closed);
        }
        self.credits.add_permits(credits as usize);
        self.granted.fetch_add(u64::from(credits), Ordering::Relaxed);
        Ok(())
    }

    async fn next_delta(&mut self) -> Result<Option<Delta>, FeedError> {
        Ok(self.deltas.recv().await)
    }
}

impl Drop for ChannelFeed {
    fn drop(&mut self) {
        self.credits.close();
    }
}

impl FeedProducer {
    /// Waits for a credit, then emits `delta`.
    pub async fn send(&self, delta: Delta) -> Result<(), FeedError> {
        let permit = self
            .credits
            .acquire()
            .await
            .map_err(|_| FeedError::Closed)?;
        permit.forget();
        self.deltas.send(delta).map_err(|_| FeedError::Closed)
    }

    /// Emits `delta` if a credit is available right now. Returns `false`
    /// when the consumer has not granted one.
    pub fn try_send(&self, delta: Delta) -> Result<bool, FeedError> {
        match self.credits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.deltas.send(delta).map_err(|_| FeedError::Closed)?;
                Ok(true)
            }
            Err(tokio::sync::TryAcquireError::NoPermits) => Ok(false),
            Err(tokio::sync::TryAcquireError::Closed) => Err(FeedError::Closed),
        }
    }

    /// Total credits granted by the consumer so far.
    pub fn credits_granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Credits granted but not yet spent.
    pub fn available_credits(&self) -> usize {
        self.credits.available_permits()
    }

    /// Whether the consumer side is gone.
    pub fn is_closed(&self) -> bool {
        self.deltas.is_closed()
    }
}
