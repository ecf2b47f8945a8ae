use iobio_core::MalformedDelta;
use thiserror::Error;

/// Errors reported by a [`DeltaFeed`](crate::DeltaFeed) or
/// [`DeltaSource`](crate::DeltaSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),
    #[error("credit request rejected: {0}")]
    CreditRejected(String),
    #[error("feed is closed")]
    Closed,
    #[error("feed was already opened")]
    AlreadyOpened,
}

/// Why a reinstate session could not start or had to end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The remote acknowledged the feed subscription with a failure.
    #[error("reinstate subscription rejected by the remote")]
    Subscription,
    /// Delta number `seq` (1-based) could not be applied to the mirror.
    #[error("malformed delta #{seq}: {source}")]
    Malformed {
        seq: u64,
        #[source]
        source: MalformedDelta,
    },
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// The producer emitted a record without holding a credit.
    #[error("producer exceeded its granted credits")]
    CreditOverrun,
    /// The session task went away without reporting how it ended.
    #[error("session task ended unexpectedly")]
    Aborted,
}
