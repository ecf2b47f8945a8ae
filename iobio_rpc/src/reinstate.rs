//! The reinstate feed over irpc, exposed as a [`DeltaSource`].

use async_trait::async_trait;
use iobio_core::Delta;
use iobio_sync::{DeltaFeed, DeltaSource, FeedError, FeedOpened};
use irpc::channel::mpsc;

use crate::Client;
use crate::rpc::{GetReinstate, ReinstateFrame};

const CREDIT_CHANNEL_CAPACITY: usize = 4;
const FRAME_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct RemoteDeltaSource {
    client: Client,
}

impl RemoteDeltaSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// An open reinstate stream. Dropping it releases the subscription.
pub struct RemoteFeed {
    credits: mpsc::Sender<u32>,
    frames: mpsc::Receiver<ReinstateFrame>,
}

impl std::fmt::Debug for RemoteFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFeed").finish_non_exhaustive()
    }
}

#[async_trait]
impl DeltaSource for RemoteDeltaSource {
    type Feed = RemoteFeed;

    async fn open_feed(&self) -> Result<FeedOpened<RemoteFeed>, FeedError> {
        let (credits, mut frames) = self
            .client
            .irpc()
            .bidi_streaming(
                GetReinstate {
                    key: self.client.auth_key().to_owned(),
                },
                CREDIT_CHANNEL_CAPACITY,
                FRAME_CHANNEL_CAPACITY,
            )
            .await
            .map_err(|err| FeedError::Transport(err.to_string()))?;

        let success = match frames.recv().await {
            Ok(Some(ReinstateFrame::Opened { success })) => success,
            Ok(Some(ReinstateFrame::Delta(_))) => {
                return Err(FeedError::Transport(
                    "reinstate feed sent a delta before acknowledging".to_owned(),
                ));
            }
            Ok(None) => return Err(FeedError::Closed),
            Err(err) => return Err(FeedError::Transport(err.to_string())),
        };
        Ok(FeedOpened {
            success,
            feed: RemoteFeed { credits, frames },
        })
    }
}

#[async_trait]
impl DeltaFeed for RemoteFeed {
    async fn request_more(&mut self, credits: u32) -> Result<(), FeedError> {
        self.credits
            .send(credits)
            .await
            .map_err(|err| FeedError::CreditRejected(err.to_string()))
    }

    async fn next_delta(&mut self) -> Result<Option<Delta>, FeedError> {
        match self.frames.recv().await {
            Ok(Some(ReinstateFrame::Delta(delta))) => Ok(Some(delta)),
            Ok(Some(ReinstateFrame::Opened { .. })) => Err(FeedError::Transport(
                "duplicate reinstate acknowledgement".to_owned(),
            )),
            Ok(None) => Ok(None),
            Err(err) => Err(FeedError::Transport(err.to_string())),
        }
    }
}
