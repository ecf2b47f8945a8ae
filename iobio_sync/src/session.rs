//! The reinstate session: a single actor task that owns the delta feed and
//! is the only writer of the tree mirror.

use std::sync::{Arc, RwLock};

use iobio_core::{Delta, Tree, TreeChange};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    CreditWindow, DeltaFeed, DeltaSource, FeedOpened, ListenerId, SyncError,
    mirror::{Listeners, MirrorHandle, read_tree, write_tree},
    spawn::spawn_task,
};

const EVENT_CAPACITY: usize = 256;
const CHANGE_CAPACITY: usize = 1024;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// [`Session::stop`] was called or the handle was dropped.
    Stopped,
    /// The producer closed the feed.
    FeedClosed,
    Failed(SyncError),
}

/// Published on [`Session::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Delta number `seq` (1-based) was applied and listeners have run.
    Updated { seq: u64 },
    Ended(SessionEnd),
}

/// Handle to a running reinstate session.
///
/// Dropping the handle stops the session. The mirror obtained through
/// [`Session::mirror`] stays readable afterwards.
pub struct Session {
    tree: Arc<RwLock<Tree>>,
    listeners: Listeners,
    events: broadcast::Sender<SessionEvent>,
    changes: broadcast::Sender<TreeChange>,
    state: watch::Receiver<Option<SessionEnd>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("end", &*self.state.borrow())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens the feed of `source`, grants `initial_credits` (at least one)
    /// and starts applying deltas to a fresh, empty mirror.
    pub async fn start<S: DeltaSource>(
        source: &S,
        initial_credits: u32,
    ) -> Result<Self, SyncError> {
        let FeedOpened { success, mut feed } = source.open_feed().await?;
        if !success {
            warn!("reinstate subscription was rejected");
            return Err(SyncError::Subscription);
        }

        let mut window = CreditWindow::new(initial_credits);
        let credits = window.headroom();
        feed.request_more(credits).await?;
        window.grant(credits);
        debug!(credits, "reinstate session started");

        let tree = Arc::new(RwLock::new(Tree::new()));
        let listeners = Listeners::default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (state_tx, state) = watch::channel(None);
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            feed,
            tree: tree.clone(),
            window,
            listeners: listeners.clone(),
            events: events.clone(),
            changes: changes.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            seq: 0,
        };
        spawn_task(actor.run());

        Ok(Self {
            tree,
            listeners,
            events,
            changes,
            state,
            cancel,
        })
    }

    /// Registers `listener`, called once after every applied delta with
    /// read access to the mirror.
    pub fn on_update<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Tree) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Session lifecycle events, for observers that cannot hand over a
    /// `Send` callback.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Node-level change records, in application order.
    pub fn changes(&self) -> broadcast::Receiver<TreeChange> {
        self.changes.subscribe()
    }

    pub fn mirror(&self) -> MirrorHandle {
        MirrorHandle::new(self.tree.clone())
    }

    /// How the session ended, or `None` while it is running.
    pub fn end(&self) -> Option<SessionEnd> {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.end().is_none()
    }

    /// Waits until the session ended.
    pub async fn closed(&self) -> SessionEnd {
        let mut state = self.state.clone();
        let end = match state.wait_for(Option::is_some).await {
            Ok(end) => (*end).clone(),
            Err(_) => None,
        };
        end.unwrap_or(SessionEnd::Failed(SyncError::Aborted))
    }

    /// Releases the feed. No delta is applied after this returns, even one
    /// already buffered by the transport.
    pub async fn stop(&self) -> SessionEnd {
        self.cancel.cancel();
        self.closed().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionActor<F> {
    feed: F,
    tree: Arc<RwLock<Tree>>,
    window: CreditWindow,
    listeners: Listeners,
    events: broadcast::Sender<SessionEvent>,
    changes: broadcast::Sender<TreeChange>,
    state: watch::Sender<Option<SessionEnd>>,
    cancel: CancellationToken,
    seq: u64,
}

impl<F: DeltaFeed> SessionActor<F> {
    async fn run(mut self) {
        let end = self.drive().await;
        match &end {
            SessionEnd::Failed(err) => warn!(applied = self.seq, "reinstate session failed: {err}"),
            SessionEnd::FeedClosed => debug!(applied = self.seq, "reinstate feed closed"),
            SessionEnd::Stopped => debug!(applied = self.seq, "reinstate session stopped"),
        }

        let Self {
            feed, events, state, ..
        } = self;
        drop(feed);
        let _ = events.send(SessionEvent::Ended(end.clone()));
        state.send_replace(Some(end));
    }

    async fn drive(&mut self) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                next = self.feed.next_delta() => next,
            };
            if self.cancel.is_cancelled() {
                debug!("dropping delta received after stop");
                return SessionEnd::Stopped;
            }
            let delta = match next {
                Ok(Some(delta)) => delta,
                Ok(None) => return SessionEnd::FeedClosed,
                Err(err) => return SessionEnd::Failed(err.into()),
            };
            if let Err(err) = self.process(delta).await {
                return SessionEnd::Failed(err);
            }
        }
    }

    async fn process(&mut self, delta: Delta) -> Result<(), SyncError> {
        self.window.receive()?;
        self.seq += 1;
        let seq = self.seq;
        trace!(seq, action = delta.action.name(), path = ?delta.path, "applying delta");

        let changes = write_tree(&self.tree)
            .apply(delta)
            .map_err(|source| SyncError::Malformed { seq, source })?;
        for change in changes {
            let _ = self.changes.send(change);
        }

        self.listeners.notify(&read_tree(&self.tree));
        let _ = self.events.send(SessionEvent::Updated { seq });

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.feed.request_more(1).await?;
        self.window.grant(1);
        Ok(())
    }
}
