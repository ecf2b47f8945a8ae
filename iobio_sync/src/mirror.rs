use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use iobio_core::{Tree, Value};

/// Read-only access to a session's tree mirror.
///
/// Stays valid after the session ended; the tree then keeps the state of
/// the last applied delta.
#[derive(Debug, Clone)]
pub struct MirrorHandle {
    tree: Arc<RwLock<Tree>>,
}

impl MirrorHandle {
    pub(crate) fn new(tree: Arc<RwLock<Tree>>) -> Self {
        Self { tree }
    }

    /// Runs `f` with shared access to the tree.
    pub fn read<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&read_tree(&self.tree))
    }

    /// The whole mirror as a nested [`Value`].
    pub fn snapshot(&self) -> Value {
        self.read(Tree::snapshot)
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<Value> {
        self.read(|tree| tree.get(path))
    }

    /// Number of live nodes in the mirror.
    pub fn len(&self) -> usize {
        self.read(Tree::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read(Tree::is_empty)
    }
}

pub(crate) fn read_tree(tree: &RwLock<Tree>) -> RwLockReadGuard<'_, Tree> {
    tree.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_tree(tree: &RwLock<Tree>) -> RwLockWriteGuard<'_, Tree> {
    tree.write().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies a callback registered with
/// [`Session::on_update`](crate::Session::on_update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Tree) + Send + Sync>;

#[derive(Default)]
struct ListenerList {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

/// Update callbacks shared between the session handle and its actor.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    inner: Arc<Mutex<ListenerList>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Listener) -> ListenerId {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(list.next_id);
        list.next_id += 1;
        list.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = list.entries.len();
        list.entries.retain(|(entry, _)| *entry != id);
        list.entries.len() != before
    }

    /// Calls every listener once. The list lock is not held while calling,
    /// so a listener may register or remove listeners.
    pub(crate) fn notify(&self, tree: &Tree) {
        let listeners: Vec<Listener> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(tree);
        }
    }
}
