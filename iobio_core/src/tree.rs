//! Arena-backed mirror of a remote object tree.
//!
//! Nodes are either scalar [`Value`]s or mappings from key to child
//! [`NodeId`]. Every [`Value::Map`] that enters the tree is materialized into
//! mapping nodes, so subtrees inserted by a delta are traversed exactly like
//! ancestors synthesized on demand. Arrays stay scalar leaves and are the
//! targets of [`Action::Append`].

use core::fmt;
use std::collections::BTreeMap;

use crate::{Action, Delta, MalformedDelta, Value, delta::display_path};

/// Stable handle to a node in a [`Tree`].
///
/// The generation is bumped when a slot is freed, so a handle to a removed
/// node never resolves to whatever reuses its slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Value),
    Mapping(BTreeMap<String, NodeId>),
}

/// What happened to a node, as published on the change bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A missing ancestor was synthesized as an empty mapping.
    Created,
    Updated,
    Added,
    Appended,
    Removed,
    RootReplaced,
}

/// One observable mutation. `node` is the mapping that owns `key`; for
/// [`ChangeKind::RootReplaced`] it is the new root and `key` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub node: NodeId,
    pub key: Option<String>,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates a tree whose root is an empty mapping.
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            live: 0,
        };
        tree.root = tree.alloc(Node::Mapping(BTreeMap::new()));
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.live
    }

    /// True when the root is an empty mapping.
    pub fn is_empty(&self) -> bool {
        matches!(self.node(self.root), Some(Node::Mapping(children)) if children.is_empty())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn mapping(&self, id: NodeId) -> Option<&BTreeMap<String, NodeId>> {
        match self.node(id) {
            Some(Node::Mapping(children)) => Some(children),
            _ => None,
        }
    }

    fn mapping_mut(&mut self, id: NodeId) -> Option<&mut BTreeMap<String, NodeId>> {
        match self.node_mut(id) {
            Some(Node::Mapping(children)) => Some(children),
            _ => None,
        }
    }

    /// Iterates the children of a mapping node. Scalars have none.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (&str, NodeId)> {
        self.mapping(id)
            .into_iter()
            .flat_map(|children| children.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Resolves a path to a node handle.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<NodeId> {
        path.iter().try_fold(self.root, |current, segment| {
            self.mapping(current)?.get(segment.as_ref()).copied()
        })
    }

    /// Materializes the subtree at `path` back into a [`Value`].
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<Value> {
        self.lookup(path).and_then(|id| self.value(id))
    }

    /// Materializes the subtree rooted at `id`.
    pub fn value(&self, id: NodeId) -> Option<Value> {
        match self.node(id)? {
            Node::Scalar(value) => Some(value.clone()),
            Node::Mapping(children) => Some(Value::Map(
                children
                    .iter()
                    .filter_map(|(key, child)| Some((key.clone(), self.value(*child)?)))
                    .collect(),
            )),
        }
    }

    /// The whole tree as a [`Value`].
    pub fn snapshot(&self) -> Value {
        self.value(self.root).unwrap_or_default()
    }

    /// Applies one delta record.
    ///
    /// Returns the changes it caused, in order: synthesized ancestors first,
    /// then the mutation itself. Deleting an absent key returns no changes.
    pub fn apply(&mut self, delta: Delta) -> Result<Vec<TreeChange>, MalformedDelta> {
        tracing::trace!(
            "apply {} at {}",
            delta.action.name(),
            display_path(&delta.path)
        );

        let Delta { mut path, action } = delta;
        let Some(key) = path.pop() else {
            return self.replace_root(action);
        };

        let mut changes = Vec::new();
        let parent = self.walk(&path, action.creates_ancestors(), &mut changes)?;

        let change = match action {
            Action::Update(value) => self.set_child(parent, key, value, ChangeKind::Updated),
            Action::Add(value) => self.set_child(parent, key, value, ChangeKind::Added),
            Action::Append(value) => {
                path.push(key);
                self.append_at(parent, path, value)?
            }
            Action::Delete => match self.remove_child(parent, key) {
                Some(change) => change,
                None => return Ok(changes),
            },
        };
        changes.push(change);
        Ok(changes)
    }

    fn replace_root(&mut self, action: Action) -> Result<Vec<TreeChange>, MalformedDelta> {
        match action {
            Action::Update(value) => {
                let new_root = self.materialize(value);
                let old_root = std::mem::replace(&mut self.root, new_root);
                self.release(old_root);
                Ok(vec![TreeChange {
                    node: new_root,
                    key: None,
                    kind: ChangeKind::RootReplaced,
                }])
            }
            other => Err(MalformedDelta::RootAction {
                action: other.name(),
            }),
        }
    }

    /// Descends through `ancestors` from the root and returns the mapping
    /// that holds the target key. Nothing is created unless `create` is set,
    /// and creation only ever happens below a missing key, so an error can
    /// not leave freshly synthesized mappings behind.
    fn walk(
        &mut self,
        ancestors: &[String],
        create: bool,
        changes: &mut Vec<TreeChange>,
    ) -> Result<NodeId, MalformedDelta> {
        let mut current = self.root;

        for (depth, segment) in ancestors.iter().enumerate() {
            let Some(children) = self.mapping(current) else {
                return Err(MalformedDelta::NotAMapping {
                    path: display_path(&ancestors[..depth]),
                });
            };

            current = match children.get(segment).copied() {
                Some(child) => child,
                None if create => {
                    let child = self.alloc(Node::Mapping(BTreeMap::new()));
                    if let Some(children) = self.mapping_mut(current) {
                        children.insert(segment.clone(), child);
                    }
                    changes.push(TreeChange {
                        node: current,
                        key: Some(segment.clone()),
                        kind: ChangeKind::Created,
                    });
                    child
                }
                None => {
                    return Err(MalformedDelta::MissingAncestor {
                        path: display_path(&ancestors[..=depth]),
                    });
                }
            };
        }

        if self.mapping(current).is_none() {
            return Err(MalformedDelta::NotAMapping {
                path: display_path(ancestors),
            });
        }
        Ok(current)
    }

    fn set_child(
        &mut self,
        parent: NodeId,
        key: String,
        value: Value,
        kind: ChangeKind,
    ) -> TreeChange {
        let child = self.materialize(value);
        let previous = self
            .mapping_mut(parent)
            .and_then(|children| children.insert(key.clone(), child));
        if let Some(previous) = previous {
            self.release(previous);
        }
        TreeChange {
            node: parent,
            key: Some(key),
            kind,
        }
    }

    fn append_at(
        &mut self,
        parent: NodeId,
        path: Vec<String>,
        value: Value,
    ) -> Result<TreeChange, MalformedDelta> {
        let key = path.last().cloned().unwrap_or_default();
        let target = self
            .mapping(parent)
            .and_then(|children| children.get(&key))
            .copied();

        match target.and_then(|target| self.node_mut(target)) {
            Some(Node::Scalar(Value::Array(items))) => {
                items.push(value);
                Ok(TreeChange {
                    node: parent,
                    key: Some(key),
                    kind: ChangeKind::Appended,
                })
            }
            Some(Node::Scalar(other)) => Err(MalformedDelta::NotASequence {
                path: display_path(&path),
                found: other.kind(),
            }),
            Some(Node::Mapping(_)) => Err(MalformedDelta::NotASequence {
                path: display_path(&path),
                found: "map",
            }),
            None => Err(MalformedDelta::MissingTarget {
                path: display_path(&path),
            }),
        }
    }

    fn remove_child(&mut self, parent: NodeId, key: String) -> Option<TreeChange> {
        let removed = self.mapping_mut(parent)?.remove(&key)?;
        self.release(removed);
        Some(TreeChange {
            node: parent,
            key: Some(key),
            kind: ChangeKind::Removed,
        })
    }

    fn materialize(&mut self, value: Value) -> NodeId {
        match value {
            Value::Map(entries) => {
                let children = entries
                    .into_iter()
                    .map(|(key, value)| (key, self.materialize(value)))
                    .collect();
                self.alloc(Node::Mapping(children))
            }
            other => self.alloc(Node::Scalar(other)),
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Frees a node and everything below it.
    fn release(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation {
                continue;
            }
            let Some(node) = slot.node.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            if let Node::Mapping(children) = node {
                stack.extend(children.into_values());
            }
        }
    }
}
