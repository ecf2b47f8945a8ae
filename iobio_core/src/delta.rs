use serde::{Deserialize, Serialize};

use crate::Value;

/// One path-addressed mutation instruction from the reinstate feed.
///
/// An empty `path` addresses the root of the tree itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub path: Vec<String>,
    pub action: Action,
}

/// What a [`Delta`] does to the node at its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Replace the node at the path with the value.
    Update(Value),
    /// Push the value onto the array stored at the path (usually a viewer id).
    Append(Value),
    /// Create or replace the node at the path with a new child entity.
    Add(Value),
    /// Remove the node at the path from its parent mapping.
    Delete,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Update(_) => "update",
            Action::Append(_) => "append",
            Action::Add(_) => "add",
            Action::Delete => "delete",
        }
    }

    /// Whether missing ancestors are synthesized as empty mappings.
    ///
    /// Only the inserting actions create structure; `append` and `delete`
    /// against a path whose ancestors do not exist are malformed.
    pub fn creates_ancestors(&self) -> bool {
        matches!(self, Action::Update(_) | Action::Add(_))
    }
}

fn to_path<I, S>(path: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    path.into_iter().map(Into::into).collect()
}

impl Delta {
    pub fn new<I, S>(path: I, action: Action) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: to_path(path),
            action,
        }
    }

    pub fn update<I, S>(path: I, value: impl Into<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(path, Action::Update(value.into()))
    }

    pub fn append<I, S>(path: I, value: impl Into<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(path, Action::Append(value.into()))
    }

    pub fn add<I, S>(path: I, value: impl Into<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(path, Action::Add(value.into()))
    }

    pub fn delete<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(path, Action::Delete)
    }

    /// Replaces the whole tree with `value`.
    pub fn replace_root(value: impl Into<Value>) -> Self {
        Self {
            path: Vec::new(),
            action: Action::Update(value.into()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// Renders a path as `/a/b/c` for logs and error messages.
pub fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    let mut out = String::new();
    for segment in path {
        out.push('/');
        out.push_str(segment.as_ref());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Splits a slash-separated file path into tree path segments,
/// ignoring empty segments (`"/a//b/"` is `["a", "b"]`).
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}
