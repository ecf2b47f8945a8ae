use thiserror::Error;

/// A delta whose path/action combination cannot be applied against the
/// current structure of the tree. Paths are rendered as `/a/b`.
///
/// A failed application never leaves a partial mutation behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedDelta {
    #[error("action '{action}' is not defined for the root")]
    RootAction { action: &'static str },
    #[error("ancestor {path} is not a mapping")]
    NotAMapping { path: String },
    #[error("ancestor {path} does not exist")]
    MissingAncestor { path: String },
    #[error("append target {path} does not exist")]
    MissingTarget { path: String },
    #[error("append target {path} is not a sequence (found {found})")]
    NotASequence { path: String, found: &'static str },
}
