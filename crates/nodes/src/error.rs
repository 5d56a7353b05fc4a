//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine never retries on its own; a delegate that wants retries
/// implements them before returning.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// The node's configuration is missing a field or has the wrong shape.
    #[error("invalid node config: {0}")]
    InvalidConfig(String),

    /// The node ran and failed.
    #[error("node failed: {0}")]
    Fatal(String),
}
