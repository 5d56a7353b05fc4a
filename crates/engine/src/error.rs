//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;

/// A rejected connection attempt.  Never fatal: the graph is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cannot connect two {0} ports")]
    SameDirection(&'static str),

    #[error("connections must run from an output port to an input port")]
    WrongDirection,

    #[error("input port '{port_id}' on node '{node_id}' is already connected")]
    InputAlreadyConnected { node_id: String, port_id: String },

    #[error("type mismatch: '{source_type}' cannot feed '{target_type}'")]
    TypeMismatch {
        source_type: String,
        target_type: String,
    },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{node_id}' has no port '{port}'")]
    UnknownPort { node_id: String, port: String },
}

/// Errors produced by the workflow engine (graph editing, validation, execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Graph errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A connection references a node ID that doesn't exist in the graph.
    #[error("connection '{connection_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        connection_id: String,
        node_id: String,
        side: &'static str,
    },

    /// A connection references a port the node does not have.
    #[error("connection '{connection_id}' references unknown port '{port_id}' on node '{node_id}'")]
    UnknownPortReference {
        connection_id: String,
        node_id: String,
        port_id: String,
    },

    /// A stored connection breaks a port rule (shared input, type mismatch).
    #[error("connection '{connection_id}' is invalid: {reason}")]
    InvalidConnection {
        connection_id: String,
        #[source]
        reason: ValidationError,
    },

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("no connection '{0}'")]
    ConnectionNotFound(String),

    #[error("unknown node template '{0}'")]
    UnknownTemplate(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    // ------ Execution errors ------

    /// A delegate failed; contained to its branch.
    #[error("node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("node '{node_id}' timed out after {after:?}")]
    Timeout { node_id: String, after: Duration },

    #[error("maximum execution depth {0} exceeded")]
    DepthExceeded(usize),

    #[error("subflow '{0}' not found")]
    SubflowNotFound(String),

    #[error("graph '{0}' has no stored definition")]
    GraphNotFound(uuid::Uuid),

    // ------ Scheduling / config ------

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
