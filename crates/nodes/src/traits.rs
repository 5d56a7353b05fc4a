//! The `ExecutableNode` trait — the contract every action/data delegate must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::NodeError;

/// Context passed to every delegate call.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the graph being executed.
    pub graph_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// Instance ID of the node being executed.
    pub node_id: String,
    /// Catalog template the node was instantiated from.
    pub template_id: String,
    /// The node's own configuration map.
    pub config: Map<String, Value>,
}

impl ExecutionContext {
    /// Read a string config entry.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// The delegate trait for action and data nodes.
///
/// The engine is agnostic to what happens inside: creating a note, calling an
/// HTTP endpoint or an AI model all look the same from here.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node, receiving the upstream node's JSON output as `input`,
    /// and return this node's JSON output.
    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
