//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real delegate is either
//! unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ExecutableNode, ExecutionContext, NodeError};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Merge a specific JSON value into the input and return it.
    ReturnValue(Value),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Sleep, then behave like `ReturnValue`.
    Delayed(Duration, Value),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that succeeds after `delay`.
    pub fn delayed(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::with(name, MockBehaviour::Delayed(delay, value))
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs received so far, in call order.
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    fn merged(&self, input: &Value, v: &Value) -> Value {
        // Merge the incoming input with the node's own output fields so
        // tests can trace the data flowing through the graph.
        let mut out = match input {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };
        if let Some(out_obj) = out.as_object_mut() {
            out_obj.insert("node".into(), json!(self.name));
            if let Some(v_obj) = v.as_object() {
                for (k, val) in v_obj {
                    out_obj.insert(k.clone(), val.clone());
                }
            }
        }
        out
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push(input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.merged(&input, v)),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::Delayed(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(self.merged(&input, v))
            }
        }
    }
}
