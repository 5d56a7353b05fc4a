//! Built-in data nodes that need no external service.
//!
//! Integration and AI templates are provided by the host application; these
//! cover the pure payload transforms.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::{ExecutableNode, ExecutionContext, NodeError};

/// Turn any payload into an object so fields can be merged into it.
///
/// Non-object payloads are kept under the `value` key.
fn into_object(input: Value) -> Map<String, Value> {
    match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}

/// `set-fields`: merge `config.values` into the payload.
pub struct SetFields;

#[async_trait]
impl ExecutableNode for SetFields {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let values = match ctx.config.get("values") {
            Some(Value::Object(values)) => values.clone(),
            None => Map::new(),
            Some(other) => {
                return Err(NodeError::InvalidConfig(format!(
                    "`values` must be an object, got {other}"
                )))
            }
        };

        let mut out = into_object(input);
        out.extend(values);
        Ok(Value::Object(out))
    }
}

/// `counter`: add `config.by` (default 1) to the numeric field `config.field`
/// (default `count`). A missing field starts at zero.
pub struct Counter;

#[async_trait]
impl ExecutableNode for Counter {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let field = ctx.config_str("field").unwrap_or("count").to_owned();
        let by = match ctx.config.get("by") {
            None => 1.0,
            Some(v) => v
                .as_f64()
                .ok_or_else(|| NodeError::InvalidConfig(format!("`by` must be a number, got {v}")))?,
        };

        let mut out = into_object(input);
        let current = match out.get(&field) {
            None | Some(Value::Null) => 0.0,
            Some(v) => v.as_f64().ok_or_else(|| {
                NodeError::Fatal(format!("field '{field}' is not a number: {v}"))
            })?,
        };

        let next = current + by;
        // Keep integers integral so downstream equality checks stay exact.
        let next = if next.fract() == 0.0 && next.abs() < i64::MAX as f64 {
            Value::from(next as i64)
        } else {
            Value::from(next)
        };
        out.insert(field, next);
        Ok(Value::Object(out))
    }
}

/// `log`: pass the payload through unchanged after logging it.
pub struct LogPayload;

#[async_trait]
impl ExecutableNode for LogPayload {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        info!(node_id = %ctx.node_id, payload = %input, "log node");
        Ok(input)
    }
}

/// All built-in delegates keyed by template id.
pub fn builtins() -> Vec<(&'static str, Arc<dyn ExecutableNode>)> {
    vec![
        ("set-fields", Arc::new(SetFields)),
        ("counter", Arc::new(Counter)),
        ("log", Arc::new(LogPayload)),
    ]
}
