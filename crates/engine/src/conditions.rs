//! Branching-node semantics: if-else, switch, for-loop, while-loop and the
//! predicate router.
//!
//! Every evaluator returns a [`NodeOutcome`] naming the output ports to
//! activate.  Loop nodes also drive their body branch themselves, strictly
//! in order, through a [`BranchRunner`] supplied by the executor.
//!
//! A condition that fails to parse or evaluate never fails the node: it
//! counts as false / unmatched and a warning is logged.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::ExecutorConfig;
use crate::error::EngineError;
use crate::expr;
use crate::models::Node;

pub const IF_ELSE: &str = "if-else";
pub const SWITCH: &str = "switch";
pub const FOR_LOOP: &str = "for-loop";
pub const WHILE_LOOP: &str = "while-loop";
pub const MEMORY_ROUTER: &str = "memory-router";

/// The output of one node: its payload and which ports it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub ports: Vec<String>,
    pub payload: Value,
}

impl NodeOutcome {
    pub fn single(port: impl Into<String>, payload: Value) -> Self {
        Self {
            ports: vec![port.into()],
            payload,
        }
    }

    /// Fire every output port of `node`.
    pub fn all(node: &Node, payload: Value) -> Self {
        Self {
            ports: node.outputs.iter().map(|p| p.key.clone()).collect(),
            payload,
        }
    }
}

/// Hooks the evaluator needs from the running executor.
#[async_trait]
pub trait BranchRunner: Send + Sync {
    /// Run every target connected to `port` one after another (not
    /// concurrently) and return each target's output, `None` for failures.
    async fn run_body(&self, port: &str, payload: Value) -> Vec<Option<Value>>;

    /// Record a non-fatal condition problem in the run log.
    fn warn(&self, message: String);
}

/// True for templates that drive a body branch.
pub fn is_loop(template_id: &str) -> bool {
    template_id == FOR_LOOP || template_id == WHILE_LOOP
}

/// Evaluate a condition node.
pub async fn evaluate(
    node: &Node,
    input: Value,
    runner: &dyn BranchRunner,
    limits: &ExecutorConfig,
) -> Result<NodeOutcome, EngineError> {
    match node.template_id.as_str() {
        IF_ELSE => Ok(if_else(node, input, runner)),
        SWITCH => switch(node, input, runner),
        FOR_LOOP => for_loop(node, input, runner).await,
        WHILE_LOOP => while_loop(node, input, runner, limits).await,
        MEMORY_ROUTER => router(node, input, runner),
        other => Err(EngineError::NodeExecution {
            node_id: node.id.clone(),
            message: format!("unknown condition template '{other}'"),
        }),
    }
}

/// Output port keys a branching node routes to under its current config:
/// `case1..caseN` for a switch, every rule output plus the default for a
/// router.  Malformed configs contribute nothing.
pub fn configured_outputs(node: &Node) -> Vec<String> {
    match node.template_id.as_str() {
        SWITCH => {
            let count = node.config.get("cases").and_then(Value::as_array).map_or(0, Vec::len);
            (1..=count).map(|n| format!("case{n}")).collect()
        }
        MEMORY_ROUTER => {
            let mut keys: Vec<String> = node
                .config
                .get("rules")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|rule| rule.get("output").and_then(Value::as_str))
                .map(str::to_owned)
                .collect();
            keys.extend(node.config_str("defaultOutput").map(str::to_owned));
            keys
        }
        _ => Vec::new(),
    }
}

/// Reject a route to a port the node does not have.
fn routed(node: &Node, port: String, input: Value) -> Result<NodeOutcome, EngineError> {
    if node.output(&port).is_none() {
        return Err(invalid_config(node, format!("no output port '{port}' for the selected route")));
    }
    Ok(NodeOutcome::single(port, input))
}

fn invalid_config(node: &Node, message: impl Into<String>) -> EngineError {
    EngineError::NodeExecution {
        node_id: node.id.clone(),
        message: format!("invalid config: {}", message.into()),
    }
}

/// Evaluate `source` as a predicate, treating errors as false.
fn predicate(source: &str, payload: &Value, runner: &dyn BranchRunner) -> bool {
    match expr::evaluate_bool(source, payload) {
        Ok(result) => result,
        Err(e) => {
            runner.warn(format!("condition '{source}' failed to evaluate, treating as false: {e}"));
            false
        }
    }
}

/// `{...input, extra}`; non-object inputs contribute no fields.
fn spread(input: &Value, extra: Map<String, Value>) -> Value {
    let mut out = match input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    out.extend(extra);
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// if-else
// ---------------------------------------------------------------------------

fn if_else(node: &Node, input: Value, runner: &dyn BranchRunner) -> NodeOutcome {
    let condition = node.config_str("condition").unwrap_or("false");
    let port = if predicate(condition, &input, runner) {
        "true"
    } else {
        "false"
    };
    NodeOutcome::single(port, input)
}

// ---------------------------------------------------------------------------
// switch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SwitchCase {
    value: Value,
}

fn switch(node: &Node, input: Value, runner: &dyn BranchRunner) -> Result<NodeOutcome, EngineError> {
    let cases: Vec<SwitchCase> = match node.config.get("cases") {
        None => Vec::new(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| invalid_config(node, format!("cases: {e}")))?,
    };

    let subject = match node.config_str("field") {
        Some(field) if !field.is_empty() => match expr::evaluate(field, &input) {
            Ok(v) => v,
            Err(e) => {
                runner.warn(format!("switch field '{field}' failed to evaluate: {e}"));
                return Ok(NodeOutcome::single("default", input));
            }
        },
        _ => input.clone(),
    };

    // First match wins; case order is authoritative.
    let port = cases
        .iter()
        .position(|case| case.value == subject)
        .map(|i| format!("case{}", i + 1))
        .unwrap_or_else(|| "default".to_owned());

    routed(node, port, input)
}

// ---------------------------------------------------------------------------
// for-loop
// ---------------------------------------------------------------------------

fn loop_items(node: &Node, input: &Value, runner: &dyn BranchRunner) -> Result<Vec<Value>, EngineError> {
    let source = match node.config_str("items") {
        Some(path) if !path.is_empty() => match expr::evaluate(path, input) {
            Ok(v) => v,
            Err(e) => {
                runner.warn(format!("for-loop items '{path}' failed to evaluate: {e}"));
                Value::Null
            }
        },
        _ => match input {
            Value::Array(_) => input.clone(),
            other => other.get("items").cloned().unwrap_or(Value::Null),
        },
    };

    match source {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(invalid_config(node, format!("for-loop needs an array, got {other}"))),
    }
}

/// Result of one iteration: the single target's output, every target's
/// output as an array, or the iteration payload when nothing is attached.
fn iteration_result(payload: Value, outputs: Vec<Option<Value>>) -> Value {
    let mut outputs: Vec<Value> = outputs.into_iter().map(|o| o.unwrap_or(Value::Null)).collect();
    match outputs.len() {
        0 => payload,
        1 => outputs.remove(0),
        _ => Value::Array(outputs),
    }
}

async fn for_loop(node: &Node, input: Value, runner: &dyn BranchRunner) -> Result<NodeOutcome, EngineError> {
    let items = loop_items(node, &input, runner)?;
    let mut results = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let mut extra = Map::new();
        extra.insert("item".into(), item);
        extra.insert("index".into(), json!(index));
        let payload = spread(&input, extra);

        let outputs = runner.run_body("item", payload.clone()).await;
        results.push(iteration_result(payload, outputs));
    }

    let mut extra = Map::new();
    extra.insert("count".into(), json!(results.len()));
    extra.insert("results".into(), Value::Array(results));
    Ok(NodeOutcome::single("complete", spread(&input, extra)))
}

// ---------------------------------------------------------------------------
// while-loop
// ---------------------------------------------------------------------------

async fn while_loop(
    node: &Node,
    input: Value,
    runner: &dyn BranchRunner,
    limits: &ExecutorConfig,
) -> Result<NodeOutcome, EngineError> {
    let condition = node.config_str("condition").unwrap_or("false").to_owned();
    let max_iterations = match node.config.get("maxIterations") {
        None | Some(Value::Null) => limits.max_while_iterations,
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| invalid_config(node, format!("maxIterations must be a non-negative integer in range, got {v}")))?,
    };

    let mut payload = input;
    let mut iterations = 0usize;

    while iterations < max_iterations && predicate(&condition, &payload, runner) {
        let mut extra = Map::new();
        extra.insert("iteration".into(), json!(iterations));
        let body_input = spread(&payload, extra);

        // Object outputs of the body accumulate into the payload.
        let mut next = body_input;
        for output in runner.run_body("loop", next.clone()).await.into_iter().flatten() {
            if let Value::Object(fields) = output {
                next = spread(&next, fields);
            }
        }
        payload = next;
        iterations += 1;
    }

    if iterations == max_iterations && max_iterations > 0 {
        runner.warn(format!("while-loop stopped at its cap of {max_iterations} iterations"));
    }

    let mut extra = Map::new();
    extra.insert("iterations".into(), json!(iterations));
    Ok(NodeOutcome::single("exit", spread(&payload, extra)))
}

// ---------------------------------------------------------------------------
// memory-router
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RouteRule {
    condition: String,
    output: String,
}

fn router(node: &Node, input: Value, runner: &dyn BranchRunner) -> Result<NodeOutcome, EngineError> {
    let rules: Vec<RouteRule> = match node.config.get("rules") {
        None => Vec::new(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| invalid_config(node, format!("rules: {e}")))?,
    };
    let default_output = node.config_str("defaultOutput").unwrap_or("default");

    let port = rules
        .iter()
        .find(|rule| predicate(&rule.condition, &input, runner))
        .map(|rule| rule.output.as_str())
        .unwrap_or(default_output)
        .to_owned();

    routed(node, port, input)
}
