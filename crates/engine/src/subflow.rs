//! Subflows: reusable subgraphs that run as a single composite node.
//!
//! A node with the `subflow` template names its definition in
//! `config.subflowId`.  Every invocation runs its own copy of the body in
//! a fresh `Execution`, so concurrent invocations never share state.
//!
//! ## Input/output mapping
//!
//! - `input_mapping` renames fields of the incoming payload before the
//!   body sees it (`{ "external": "internal" }`).
//! - The body's terminal node outputs become the node's payload: a single
//!   terminal output is used directly, several are keyed by node id.
//! - `output_mapping` renames fields of that payload (`{ "internal": "external" }`).
//!
//! ## Ports
//!
//! A definition without declared outputs fires every non-error output of the
//! composite node.  With declared outputs, each one fires when its
//! `output_sources` node ended the run (or always, when it has no source).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use db::DbPool;
use nodes::PortDirection;

use crate::executor::{Entry, WorkflowExecutor};
use crate::models::{Execution, ExecutionStatus, Graph, Node, Port, Position, Subflow};
use crate::EngineError;

pub const SUBFLOW_TEMPLATE: &str = "subflow";
pub const ERROR_PORT: &str = "error";

/// Subflow definitions available to an executor, by id.
#[derive(Debug, Clone, Default)]
pub struct SubflowLibrary {
    entries: HashMap<String, Arc<Subflow>>,
}

impl SubflowLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn register(&mut self, subflow: Subflow) {
        self.entries.insert(subflow.id.clone(), Arc::new(subflow));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subflow>> {
        self.entries.get(id).cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Subflow>> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load every stored definition.
    pub async fn load(pool: &DbPool) -> Result<Self, EngineError> {
        let mut library = Self::new();
        for row in db::repository::subflows::list_subflows(pool).await? {
            let subflow: Subflow = serde_json::from_value(row.definition)?;
            library.register(subflow);
        }
        info!("loaded {} subflow definition(s)", library.len());
        Ok(library)
    }

    /// Persist every definition.
    pub async fn save(&self, pool: &DbPool) -> Result<(), EngineError> {
        for subflow in self.entries.values() {
            db::repository::subflows::save_subflow(
                pool,
                &subflow.id,
                &subflow.name,
                subflow.reusable,
                serde_json::to_value(subflow.as_ref())?,
            )
            .await?;
        }
        Ok(())
    }
}

impl Subflow {
    /// A composite node for this definition: the catalog `subflow` node with
    /// fresh copies of the declared ports in place of its defaults.  The
    /// `error` port is always kept.
    pub fn instantiate(&self, position: Position) -> Result<Node, EngineError> {
        let template = nodes::catalog::find_template(SUBFLOW_TEMPLATE)
            .ok_or_else(|| EngineError::UnknownTemplate(SUBFLOW_TEMPLATE.to_owned()))?;
        let mut node = Node::from_template(template, position);
        node.title = self.name.clone();
        node.config.insert("subflowId".into(), Value::String(self.id.clone()));

        if !self.inputs.is_empty() {
            node.inputs = self
                .inputs
                .iter()
                .map(|p| Port {
                    direction: PortDirection::Input,
                    ..p.fresh_copy()
                })
                .collect();
        }
        if !self.outputs.is_empty() {
            let error = node.output(ERROR_PORT).cloned();
            node.outputs = self
                .outputs
                .iter()
                .filter(|p| p.key != ERROR_PORT)
                .map(|p| Port {
                    direction: PortDirection::Output,
                    ..p.fresh_copy()
                })
                .collect();
            node.outputs.extend(error);
        }
        Ok(node)
    }
}

/// What one subflow invocation produced.
#[derive(Debug, Clone)]
pub struct SubflowResult {
    pub payload: Value,
    /// Output ports of the composite node to activate.
    pub ports: Vec<String>,
    /// The nested run, independent of the caller's.
    pub execution: Execution,
}

/// Rename fields of an object payload; other payloads pass through.
pub fn apply_mapping(value: &Value, mapping: &BTreeMap<String, String>) -> Value {
    let Some(obj) = value.as_object() else {
        return value.clone();
    };
    let mut result = obj.clone();
    for (from, to) in mapping {
        if let Some(val) = result.remove(from) {
            result.insert(to.clone(), val);
        }
    }
    Value::Object(result)
}

/// Run the subflow named by `node` with `input`.
///
/// # Errors
/// Fails the composite node when the definition is missing or misused, or
/// when the nested run failed and the node has no `error` port.
#[instrument(skip(executor, graph, node, input), fields(node_id = %node.id))]
pub(crate) async fn execute_subflow(
    executor: &WorkflowExecutor,
    graph: &Graph,
    node: &Node,
    input: Value,
    depth: usize,
) -> Result<SubflowResult, EngineError> {
    let subflow_id = match node.config_str("subflowId") {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: "invalid config: subflowId is required".into(),
            })
        }
    };
    let definition = executor
        .subflows()
        .get(subflow_id)
        .ok_or_else(|| EngineError::SubflowNotFound(subflow_id.to_owned()))?;

    if !definition.reusable {
        let uses = graph
            .nodes
            .iter()
            .filter(|n| n.template_id == SUBFLOW_TEMPLATE && n.config_str("subflowId") == Some(subflow_id))
            .count();
        if uses > 1 {
            return Err(EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: format!("subflow '{subflow_id}' is not reusable but is used by {uses} nodes"),
            });
        }
    }

    // Private copy of the body for this invocation.
    let body = definition.to_graph();
    let mapped = apply_mapping(&input, &definition.input_mapping);
    debug!(subflow_id, nested_graph = %body.id, "invoking subflow");

    let output = executor.run_scoped(&body, mapped, depth + 1, Entry::TriggersOrRoots).await;
    let execution = output.execution;

    if execution.status == ExecutionStatus::Failed {
        let messages: Vec<&str> = execution.errors.iter().map(|e| e.message.as_str()).collect();
        if node.output(ERROR_PORT).is_none() {
            return Err(EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: format!(
                    "subflow '{subflow_id}' failed: {}",
                    messages.first().copied().unwrap_or("unknown error")
                ),
            });
        }
        let payload = json!({
            "error": messages.first().copied().unwrap_or("unknown error"),
            "errors": messages,
            "input": input,
        });
        return Ok(SubflowResult {
            payload,
            ports: vec![ERROR_PORT.to_owned()],
            execution,
        });
    }

    let reached: HashSet<String> = output.terminal.iter().map(|(id, _)| id.clone()).collect();
    let ports = external_ports(node, &definition, &reached)?;

    let raw = if output.terminal.len() == 1 {
        output.terminal.into_iter().next().map(|(_, v)| v).unwrap_or_else(|| json!({}))
    } else {
        Value::Object(output.terminal.into_iter().collect::<Map<String, Value>>())
    };
    let payload = apply_mapping(&raw, &definition.output_mapping);

    Ok(SubflowResult {
        payload,
        ports,
        execution,
    })
}

/// Output ports to fire after a successful nested run that ended on the
/// body nodes in `reached`.
fn external_ports(
    node: &Node,
    definition: &Subflow,
    reached: &HashSet<String>,
) -> Result<Vec<String>, EngineError> {
    if definition.outputs.is_empty() {
        return Ok(node
            .outputs
            .iter()
            .filter(|p| p.key != ERROR_PORT)
            .map(|p| p.key.clone())
            .collect());
    }

    let mut ports = Vec::new();
    for declared in definition.outputs.iter().filter(|p| p.key != ERROR_PORT) {
        let fires = definition
            .output_sources
            .get(&declared.key)
            .map_or(true, |source| reached.contains(source));
        if !fires {
            continue;
        }
        if node.output(&declared.key).is_none() {
            return Err(EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: format!(
                    "invalid config: node has no output '{}' declared by subflow '{}'",
                    declared.key, definition.id
                ),
            });
        }
        ports.push(declared.key.clone());
    }
    Ok(ports)
}
