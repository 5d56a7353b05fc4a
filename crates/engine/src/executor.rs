//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the graph and finds its trigger nodes.
//! 2. Runs every trigger concurrently and joins them.
//! 3. For each node: marks it running, runs its kind-specific logic, then
//!    follows the connections of every active output port.
//! 4. Sibling branches are joined fail-soft: each records its own outcome
//!    and one failure never cancels the others.
//! 5. Records node states, errors and logs on the returned `Execution`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::{ExecutableNode, ExecutionContext, NodeKind};

use crate::conditions::{self, BranchRunner, NodeOutcome};
use crate::config::ExecutorConfig;
use crate::events::{EventBus, ExecutionEvent};
use crate::logs::{LogEntry, LogLevel};
use crate::models::{Execution, Graph, Node, NodeStatus};
use crate::subflow::{self, SubflowLibrary, SUBFLOW_TEMPLATE};
use crate::validate::validate_graph;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Node registry
// ---------------------------------------------------------------------------

/// Maps template ids to `ExecutableNode` implementations.
pub type NodeRegistry = HashMap<String, Arc<dyn ExecutableNode>>;

/// Registry pre-populated with the built-in data nodes.
pub fn builtin_registry() -> NodeRegistry {
    nodes::builtin::builtins()
        .into_iter()
        .map(|(id, node)| (id.to_owned(), node))
        .collect()
}

// ---------------------------------------------------------------------------
// Output of a run
// ---------------------------------------------------------------------------

/// A finished run plus the payloads of the nodes it ended on.
#[derive(Debug)]
pub(crate) struct RunOutput {
    pub execution: Execution,
    /// `(node_id, payload)` for every activation that had nowhere to go.
    pub terminal: Vec<(String, Value)>,
}

/// Where a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// Trigger nodes only; a graph without triggers runs nothing.
    Triggers,
    /// Trigger nodes, or every node without incoming connections if none.
    TriggersOrRoots,
}

fn root_nodes(graph: &Graph) -> Vec<String> {
    graph
        .nodes
        .iter()
        .filter(|n| !graph.connections.iter().any(|c| c.target.node_id == n.id))
        .map(|n| n.id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator; one instance can serve many concurrent runs.
pub struct WorkflowExecutor {
    registry: NodeRegistry,
    subflows: SubflowLibrary,
    config: ExecutorConfig,
    events: Option<Arc<EventBus>>,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(registry: NodeRegistry, config: ExecutorConfig) -> Self {
        Self {
            registry,
            subflows: SubflowLibrary::default(),
            config,
            events: None,
        }
    }

    pub fn with_subflows(mut self, subflows: SubflowLibrary) -> Self {
        self.subflows = subflows;
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Register (or replace) the implementation for `template_id`.
    pub fn register(&mut self, template_id: impl Into<String>, node: Arc<dyn ExecutableNode>) {
        self.registry.insert(template_id.into(), node);
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn subflows(&self) -> &SubflowLibrary {
        &self.subflows
    }

    pub fn subflows_mut(&mut self) -> &mut SubflowLibrary {
        &mut self.subflows
    }

    /// Run the graph with an empty trigger payload.
    pub async fn run(&self, graph: &Graph) -> Execution {
        self.run_with_input(graph, json!({})).await
    }

    /// Run the graph, handing `input` to every trigger.
    ///
    /// Never returns an error: problems are recorded on the `Execution`,
    /// whose status is `failed` whenever any were.
    #[instrument(skip(self, graph, input), fields(graph_id = %graph.id))]
    pub async fn run_with_input(&self, graph: &Graph, input: Value) -> Execution {
        self.run_scoped(graph, input, 0, Entry::Triggers).await.execution
    }

    /// Run a single node's logic with `input`, without a trigger and without
    /// following any of its connections.  Loop bodies are empty.
    #[instrument(skip(self, node, input), fields(node_id = %node.id, template = %node.template_id))]
    pub async fn test_node(&self, node: &Node, input: Value) -> Result<NodeOutcome, EngineError> {
        let graph = Graph {
            nodes: vec![node.clone()],
            ..Graph::new("node test")
        };
        let run = Run::new(self, &graph, Execution::start(graph.id));
        run.execute_kind(node, input, 0).await
    }

    /// Run the graph with synthetic input.  Graphs without triggers start
    /// from every node that has no incoming connection instead.
    #[instrument(skip(self, graph, input), fields(graph_id = %graph.id))]
    pub async fn test_graph(&self, graph: &Graph, input: Value) -> Execution {
        self.run_scoped(graph, input, 0, Entry::TriggersOrRoots).await.execution
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    pub(crate) async fn run_scoped(&self, graph: &Graph, input: Value, depth: usize, entry: Entry) -> RunOutput {
        let report = match validate_graph(graph) {
            Ok(report) => report,
            Err(e) => {
                let mut execution = Execution::start(graph.id);
                error!(execution_id = %execution.id, "graph validation failed: {}", e);
                self.publish(ExecutionEvent::RunStarted {
                    execution_id: execution.id,
                    graph_id: graph.id,
                });
                execution.logs.push(LogEntry::new(
                    execution.id,
                    None,
                    LogLevel::Error,
                    format!("graph validation failed: {e}"),
                    None,
                ));
                execution.record_error(None, e.to_string());
                execution.finish();
                self.publish(ExecutionEvent::RunFinished {
                    execution_id: execution.id,
                    status: execution.status,
                });
                return RunOutput {
                    execution,
                    terminal: Vec::new(),
                };
            }
        };

        if report.has_cycle {
            debug!("graph {} contains a cycle; activations are bounded by max_depth", graph.id);
        }
        let starts = match entry {
            Entry::TriggersOrRoots if report.triggers.is_empty() => root_nodes(graph),
            _ => report.triggers,
        };
        if starts.is_empty() {
            info!("graph {} has no entry nodes; nothing to run", graph.id);
        }

        self.run_from(graph, starts, input, depth).await
    }

    async fn run_from(&self, graph: &Graph, starts: Vec<String>, input: Value, depth: usize) -> RunOutput {
        let execution = Execution::start(graph.id);
        let execution_id = execution.id;
        self.publish(ExecutionEvent::RunStarted {
            execution_id,
            graph_id: graph.id,
        });
        info!(%execution_id, "starting run of graph '{}' from {} node(s)", graph.name, starts.len());

        let run = Run::new(self, graph, execution);
        let branches = starts
            .into_iter()
            .map(|id| run.visit(id, input.clone(), depth));

        // Delegate panics are caught per node; this catches engine panics.
        let joined = AssertUnwindSafe(join_all(branches)).catch_unwind().await;
        if joined.is_err() {
            error!(%execution_id, "a node panicked; marking the run failed");
            run.log(None, LogLevel::Error, "a node panicked during execution".into(), None);
            run.state().record_error(None, "a node panicked during execution");
        }

        let RunOutput { mut execution, terminal } = run.into_output();
        execution.finish();
        info!(
            %execution_id,
            status = %execution.status,
            executed = execution.executed_nodes.len(),
            errors = execution.errors.len(),
            "run finished"
        );
        self.publish(ExecutionEvent::RunFinished {
            execution_id,
            status: execution.status,
        });
        RunOutput { execution, terminal }
    }

    fn publish(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Mutable state of one run.  Only touched through short, per-id updates;
/// the lock is never held across an await.
struct Run<'a> {
    executor: &'a WorkflowExecutor,
    graph: &'a Graph,
    execution_id: Uuid,
    execution: Mutex<Execution>,
    terminal: Mutex<Vec<(String, Value)>>,
}

impl<'a> Run<'a> {
    fn new(executor: &'a WorkflowExecutor, graph: &'a Graph, execution: Execution) -> Self {
        Self {
            executor,
            graph,
            execution_id: execution.id,
            execution: Mutex::new(execution),
            terminal: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, Execution> {
        self.execution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn into_output(self) -> RunOutput {
        RunOutput {
            execution: self.execution.into_inner().unwrap_or_else(PoisonError::into_inner),
            terminal: self.terminal.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn log(&self, node_id: Option<&str>, level: LogLevel, message: String, data: Option<Value>) {
        let node = node_id.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(execution_id = %self.execution_id, node_id = node, "{}", message),
            LogLevel::Info => info!(execution_id = %self.execution_id, node_id = node, "{}", message),
            LogLevel::Warn => warn!(execution_id = %self.execution_id, node_id = node, "{}", message),
            LogLevel::Error => error!(execution_id = %self.execution_id, node_id = node, "{}", message),
        }
        let entry = LogEntry::new(self.execution_id, node_id, level, message, data);
        self.state().logs.push(entry);
    }

    fn set_status(&self, node_id: &str, status: NodeStatus) {
        self.state().node_states.insert(node_id.to_owned(), status);
    }

    fn fail(&self, node_id: &str, err: &EngineError) {
        let message = err.to_string();
        {
            let mut state = self.state();
            state.node_states.insert(node_id.to_owned(), NodeStatus::Error);
            state.record_error(Some(node_id), message.clone());
        }
        self.log(Some(node_id), LogLevel::Error, message.clone(), None);
        self.executor.publish(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node_id: node_id.to_owned(),
            message,
        });
    }

    /// Execute one activation of `node_id` and everything downstream of it.
    /// Resolves to the node's payload, or `None` if the node failed.
    fn visit<'s>(&'s self, node_id: String, input: Value, depth: usize) -> BoxFuture<'s, Option<Value>> {
        async move {
            let Some(node) = self.graph.node(&node_id) else {
                self.fail(&node_id, &EngineError::NodeNotFound(node_id.clone()));
                return None;
            };

            if depth >= self.executor.config.max_depth {
                self.fail(&node.id, &EngineError::DepthExceeded(self.executor.config.max_depth));
                return None;
            }

            {
                let mut state = self.state();
                state.node_states.insert(node.id.clone(), NodeStatus::Running);
                state.executed_nodes.push(node.id.clone());
            }
            self.executor.publish(ExecutionEvent::NodeStarted {
                execution_id: self.execution_id,
                node_id: node.id.clone(),
            });
            self.log(
                Some(&node.id),
                LogLevel::Info,
                format!("node '{}' ({}) started", node.title, node.template_id),
                None,
            );

            // Let sibling branches interleave.
            tokio::task::yield_now().await;

            let outcome = match self.execute_kind(node, input, depth).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.fail(&node.id, &e);
                    return None;
                }
            };

            self.set_status(&node.id, NodeStatus::Success);
            self.executor.publish(ExecutionEvent::NodeSucceeded {
                execution_id: self.execution_id,
                node_id: node.id.clone(),
            });
            self.log(
                Some(&node.id),
                LogLevel::Info,
                format!("node '{}' finished", node.title),
                Some(json!({ "ports": outcome.ports })),
            );

            self.follow(node, &outcome, depth).await;
            Some(outcome.payload)
        }
        .boxed()
    }

    /// Run every connection leaving the active ports, joined fail-soft.
    async fn follow(&self, node: &Node, outcome: &NodeOutcome, depth: usize) {
        let mut branches = Vec::new();
        for key in &outcome.ports {
            let Some(port) = node.output(key) else {
                self.log(
                    Some(&node.id),
                    LogLevel::Warn,
                    format!("node '{}' has no output port '{}'", node.title, key),
                    None,
                );
                continue;
            };
            for conn in self.graph.outgoing(&node.id, &port.id) {
                branches.push(self.visit(conn.target.node_id.clone(), outcome.payload.clone(), depth + 1));
            }
        }

        if branches.is_empty() {
            self.terminal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((node.id.clone(), outcome.payload.clone()));
            return;
        }
        join_all(branches).await;
    }

    /// Kind-specific logic for one node.
    async fn execute_kind(&self, node: &Node, input: Value, depth: usize) -> Result<NodeOutcome, EngineError> {
        match node.kind {
            NodeKind::Trigger => Ok(NodeOutcome::all(node, input)),

            NodeKind::Condition => {
                if conditions::is_loop(&node.template_id) {
                    self.set_status(&node.id, NodeStatus::Waiting);
                }
                let scope = NodeScope { run: self, node, depth };
                conditions::evaluate(node, input, &scope, &self.executor.config).await
            }

            NodeKind::Action | NodeKind::Data if node.template_id == SUBFLOW_TEMPLATE => {
                let result = subflow::execute_subflow(self.executor, self.graph, node, input, depth).await?;
                self.log(
                    Some(&node.id),
                    LogLevel::Info,
                    format!("subflow run {} finished as {}", result.execution.id, result.execution.status),
                    Some(json!({
                        "subflowExecutionId": result.execution.id,
                        "status": result.execution.status,
                        "executedNodes": result.execution.executed_nodes.len(),
                    })),
                );
                Ok(NodeOutcome {
                    ports: result.ports,
                    payload: result.payload,
                })
            }

            NodeKind::Action | NodeKind::Data => {
                let output = self.delegate(node, input).await?;
                Ok(NodeOutcome::all(node, output))
            }
        }
    }

    /// Call the registered implementation under the per-node timeout.  A
    /// panic inside it fails this node only.
    async fn delegate(&self, node: &Node, input: Value) -> Result<Value, EngineError> {
        let handler = self.executor.registry.get(&node.template_id).ok_or_else(|| {
            EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: format!("no implementation registered for template '{}'", node.template_id),
            }
        })?;

        let ctx = ExecutionContext {
            graph_id: self.graph.id,
            execution_id: self.execution_id,
            node_id: node.id.clone(),
            template_id: node.template_id.clone(),
            config: node.config.clone(),
        };

        let after = self.executor.config.node_timeout;
        let call = AssertUnwindSafe(handler.execute(input, &ctx)).catch_unwind();
        match tokio::time::timeout(after, call).await {
            Err(_) => Err(EngineError::Timeout {
                node_id: node.id.clone(),
                after,
            }),
            Ok(Err(_)) => Err(EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: "implementation panicked".into(),
            }),
            Ok(Ok(Err(e))) => Err(EngineError::NodeExecution {
                node_id: node.id.clone(),
                message: e.to_string(),
            }),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }
}

// ---------------------------------------------------------------------------
// Loop bodies
// ---------------------------------------------------------------------------

/// A condition node's view of the run, used to drive its body branch.
struct NodeScope<'r, 'a> {
    run: &'r Run<'a>,
    node: &'r Node,
    depth: usize,
}

#[async_trait]
impl<'r, 'a: 'r> BranchRunner for NodeScope<'r, 'a> {
    async fn run_body(&self, port: &str, payload: Value) -> Vec<Option<Value>> {
        let Some(port) = self.node.output(port) else {
            return Vec::new();
        };
        let targets: Vec<String> = self
            .run
            .graph
            .outgoing(&self.node.id, &port.id)
            .map(|c| c.target.node_id.clone())
            .collect();

        let mut outputs = Vec::with_capacity(targets.len());
        for target in targets {
            outputs.push(self.run.visit(target, payload.clone(), self.depth + 1).await);
        }
        outputs
    }

    fn warn(&self, message: String) {
        self.run.log(Some(&self.node.id), LogLevel::Warn, message, None);
    }
}
