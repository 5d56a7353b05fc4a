//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a graph looks like in
//! memory.  They serialise to/from the JSON `definition` stored by the `db`
//! crate.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use nodes::{NodeKind, NodeTemplate, PortDirection};

use crate::logs::LogEntry;

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// A typed connection point on a node instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Unique per instance; never shared with the template or another node.
    pub id: String,
    /// Template port name (`true`, `item`, `output`, …).
    pub key: String,
    pub direction: PortDirection,
    pub data_type: String,
    #[serde(default)]
    pub connected: bool,
}

impl Port {
    pub fn accepts_any(&self) -> bool {
        self.data_type == nodes::catalog::ANY
    }

    /// Same key, direction and type under a new id, disconnected.
    pub fn fresh_copy(&self) -> Self {
        Self {
            id: fresh_id(),
            connected: false,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// A node instance inside a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Catalog id this node was built from; drives dispatch.
    pub template_id: String,
    pub kind: NodeKind,
    pub title: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub position: Position,
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

impl Node {
    /// Instantiate a template by value: fresh node id, fresh port ids and a
    /// private copy of the default config.
    pub fn from_template(template: &NodeTemplate, position: Position) -> Self {
        let ports = |direction: PortDirection| -> Vec<Port> {
            template
                .ports
                .iter()
                .filter(|p| p.direction == direction)
                .map(|p| Port {
                    id: fresh_id(),
                    key: p.key.clone(),
                    direction: p.direction,
                    data_type: p.data_type.clone(),
                    connected: false,
                })
                .collect()
        };

        let mut node = Self {
            id: fresh_id(),
            template_id: template.id.clone(),
            kind: template.kind,
            title: template.title.clone(),
            config: template.default_config.clone(),
            inputs: ports(PortDirection::Input),
            outputs: ports(PortDirection::Output),
            status: NodeStatus::Idle,
            position,
        };
        node.sync_config_ports();
        node
    }

    /// Add an `any` output port for every route the config names that the
    /// node does not have yet.  Existing ports are kept so their connections
    /// survive.
    pub fn sync_config_ports(&mut self) {
        for key in crate::conditions::configured_outputs(self) {
            if self.output(&key).is_none() {
                self.outputs.push(Port {
                    id: fresh_id(),
                    key,
                    direction: PortDirection::Output,
                    data_type: nodes::catalog::ANY.to_owned(),
                    connected: false,
                });
            }
        }
    }

    /// A copy with new node and port ids, all ports disconnected.
    pub fn duplicate(&self, offset: (f64, f64)) -> Self {
        let reset = |ports: &[Port]| -> Vec<Port> { ports.iter().map(Port::fresh_copy).collect() };

        Self {
            id: fresh_id(),
            title: format!("{} (copy)", self.title),
            inputs: reset(&self.inputs),
            outputs: reset(&self.outputs),
            status: NodeStatus::Idle,
            position: self.position.offset(offset.0, offset.1),
            ..self.clone()
        }
    }

    /// Find a port by instance id or by template key.
    pub fn port(&self, reference: &str) -> Option<&Port> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|p| p.id == reference)
            .or_else(|| {
                self.inputs
                    .iter()
                    .chain(self.outputs.iter())
                    .find(|p| p.key == reference)
            })
    }

    pub fn output(&self, key: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.key == key)
    }

    pub fn input(&self, key: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.key == key)
    }

    pub(crate) fn ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.inputs.iter_mut().chain(self.outputs.iter_mut())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node_id: String,
    pub port_id: String,
}

/// Directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: Endpoint,
    pub target: Endpoint,
    pub data_type: String,
}

impl Connection {
    pub fn new(source: Endpoint, target: Endpoint, data_type: impl Into<String>) -> Self {
        Self {
            id: fresh_id(),
            source,
            target,
            data_type: data_type.into(),
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source.node_id == node_id || self.target.node_id == node_id
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A complete graph definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Trigger)
    }

    /// Connections leaving `(node_id, port_id)`, in insertion order.
    pub fn outgoing<'a>(
        &'a self,
        node_id: &'a str,
        port_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source.node_id == node_id && c.source.port_id == port_id)
    }

    /// Recompute every port's `connected` flag from the connection list.
    pub(crate) fn refresh_port_flags(&mut self) {
        let used: HashSet<(&str, &str)> = self
            .connections
            .iter()
            .flat_map(|c| {
                [
                    (c.source.node_id.as_str(), c.source.port_id.as_str()),
                    (c.target.node_id.as_str(), c.target.port_id.as_str()),
                ]
            })
            .collect();

        for node in self.nodes.iter_mut() {
            let node_id = node.id.clone();
            for port in node.ports_mut() {
                port.connected = used.contains(&(node_id.as_str(), port.id.as_str()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// One failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// `None` for engine-level failures that belong to no node.
    pub node_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The record of one run of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Node ids in the order they were entered; one entry per activation.
    pub executed_nodes: Vec<String>,
    pub errors: Vec<ExecutionError>,
    /// Last status reached by each node during this run.
    #[serde(default)]
    pub node_states: BTreeMap<String, NodeStatus>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Execution {
    pub fn start(graph_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            graph_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            executed_nodes: Vec::new(),
            errors: Vec::new(),
            node_states: BTreeMap::new(),
            logs: Vec::new(),
        }
    }

    pub(crate) fn record_error(&mut self, node_id: Option<&str>, message: impl Into<String>) {
        self.errors.push(ExecutionError {
            node_id: node_id.map(str::to_owned),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Close the record: `failed` whenever any error was recorded.
    pub(crate) fn finish(&mut self) {
        self.status = if self.errors.is_empty() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Subflow
// ---------------------------------------------------------------------------

/// A reusable subgraph exposed as one composite node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subflow {
    pub id: String,
    pub name: String,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
    /// External field name → internal field name.
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    /// Internal field name → external field name.
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
    /// Declared output key → body node whose terminal output fires it.
    /// Declared outputs without a source fire on every successful run.
    #[serde(default)]
    pub output_sources: BTreeMap<String, String>,
    #[serde(default = "default_reusable")]
    pub reusable: bool,
}

fn default_reusable() -> bool {
    true
}

impl Subflow {
    /// Materialise the body as a standalone graph owned by the caller.
    pub fn to_graph(&self) -> Graph {
        Graph {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
