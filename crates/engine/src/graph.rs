//! The graph store: command methods over a [`Graph`] with undo/redo history
//! and change events.
//!
//! Every editing command snapshots `{nodes, connections}` before it mutates
//! anything.  Engine status updates go through
//! [`GraphStore::apply_execution`], which touches nodes by id and is not
//! recorded in history.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use nodes::NodeTemplate;

use crate::error::{EngineError, ValidationError};
use crate::history::{History, Snapshot};
use crate::models::{Connection, Endpoint, Execution, Graph, Node, Position, Subflow};
use crate::ports::{connection_type, is_valid_connection};

/// Offset applied to a duplicated node's position.
pub const DUPLICATE_OFFSET: (f64, f64) = (40.0, 40.0);

/// Change notifications for subscribers such as a canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodeAdded(String),
    NodeRemoved(String),
    NodeUpdated(String),
    Connected(String),
    Disconnected(String),
    /// The whole graph was replaced by an undo or redo.
    Restored,
    StatusesApplied,
}

pub struct GraphStore {
    graph: Graph,
    history: History,
    events: broadcast::Sender<GraphEvent>,
}

impl GraphStore {
    pub fn new(graph: Graph) -> Self {
        Self::with_history_limit(graph, 100)
    }

    pub fn with_history_limit(graph: Graph, limit: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            graph,
            history: History::new(limit),
            events,
        }
    }

    /// Read-only view of the current graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// An owned copy, e.g. for handing to the executor or the store.
    pub fn snapshot(&self) -> Graph {
        self.graph.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: GraphEvent) {
        // Ignore error if no receivers
        let _ = self.events.send(event);
    }

    fn checkpoint(&mut self) {
        self.history.record(Snapshot::of(&self.graph));
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Instantiate `template` at `position` and return the new node's id.
    pub fn add_node(&mut self, template: &NodeTemplate, position: Position) -> String {
        self.checkpoint();
        let node = Node::from_template(template, position);
        let id = node.id.clone();
        self.graph.nodes.push(node);
        debug!(node_id = %id, template = %template.id, "node added");
        self.emit(GraphEvent::NodeAdded(id.clone()));
        id
    }

    /// Look up a catalog template by id and add it.
    pub fn add_node_from_catalog(
        &mut self,
        template_id: &str,
        position: Position,
    ) -> Result<String, EngineError> {
        let template = nodes::catalog::find_template(template_id)
            .ok_or_else(|| EngineError::UnknownTemplate(template_id.to_owned()))?;
        Ok(self.add_node(template, position))
    }

    /// Add a composite node for `subflow`, carrying its declared ports.
    pub fn add_subflow_node(&mut self, subflow: &Subflow, position: Position) -> Result<String, EngineError> {
        let node = subflow.instantiate(position)?;
        self.checkpoint();
        let id = node.id.clone();
        self.graph.nodes.push(node);
        debug!(node_id = %id, subflow_id = %subflow.id, "subflow node added");
        self.emit(GraphEvent::NodeAdded(id.clone()));
        Ok(id)
    }

        /// Remove a node together with every connection touching it.
    pub fn remove_node(&mut self, node_id: &str) -> Result<Node, EngineError> {
        let index = self
            .graph
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_owned()))?;

        self.checkpoint();
        let removed = self.graph.nodes.remove(index);
        self.graph.connections.retain(|c| !c.touches(node_id));
        self.graph.refresh_port_flags();
        debug!(node_id, "node removed");
        self.emit(GraphEvent::NodeRemoved(node_id.to_owned()));
        Ok(removed)
    }

    /// Copy a node under a new id with no connections.
    pub fn duplicate_node(&mut self, node_id: &str) -> Result<String, EngineError> {
        let copy = self
            .graph
            .node(node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_owned()))?
            .duplicate(DUPLICATE_OFFSET);

        self.checkpoint();
        let id = copy.id.clone();
        self.graph.nodes.push(copy);
        self.emit(GraphEvent::NodeAdded(id.clone()));
        Ok(id)
    }

    /// Set one config key.  Switch cases and router rules add the output
    /// ports they route to.
    pub fn update_node_config(
        &mut self,
        node_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        if self.graph.node(node_id).is_none() {
            return Err(EngineError::NodeNotFound(node_id.to_owned()));
        }
        self.checkpoint();
        if let Some(node) = self.graph.node_mut(node_id) {
            node.config.insert(key.to_owned(), value);
            node.sync_config_ports();
        }
        self.emit(GraphEvent::NodeUpdated(node_id.to_owned()));
        Ok(())
    }

    pub fn update_node_title(&mut self, node_id: &str, title: &str) -> Result<(), EngineError> {
        if self.graph.node(node_id).is_none() {
            return Err(EngineError::NodeNotFound(node_id.to_owned()));
        }
        self.checkpoint();
        if let Some(node) = self.graph.node_mut(node_id) {
            node.title = title.to_owned();
        }
        self.emit(GraphEvent::NodeUpdated(node_id.to_owned()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Connect an output port to an input port.  Ports may be named by
    /// instance id or template key.
    ///
    /// An invalid request leaves the graph and its history untouched and is
    /// reported through the returned error.
    pub fn connect(
        &mut self,
        source_node: &str,
        source_port: &str,
        target_node: &str,
        target_port: &str,
    ) -> Result<Connection, ValidationError> {
        let result = self.resolve_connection(source_node, source_port, target_node, target_port);
        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                warn!(source_node, target_node, error = %e, "connection rejected");
                return Err(e);
            }
        };

        self.checkpoint();
        self.graph.connections.push(conn.clone());
        for endpoint in [&conn.source, &conn.target] {
            if let Some(node) = self.graph.node_mut(&endpoint.node_id) {
                for port in node.ports_mut().filter(|p| p.id == endpoint.port_id) {
                    port.connected = true;
                }
            }
        }
        self.emit(GraphEvent::Connected(conn.id.clone()));
        Ok(conn)
    }

    fn resolve_connection(
        &self,
        source_node: &str,
        source_port: &str,
        target_node: &str,
        target_port: &str,
    ) -> Result<Connection, ValidationError> {
        let lookup = |node_id: &str, port: &str| {
            let node = self
                .graph
                .node(node_id)
                .ok_or_else(|| ValidationError::UnknownNode(node_id.to_owned()))?;
            node.port(port)
                .cloned()
                .ok_or_else(|| ValidationError::UnknownPort {
                    node_id: node_id.to_owned(),
                    port: port.to_owned(),
                })
        };

        let src = lookup(source_node, source_port)?;
        let dst = lookup(target_node, target_port)?;
        is_valid_connection(source_node, &src, target_node, &dst)?;

        Ok(Connection::new(
            Endpoint {
                node_id: source_node.to_owned(),
                port_id: src.id.clone(),
            },
            Endpoint {
                node_id: target_node.to_owned(),
                port_id: dst.id.clone(),
            },
            connection_type(&src, &dst),
        ))
    }

    pub fn disconnect(&mut self, connection_id: &str) -> Result<Connection, EngineError> {
        let index = self
            .graph
            .connections
            .iter()
            .position(|c| c.id == connection_id)
            .ok_or_else(|| EngineError::ConnectionNotFound(connection_id.to_owned()))?;

        self.checkpoint();
        let removed = self.graph.connections.remove(index);
        self.graph.refresh_port_flags();
        self.emit(GraphEvent::Disconnected(connection_id.to_owned()));
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Restore the state before the last mutation.  Returns false when there
    /// is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.history.undo(Snapshot::of(&self.graph)) {
            Some(previous) => {
                previous.restore_into(&mut self.graph);
                self.emit(GraphEvent::Restored);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(Snapshot::of(&self.graph)) {
            Some(next) => {
                next.restore_into(&mut self.graph);
                self.emit(GraphEvent::Restored);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // -----------------------------------------------------------------------
    // Engine feedback
    // -----------------------------------------------------------------------

    /// Copy each node's final status from a run into the graph, per node id.
    /// Nodes removed while the run was in flight are skipped.
    pub fn apply_execution(&mut self, execution: &Execution) {
        for (node_id, status) in &execution.node_states {
            if let Some(node) = self.graph.node_mut(node_id) {
                node.status = *status;
            }
        }
        self.emit(GraphEvent::StatusesApplied);
    }
}
