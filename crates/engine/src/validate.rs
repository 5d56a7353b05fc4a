//! Structural graph validation — run this before persisting or executing a graph.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the graph.
//! 2. Every connection must reference existing nodes and ports on both ends.
//! 3. An input port takes at most one connection, and connected ports must
//!    have the same type unless either side is `any`.
//!
//! Cycles are legal (loop bodies are driven by loop nodes, and recursion is
//! bounded by the executor), so they are reported rather than rejected.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::ValidationError;
use crate::models::{Connection, Endpoint, Graph, Port};
use crate::ports::is_valid_connection;
use crate::EngineError;

/// What validation learned about a well-formed graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    /// Trigger node IDs in graph order.
    pub triggers: Vec<String>,
    /// True when Kahn's algorithm could not order every node.
    pub has_cycle: bool,
}

/// Validate the graph's structure.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if a connection references a missing node.
/// - [`EngineError::UnknownPortReference`] if a connection references a missing port.
/// - [`EngineError::InvalidConnection`] if an input has several connections
///   or a connection joins incompatible types.
pub fn validate_graph(graph: &Graph) -> Result<GraphReport, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate connection endpoints
    // 3. One connection per input, compatible types
    // -----------------------------------------------------------------------
    let mut used_inputs: HashSet<(&str, &str)> = HashSet::new();
    for conn in &graph.connections {
        let source = endpoint_port(graph, conn, &conn.source, "source")?;
        let target = endpoint_port(graph, conn, &conn.target, "target")?;

        let invalid = |reason| EngineError::InvalidConnection {
            connection_id: conn.id.clone(),
            reason,
        };
        if !used_inputs.insert((conn.target.node_id.as_str(), conn.target.port_id.as_str())) {
            return Err(invalid(ValidationError::InputAlreadyConnected {
                node_id: conn.target.node_id.clone(),
                port_id: conn.target.port_id.clone(),
            }));
        }

        // The stored `connected` flag describes this very connection.
        let unclaimed = Port {
            connected: false,
            ..target.clone()
        };
        is_valid_connection(&conn.source.node_id, source, &conn.target.node_id, &unclaimed)
            .map_err(invalid)?;
    }

    Ok(GraphReport {
        triggers: graph.triggers().map(|n| n.id.clone()).collect(),
        has_cycle: topological_order(graph).is_none(),
    })
}

fn endpoint_port<'g>(
    graph: &'g Graph,
    conn: &Connection,
    endpoint: &Endpoint,
    side: &'static str,
) -> Result<&'g Port, EngineError> {
    let node = graph
        .node(&endpoint.node_id)
        .ok_or_else(|| EngineError::UnknownNodeReference {
            connection_id: conn.id.clone(),
            node_id: endpoint.node_id.clone(),
            side,
        })?;
    let ports = if side == "source" { &node.outputs } else { &node.inputs };
    ports
        .iter()
        .find(|p| p.id == endpoint.port_id)
        .ok_or_else(|| EngineError::UnknownPortReference {
            connection_id: conn.id.clone(),
            node_id: endpoint.node_id.clone(),
            port_id: endpoint.port_id.clone(),
        })
}

/// Kahn's algorithm over node-level edges; `None` if the graph has a cycle.
pub fn topological_order(graph: &Graph) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &graph.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for conn in &graph.connections {
        adjacency
            .entry(conn.source.node_id.as_str())
            .or_default()
            .push(conn.target.node_id.as_str());
        *in_degree.entry(conn.target.node_id.as_str()).or_insert(0) += 1;
    }

    // Seed in graph order so the result is stable.
    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(graph.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    (sorted.len() == graph.nodes.len()).then_some(sorted)
}
