//! Undo/redo history built from immutable `{nodes, connections}` snapshots.

use crate::models::{Connection, Graph, Node};

/// The editable part of a graph at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

impl Snapshot {
    pub fn of(graph: &Graph) -> Self {
        Self {
            nodes: graph.nodes.clone(),
            connections: graph.connections.clone(),
        }
    }

    pub(crate) fn restore_into(self, graph: &mut Graph) {
        graph.nodes = self.nodes;
        graph.connections = self.connections;
    }
}

/// Undo and redo stacks.
///
/// A snapshot of the state *before* each mutation is pushed onto the undo
/// stack; any new mutation clears the redo stack.
#[derive(Debug)]
pub struct History {
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Record the state before a mutation.
    pub fn record(&mut self, before: Snapshot) {
        self.push_undo(before);
        self.redo.clear();
    }

    fn push_undo(&mut self, snapshot: Snapshot) {
        self.undo.push(snapshot);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
    }

    /// Swap `current` onto the redo stack and return the state to restore.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.undo.pop()?;
        self.redo.push(current);
        Some(previous)
    }

    /// Mirror of [`History::undo`].
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.redo.pop()?;
        self.push_undo(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}
