//! Run progress events for subscribers (a canvas, a log tail, tests).

use uuid::Uuid;

use crate::models::ExecutionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted { execution_id: Uuid, graph_id: Uuid },
    NodeStarted { execution_id: Uuid, node_id: String },
    NodeSucceeded { execution_id: Uuid, node_id: String },
    NodeFailed { execution_id: Uuid, node_id: String, message: String },
    RunFinished { execution_id: Uuid, status: ExecutionStatus },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::default_event_capacity())
    }
}
