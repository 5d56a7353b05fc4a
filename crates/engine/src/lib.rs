//! `engine` crate — graph model, editing service, condition evaluation and
//! the execution engine.

pub mod conditions;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod history;
pub mod logs;
pub mod models;
pub mod ports;
pub mod scheduler;
pub mod store;
pub mod subflow;
pub mod validate;

pub use conditions::NodeOutcome;
pub use config::{EngineConfig, ExecutorConfig};
pub use error::{EngineError, ValidationError};
pub use events::{EventBus, ExecutionEvent};
pub use executor::{builtin_registry, NodeRegistry, WorkflowExecutor};
pub use graph::{GraphEvent, GraphStore};
pub use logs::{export_logs, LogEntry, LogLevel};
pub use models::{Connection, Execution, ExecutionStatus, Graph, Node, NodeStatus, Port, Position, Subflow};
pub use ports::is_valid_connection;
pub use scheduler::{ScheduleEntry, ScheduleSpec, Scheduler};
pub use subflow::SubflowLibrary;
pub use validate::validate_graph;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod executor_tests;
