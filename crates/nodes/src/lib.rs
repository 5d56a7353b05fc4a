//! `nodes` crate — the node template catalog, the `ExecutableNode` delegate
//! trait and built-in data node implementations.
//!
//! The engine crate instantiates graph nodes from [`catalog`] templates and
//! dispatches action/data nodes through [`ExecutableNode`] trait objects.

pub mod builtin;
pub mod catalog;
pub mod error;
pub mod mock;
pub mod traits;

pub use catalog::{Category, NodeKind, NodeTemplate, PortDirection, PortTemplate};
pub use error::NodeError;
pub use traits::{ExecutableNode, ExecutionContext};
