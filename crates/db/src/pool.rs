//! In-memory store shared across the application.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{ExecutionRow, GraphRow, SubflowRow};

/// One table per row type.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub(crate) graphs: RwLock<HashMap<Uuid, GraphRow>>,
    pub(crate) executions: RwLock<Vec<ExecutionRow>>,
    pub(crate) subflows: RwLock<HashMap<String, SubflowRow>>,
}

/// Type alias for the shared store handle used across the whole application.
pub type DbPool = Arc<MemoryStore>;

/// Create a new, empty store.
pub fn create_pool() -> DbPool {
    info!("Creating in-memory store");
    Arc::new(MemoryStore::default())
}
