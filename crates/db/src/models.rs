//! Row structs kept by the store.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate and are stored here as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// graphs
// ---------------------------------------------------------------------------

/// A persisted graph definition row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRow {
    pub id: Uuid,
    pub name: String,
    /// Full JSON graph definition (nodes, connections, …)
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// A persisted execution row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The full JSON execution record, logs included.
    pub record: serde_json::Value,
}

// ---------------------------------------------------------------------------
// subflows
// ---------------------------------------------------------------------------

/// A persisted subflow library entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowRow {
    pub id: String,
    pub name: String,
    pub reusable: bool,
    pub definition: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
