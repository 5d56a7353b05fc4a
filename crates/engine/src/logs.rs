//! Per-execution log entries and their export format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Execution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of an execution log, in the shape handed to external download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(
        execution_id: Uuid,
        node_id: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.map(str::to_owned),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        }
    }
}

/// Serialize an execution's logs as a pretty JSON array.
pub fn export_logs(execution: &Execution) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&execution.logs)
}
