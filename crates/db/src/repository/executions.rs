//! Execution record repository functions.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{models::ExecutionRow, DbError, DbPool};

/// Store a finished (or in-flight) execution record.
///
/// Re-inserting an existing execution id replaces the earlier row.
pub async fn insert_execution(
    pool: &DbPool,
    id: Uuid,
    graph_id: Uuid,
    status: &str,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    record: serde_json::Value,
) -> Result<ExecutionRow, DbError> {
    let row = ExecutionRow {
        id,
        graph_id,
        status: status.to_owned(),
        started_at,
        finished_at,
        record,
    };

    let mut executions = pool.executions.write().await;
    executions.retain(|existing| existing.id != id);
    executions.push(row.clone());

    Ok(row)
}

/// Fetch one execution by id.
pub async fn get_execution(pool: &DbPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    pool.executions
        .read()
        .await
        .iter()
        .find(|row| row.id == id)
        .cloned()
        .ok_or(DbError::NotFound)
}

/// All executions of one graph, most recent first.
pub async fn list_executions(pool: &DbPool, graph_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
    let mut rows: Vec<ExecutionRow> = pool
        .executions
        .read()
        .await
        .iter()
        .filter(|row| row.graph_id == graph_id)
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(rows)
}
