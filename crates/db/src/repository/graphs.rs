//! Graph CRUD operations.

use chrono::Utc;
use uuid::Uuid;

use crate::{models::GraphRow, DbError, DbPool};

/// Insert or replace a graph definition.
///
/// `definition` must be a valid JSON object produced by serialising the
/// domain `Graph` type from the `engine` crate.  Re-saving an existing id
/// keeps its original `created_at`.
pub async fn save_graph(
    pool: &DbPool,
    id: Uuid,
    name: &str,
    definition: serde_json::Value,
) -> Result<GraphRow, DbError> {
    let now = Utc::now();
    let mut graphs = pool.graphs.write().await;

    let created_at = graphs.get(&id).map(|row| row.created_at).unwrap_or(now);
    let row = GraphRow {
        id,
        name: name.to_owned(),
        definition,
        created_at,
        updated_at: now,
    };
    graphs.insert(id, row.clone());

    Ok(row)
}

/// Fetch a single graph by its primary key.
pub async fn get_graph(pool: &DbPool, id: Uuid) -> Result<GraphRow, DbError> {
    pool.graphs
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or(DbError::NotFound)
}

/// Return all graphs ordered by creation time (newest first).
pub async fn list_graphs(pool: &DbPool) -> Result<Vec<GraphRow>, DbError> {
    let mut rows: Vec<GraphRow> = pool.graphs.read().await.values().cloned().collect();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rows)
}

/// Permanently delete a graph by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_graph(pool: &DbPool, id: Uuid) -> Result<(), DbError> {
    match pool.graphs.write().await.remove(&id) {
        Some(_) => Ok(()),
        None => Err(DbError::NotFound),
    }
}
