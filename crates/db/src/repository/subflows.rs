//! Subflow library repository functions.

use chrono::Utc;

use crate::{models::SubflowRow, DbError, DbPool};

/// Insert or replace a subflow library entry.
pub async fn save_subflow(
    pool: &DbPool,
    id: &str,
    name: &str,
    reusable: bool,
    definition: serde_json::Value,
) -> Result<SubflowRow, DbError> {
    let row = SubflowRow {
        id: id.to_owned(),
        name: name.to_owned(),
        reusable,
        definition,
        updated_at: Utc::now(),
    };
    pool.subflows.write().await.insert(row.id.clone(), row.clone());
    Ok(row)
}

pub async fn get_subflow(pool: &DbPool, id: &str) -> Result<SubflowRow, DbError> {
    pool.subflows
        .read()
        .await
        .get(id)
        .cloned()
        .ok_or(DbError::NotFound)
}

/// All library entries ordered by name.
pub async fn list_subflows(pool: &DbPool) -> Result<Vec<SubflowRow>, DbError> {
    let mut rows: Vec<SubflowRow> = pool.subflows.read().await.values().cloned().collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}
