//! Typed wrappers over the `db` repositories: graphs and executions go in
//! and out as serialized JSON definitions.

use uuid::Uuid;

use db::{DbError, DbPool};

use crate::models::{Execution, Graph};
use crate::EngineError;

pub async fn save_graph(pool: &DbPool, graph: &Graph) -> Result<(), EngineError> {
    db::repository::graphs::save_graph(pool, graph.id, &graph.name, serde_json::to_value(graph)?).await?;
    Ok(())
}

/// # Errors
/// [`EngineError::GraphNotFound`] when no definition is stored under `id`.
pub async fn load_graph(pool: &DbPool, id: Uuid) -> Result<Graph, EngineError> {
    let row = match db::repository::graphs::get_graph(pool, id).await {
        Ok(row) => row,
        Err(DbError::NotFound) => return Err(EngineError::GraphNotFound(id)),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_value(row.definition)?)
}

pub async fn save_execution(pool: &DbPool, execution: &Execution) -> Result<(), EngineError> {
    db::repository::executions::insert_execution(
        pool,
        execution.id,
        execution.graph_id,
        &execution.status.to_string(),
        execution.started_at,
        execution.finished_at,
        serde_json::to_value(execution)?,
    )
    .await?;
    Ok(())
}

pub async fn load_execution(pool: &DbPool, id: Uuid) -> Result<Execution, EngineError> {
    let row = db::repository::executions::get_execution(pool, id).await?;
    Ok(serde_json::from_value(row.record)?)
}

/// Every stored run of `graph_id`, in the order the store returns them.
pub async fn list_executions(pool: &DbPool, graph_id: Uuid) -> Result<Vec<Execution>, EngineError> {
    db::repository::executions::list_executions(pool, graph_id)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row.record).map_err(EngineError::from))
        .collect()
}
