use sqlx::{sqlite::SqliteRow, Row};

use flowchat_core::domain::graph::{BotId, EdgeId, FlowEdge, FlowGraph, FlowNode, NodeId, NodeKind};

use super::{GraphRepository, RepositoryError};
use crate::DbPool;

pub struct SqlGraphRepository {
    pool: DbPool,
}

impl SqlGraphRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GraphRepository for SqlGraphRepository {
    async fn load_graph(&self, bot_id: &BotId) -> Result<Option<FlowGraph>, RepositoryError> {
        let node_rows = sqlx::query(
            "SELECT id, bot_id, node_type, data_json FROM flow_nodes WHERE bot_id = ?",
        )
        .bind(&bot_id.0)
        .fetch_all(&self.pool)
        .await?;

        if node_rows.is_empty() {
            return Ok(None);
        }

        let edge_rows = sqlx::query(
            "SELECT id, source_node_id, target_node_id, handle
             FROM flow_edges
             WHERE bot_id = ?
             ORDER BY id ASC",
        )
        .bind(&bot_id.0)
        .fetch_all(&self.pool)
        .await?;

        let nodes =
            node_rows.into_iter().map(node_from_row).collect::<Result<Vec<FlowNode>, _>>()?;
        let edges =
            edge_rows.into_iter().map(edge_from_row).collect::<Result<Vec<FlowEdge>, _>>()?;

        FlowGraph::new(bot_id.clone(), nodes, edges)
            .map(Some)
            .map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    async fn save_graph(&self, graph: &FlowGraph) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM flow_edges WHERE bot_id = ?")
            .bind(&graph.bot_id().0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM flow_nodes WHERE bot_id = ?")
            .bind(&graph.bot_id().0)
            .execute(&mut *tx)
            .await?;

        for node in graph.nodes() {
            let data_json = node.kind.data_json().to_string();
            sqlx::query(
                "INSERT INTO flow_nodes (id, bot_id, node_type, data_json) VALUES (?, ?, ?, ?)",
            )
            .bind(&node.id.0)
            .bind(&node.bot_id.0)
            .bind(node.kind.type_str())
            .bind(data_json)
            .execute(&mut *tx)
            .await?;
        }

        for edge in graph.edges() {
            sqlx::query(
                "INSERT INTO flow_edges (id, bot_id, source_node_id, target_node_id, handle)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&edge.id.0)
            .bind(&graph.bot_id().0)
            .bind(&edge.source.0)
            .bind(&edge.target.0)
            .bind(edge.handle.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn node_from_row(row: SqliteRow) -> Result<FlowNode, RepositoryError> {
    let node_type = row.try_get::<String, _>("node_type")?;
    let data_raw = row.try_get::<String, _>("data_json")?;
    let data: serde_json::Value = serde_json::from_str(&data_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid node data json for `{node_type}`: {error}"))
    })?;

    let kind = NodeKind::from_parts(&node_type, &data)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(FlowNode {
        id: NodeId(row.try_get("id")?),
        bot_id: BotId(row.try_get("bot_id")?),
        kind,
    })
}

fn edge_from_row(row: SqliteRow) -> Result<FlowEdge, RepositoryError> {
    Ok(FlowEdge {
        id: EdgeId(row.try_get("id")?),
        source: NodeId(row.try_get("source_node_id")?),
        target: NodeId(row.try_get("target_node_id")?),
        handle: row.try_get("handle")?,
    })
}
