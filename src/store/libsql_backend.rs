//! libSQL backend: async `FlowStore` implementation.
//!
//! Supports local file and in-memory databases. Every statement runs on one
//! shared connection behind `conn_lock`, so nothing can slip into an open
//! transaction. Multi-statement operations run inside a transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::flows::model::{Edge, Flow, FlowStatus, Node, NodeConfig, OnboardingProgress, Position};
use crate::store::migrations;
use crate::store::traits::FlowStore;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Held for every use of `conn`.
    conn_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            conn_lock: Mutex::new(()),
        })
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("{field} parse: {e}")))
}

fn text(row: &libsql::Row, idx: i32, field: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

fn int(row: &libsql::Row, idx: i32, field: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

fn real(row: &libsql::Row, idx: i32, field: &str) -> Result<f64, DatabaseError> {
    row.get::<f64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

/// Map a write failure, surfacing uniqueness violations as constraint errors.
fn write_error(context: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{context}: {message}"))
    } else {
        DatabaseError::Query(format!("{context}: {message}"))
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn config_to_json(config: &NodeConfig) -> Result<String, DatabaseError> {
    serde_json::to_string(config).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

const FLOW_COLUMNS: &str = "id, org_id, status, created_at, updated_at, published_at";

const NODE_COLUMNS: &str = "id, flow_id, node_type, title, description, required, config, position_x, position_y, order_index, version, created_at, updated_at, origin_id";

const EDGE_COLUMNS: &str = "id, flow_id, source_id, target_id, created_at";

const PROGRESS_COLUMNS: &str = "org_id, user_id, flow_id, completed, current_node_id, started_at, updated_at, completed_at";

async fn write_node(conn: &Connection, node: &Node, context: &str) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO flow_nodes ({NODE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            node.id.to_string(),
            node.flow_id.to_string(),
            node.node_type.as_str(),
            node.title.as_str(),
            opt_text(node.description.as_deref()),
            node.required as i64,
            config_to_json(&node.config)?,
            node.position.x,
            node.position.y,
            node.order_index as i64,
            node.version,
            node.created_at.to_rfc3339(),
            node.updated_at.to_rfc3339(),
            node.origin_id.map(|id| id.to_string()),
        ],
    )
    .await
    .map_err(|e| write_error(context, e))?;
    Ok(())
}

async fn write_edge(conn: &Connection, edge: &Edge, context: &str) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO flow_edges ({EDGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            edge.id.to_string(),
            edge.flow_id.to_string(),
            edge.source.to_string(),
            edge.target.to_string(),
            edge.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| write_error(context, e))?;
    Ok(())
}

/// First column of the first row as an integer.
async fn scalar(conn: &Connection, sql: &str, id: Uuid, context: &str) -> Result<Option<i64>, DatabaseError> {
    let mut rows = conn
        .query(sql, params![id.to_string()])
        .await
        .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(int(&row, 0, context)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{context} row: {e}"))),
    }
}

fn row_to_flow(row: &libsql::Row) -> Result<Flow, DatabaseError> {
    let id: String = text(row, 0, "flow.id")?;
    let status: String = text(row, 2, "flow.status")?;
    let created_at: String = text(row, 3, "flow.created_at")?;
    let updated_at: String = text(row, 4, "flow.updated_at")?;
    let published_at: Option<String> = row.get::<String>(5).ok();

    Ok(Flow {
        id: parse_uuid(&id, "flow.id")?,
        org_id: text(row, 1, "flow.org_id")?,
        status: status.parse().map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
        published_at: published_at.as_deref().map(parse_datetime),
    })
}

fn row_to_node(row: &libsql::Row) -> Result<Node, DatabaseError> {
    let id: String = text(row, 0, "node.id")?;
    let flow_id: String = text(row, 1, "node.flow_id")?;
    let node_type: String = text(row, 2, "node.node_type")?;
    let config: String = text(row, 6, "node.config")?;
    let order_index: i64 = int(row, 9, "node.order_index")?;
    let created_at: String = text(row, 11, "node.created_at")?;
    let updated_at: String = text(row, 12, "node.updated_at")?;
    let origin_id: Option<String> = row.get::<String>(13).ok();

    Ok(Node {
        id: parse_uuid(&id, "node.id")?,
        flow_id: parse_uuid(&flow_id, "node.flow_id")?,
        node_type: node_type.parse().map_err(DatabaseError::Serialization)?,
        title: text(row, 3, "node.title")?,
        description: row.get::<String>(4).ok(),
        required: int(row, 5, "node.required")? != 0,
        config: serde_json::from_str(&config)
            .map_err(|e| DatabaseError::Serialization(format!("node.config: {e}")))?,
        position: Position {
            x: real(row, 7, "node.position_x")?,
            y: real(row, 8, "node.position_y")?,
        },
        order_index: u32::try_from(order_index)
            .map_err(|e| DatabaseError::Serialization(format!("node.order_index: {e}")))?,
        version: int(row, 10, "node.version")?,
        origin_id: origin_id
            .as_deref()
            .map(|s| parse_uuid(s, "node.origin_id"))
            .transpose()?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_edge(row: &libsql::Row) -> Result<Edge, DatabaseError> {
    let id: String = text(row, 0, "edge.id")?;
    let flow_id: String = text(row, 1, "edge.flow_id")?;
    let source: String = text(row, 2, "edge.source_id")?;
    let target: String = text(row, 3, "edge.target_id")?;
    let created_at: String = text(row, 4, "edge.created_at")?;

    Ok(Edge {
        id: parse_uuid(&id, "edge.id")?,
        flow_id: parse_uuid(&flow_id, "edge.flow_id")?,
        source: parse_uuid(&source, "edge.source_id")?,
        target: parse_uuid(&target, "edge.target_id")?,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_progress(row: &libsql::Row) -> Result<OnboardingProgress, DatabaseError> {
    let flow_id: String = text(row, 2, "progress.flow_id")?;
    let completed: String = text(row, 3, "progress.completed")?;
    let current: Option<String> = row.get::<String>(4).ok();
    let started_at: String = text(row, 5, "progress.started_at")?;
    let updated_at: String = text(row, 6, "progress.updated_at")?;
    let completed_at: Option<String> = row.get::<String>(7).ok();

    Ok(OnboardingProgress {
        org_id: text(row, 0, "progress.org_id")?,
        user_id: text(row, 1, "progress.user_id")?,
        flow_id: parse_uuid(&flow_id, "progress.flow_id")?,
        completed: serde_json::from_str(&completed)
            .map_err(|e| DatabaseError::Serialization(format!("progress.completed: {e}")))?,
        current_node_id: current
            .as_deref()
            .map(|s| parse_uuid(s, "progress.current_node_id"))
            .transpose()?,
        started_at: parse_datetime(&started_at),
        updated_at: parse_datetime(&updated_at),
        completed_at: completed_at.as_deref().map(parse_datetime),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl FlowStore for LibSqlBackend {
    // ── Flows ───────────────────────────────────────────────────────

    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {FLOW_COLUMNS} FROM flows WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_flow: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_flow(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_flow row: {e}"))),
        }
    }

    async fn find_flow(
        &self,
        org_id: &str,
        status: FlowStatus,
    ) -> Result<Option<Flow>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {FLOW_COLUMNS} FROM flows WHERE org_id = ?1 AND status = ?2 \
                     ORDER BY updated_at DESC LIMIT 1"
                ),
                params![org_id, status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_flow: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_flow(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_flow row: {e}"))),
        }
    }

    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn
            .execute(
                &format!("INSERT INTO flows ({FLOW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    flow.id.to_string(),
                    flow.org_id.as_str(),
                    flow.status.as_str(),
                    flow.created_at.to_rfc3339(),
                    flow.updated_at.to_rfc3339(),
                    flow.published_at.map(|d| d.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| write_error("insert_flow", e))?;
        debug!(flow_id = %flow.id, org_id = %flow.org_id, "Flow inserted");
        Ok(())
    }

    async fn commit_publish(
        &self,
        flow_id: Uuid,
        nodes: &[Node],
        supersede: Option<Uuid>,
    ) -> Result<Flow, DatabaseError> {
        let guard = self.conn_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit_publish begin: {e}")))?;

        // The snapshot must still describe the stored draft.
        let draft = scalar(
            &tx,
            "SELECT status = 'draft' FROM flows WHERE id = ?1",
            flow_id,
            "commit_publish status",
        )
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "flow".into(),
            id: flow_id.to_string(),
        })?;
        if draft == 0 {
            return Err(DatabaseError::Conflict(format!("flow {flow_id} is no longer a draft")));
        }
        let stored = scalar(
            &tx,
            "SELECT COUNT(*) FROM flow_nodes WHERE flow_id = ?1",
            flow_id,
            "commit_publish count",
        )
        .await?
        .unwrap_or(0);
        if stored != nodes.len() as i64 {
            return Err(DatabaseError::Conflict(format!(
                "flow {flow_id} has {stored} nodes, {} were validated",
                nodes.len()
            )));
        }

        // Full save pass, guarded by each node's validated version.
        for node in nodes {
            let written = tx
                .execute(
                    "UPDATE flow_nodes SET node_type = ?1, title = ?2, description = ?3, required = ?4, \
                     config = ?5, position_x = ?6, position_y = ?7, updated_at = ?9 \
                     WHERE id = ?10 AND flow_id = ?11 AND version = ?8",
                    params![
                        node.node_type.as_str(),
                        node.title.as_str(),
                        opt_text(node.description.as_deref()),
                        node.required as i64,
                        config_to_json(&node.config)?,
                        node.position.x,
                        node.position.y,
                        node.version,
                        node.updated_at.to_rfc3339(),
                        node.id.to_string(),
                        flow_id.to_string(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("commit_publish node: {e}")))?;
            if written == 0 {
                return Err(DatabaseError::Conflict(format!(
                    "node {} changed during publish",
                    node.id
                )));
            }
        }

        if let Some(old) = supersede {
            let archived = tx
                .execute(
                    "UPDATE flows SET status = 'archived', updated_at = ?1 \
                     WHERE id = ?2 AND status = 'published'",
                    params![now.as_str(), old.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("commit_publish supersede: {e}")))?;
            if archived == 0 {
                return Err(DatabaseError::Conflict(format!("flow {old} is no longer published")));
            }
        }

        tx.execute(
            "UPDATE flows SET status = 'published', published_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now.as_str(), flow_id.to_string()],
        )
        .await
        .map_err(|e| match write_error("commit_publish flip", e) {
            DatabaseError::Constraint(msg) => DatabaseError::Conflict(msg),
            other => other,
        })?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit_publish commit: {e}")))?;
        drop(guard);

        self.get_flow(flow_id).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "flow".into(),
            id: flow_id.to_string(),
        })
    }

    async fn insert_graph(
        &self,
        flow: &Flow,
        nodes: &[Node],
        edges: &[Edge],
    ) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_graph begin: {e}")))?;

        tx.execute(
            &format!(
                "INSERT INTO flows ({FLOW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO NOTHING"
            ),
            params![
                flow.id.to_string(),
                flow.org_id.as_str(),
                flow.status.as_str(),
                flow.created_at.to_rfc3339(),
                flow.updated_at.to_rfc3339(),
                flow.published_at.map(|d| d.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| write_error("insert_graph flow", e))?;
        for node in nodes {
            write_node(&tx, node, "insert_graph node").await?;
        }
        for edge in edges {
            write_edge(&tx, edge, "insert_graph edge").await?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_graph commit: {e}")))?;
        debug!(flow_id = %flow.id, nodes = nodes.len(), edges = edges.len(), "Graph inserted");
        Ok(())
    }

    // ── Nodes ───────────────────────────────────────────────────────

    async fn list_nodes(&self, flow_id: Uuid) -> Result<Vec<Node>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM flow_nodes WHERE flow_id = ?1 ORDER BY order_index ASC"
                ),
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_nodes: {e}")))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_nodes row: {e}")))?
        {
            nodes.push(row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {NODE_COLUMNS} FROM flow_nodes WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_node: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_node(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_node row: {e}"))),
        }
    }

    async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        write_node(&self.conn, node, "insert_node").await?;
        debug!(node_id = %node.id, flow_id = %node.flow_id, "Node inserted");
        Ok(())
    }

    async fn update_node(
        &self,
        node: &Node,
        expected_version: Option<i64>,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let written = self
            .conn
            .execute(
                "UPDATE flow_nodes SET node_type = ?1, title = ?2, description = ?3, required = ?4, \
                 config = ?5, position_x = ?6, position_y = ?7, version = ?8, updated_at = ?9 \
                 WHERE id = ?10 AND (?11 IS NULL OR version = ?11)",
                params![
                    node.node_type.as_str(),
                    node.title.as_str(),
                    opt_text(node.description.as_deref()),
                    node.required as i64,
                    config_to_json(&node.config)?,
                    node.position.x,
                    node.position.y,
                    node.version,
                    node.updated_at.to_rfc3339(),
                    node.id.to_string(),
                    opt_int(expected_version),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_node: {e}")))?;
        Ok(written > 0)
    }

    async fn update_node_position(
        &self,
        id: Uuid,
        position: Position,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let written = self
            .conn
            .execute(
                "UPDATE flow_nodes SET position_x = ?1, position_y = ?2 WHERE id = ?3",
                params![position.x, position.y, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_node_position: {e}")))?;
        Ok(written > 0)
    }

    async fn delete_node(&self, id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_node begin: {e}")))?;

        let mut removed = Vec::new();
        {
            let mut rows = tx
                .query(
                    "SELECT id FROM flow_edges WHERE source_id = ?1 OR target_id = ?1 ORDER BY created_at",
                    params![id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_node edges: {e}")))?;
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_node edge row: {e}")))?
            {
                let edge_id: String = text(&row, 0, "edge.id")?;
                removed.push(parse_uuid(&edge_id, "edge.id")?);
            }
        }

        tx.execute(
            "DELETE FROM flow_edges WHERE source_id = ?1 OR target_id = ?1",
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_node edges: {e}")))?;
        tx.execute("DELETE FROM flow_nodes WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_node: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_node commit: {e}")))?;
        Ok(removed)
    }

    // ── Edges ───────────────────────────────────────────────────────

    async fn list_edges(&self, flow_id: Uuid) -> Result<Vec<Edge>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {EDGE_COLUMNS} FROM flow_edges WHERE flow_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_edges: {e}")))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_edges row: {e}")))?
        {
            edges.push(row_to_edge(&row)?);
        }
        Ok(edges)
    }

    async fn get_edge(&self, id: Uuid) -> Result<Option<Edge>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {EDGE_COLUMNS} FROM flow_edges WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_edge: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_edge(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_edge row: {e}"))),
        }
    }

    async fn insert_edge(&self, edge: &Edge) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        write_edge(&self.conn, edge, "insert_edge").await?;
        debug!(edge_id = %edge.id, "Edge inserted");
        Ok(())
    }

    async fn delete_edge(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let count = self
            .conn
            .execute("DELETE FROM flow_edges WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_edge: {e}")))?;
        Ok(count > 0)
    }

    // ── Progress ────────────────────────────────────────────────────

    async fn get_progress(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<OnboardingProgress>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM onboarding_progress WHERE org_id = ?1 AND user_id = ?2"
                ),
                params![org_id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_progress(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_progress row: {e}"))),
        }
    }

    async fn save_progress(&self, progress: &OnboardingProgress) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let completed = serde_json::to_string(&progress.completed)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO onboarding_progress ({PROGRESS_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    progress.org_id.as_str(),
                    progress.user_id.as_str(),
                    progress.flow_id.to_string(),
                    completed,
                    progress.current_node_id.map(|id| id.to_string()),
                    progress.started_at.to_rfc3339(),
                    progress.updated_at.to_rfc3339(),
                    progress.completed_at.map(|d| d.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_progress: {e}")))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
