//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "flow_graph",
        sql: r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                published_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_flows_org ON flows(org_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_flows_org_active
                ON flows(org_id, status) WHERE status IN ('draft', 'published');

            CREATE TABLE IF NOT EXISTS flow_nodes (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL REFERENCES flows(id),
                node_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                required INTEGER NOT NULL DEFAULT 1,
                config TEXT NOT NULL DEFAULT '{}',
                position_x REAL NOT NULL DEFAULT 0,
                position_y REAL NOT NULL DEFAULT 0,
                order_index INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (flow_id, order_index)
            );
            CREATE INDEX IF NOT EXISTS idx_flow_nodes_flow ON flow_nodes(flow_id);

            CREATE TABLE IF NOT EXISTS flow_edges (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL REFERENCES flows(id),
                source_id TEXT NOT NULL REFERENCES flow_nodes(id),
                target_id TEXT NOT NULL REFERENCES flow_nodes(id),
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flow_edges_flow ON flow_edges(flow_id);
            CREATE INDEX IF NOT EXISTS idx_flow_edges_source ON flow_edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_flow_edges_target ON flow_edges(target_id);
        "#,
    },
    Migration {
        version: 2,
        name: "onboarding_progress",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_progress (
                org_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                flow_id TEXT NOT NULL,
                completed TEXT NOT NULL DEFAULT '[]',
                current_node_id TEXT,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (org_id, user_id)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "node_origin",
        sql: r#"
            ALTER TABLE flow_nodes ADD COLUMN origin_id TEXT;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
