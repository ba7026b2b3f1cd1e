use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::WorkflowStore;
use crewforge_core::workflow::{ListQuery, NewWorkflow, Workflow, WorkflowNode, WorkflowPatch};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS workflows (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT,
        nodes TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workflows_live
        ON workflows(is_deleted, seq);";

const COLUMNS: &str = "id, name, description, nodes, created_at, updated_at";

fn db_err(e: impl std::fmt::Display) -> CrewForgeError {
    CrewForgeError::Database(e.to_string())
}

/// SQLite-backed workflow store. Deletes are soft: rows are flagged and
/// hidden from every query.
pub struct SqliteWorkflowStore {
    conn: Mutex<Connection>,
}

impl SqliteWorkflowStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        info!(path = %path.display(), "Workflow store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Workflow>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM workflows WHERE id = ?1 AND is_deleted = 0", COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .map_err(db_err)?;
        row.map(into_workflow).transpose()
    }
}

type RawRow = (String, String, Option<String>, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn parse_ts(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn into_workflow(raw: RawRow) -> Result<Workflow> {
    let (id, name, description, nodes, created_at, updated_at) = raw;
    let nodes: Vec<WorkflowNode> = serde_json::from_str(&nodes)
        .map_err(|e| db_err(format!("Corrupt nodes for workflow {}: {}", id, e)))?;
    Ok(Workflow {
        id,
        name,
        description,
        nodes,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

impl WorkflowStore for SqliteWorkflowStore {
    fn create(&self, workflow: NewWorkflow) -> BoxFuture<'_, Result<Workflow>> {
        Box::pin(async move {
            let now = Utc::now();
            let id = uuid::Uuid::new_v4().to_string();
            let nodes = serde_json::to_string(&workflow.nodes)?;

            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT INTO workflows (id, name, description, nodes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, workflow.name, workflow.description, nodes, now.to_rfc3339()],
            )
            .map_err(db_err)?;

            debug!(workflow = %id, nodes = workflow.nodes.len(), "Workflow created");
            Ok(Workflow {
                id,
                name: workflow.name,
                description: workflow.description,
                nodes: workflow.nodes,
                created_at: now,
                updated_at: now,
            })
        })
    }

    fn get(&self, id: &str) -> BoxFuture<'_, Result<Option<Workflow>>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            Self::fetch(&conn, &id)
        })
    }

    fn list(&self, query: ListQuery) -> BoxFuture<'_, Result<Vec<Workflow>>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM workflows
                     WHERE is_deleted = 0
                     ORDER BY seq DESC
                     LIMIT ?1 OFFSET ?2",
                    COLUMNS
                ))
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![query.limit as i64, query.skip as i64], read_row)
                .map_err(db_err)?;

            let mut workflows = Vec::new();
            for row in rows {
                workflows.push(into_workflow(row.map_err(db_err)?)?);
            }
            Ok(workflows)
        })
    }

    fn update(&self, id: &str, patch: WorkflowPatch) -> BoxFuture<'_, Result<Option<Workflow>>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let Some(mut workflow) = Self::fetch(&conn, &id)? else {
                return Ok(None);
            };

            if let Some(name) = patch.name {
                workflow.name = name;
            }
            if let Some(description) = patch.description {
                workflow.description = Some(description);
            }
            if let Some(nodes) = patch.nodes {
                workflow.nodes = nodes;
            }
            workflow.updated_at = Utc::now();

            conn.execute(
                "UPDATE workflows SET name = ?1, description = ?2, nodes = ?3, updated_at = ?4
                 WHERE id = ?5 AND is_deleted = 0",
                params![
                    workflow.name,
                    workflow.description,
                    serde_json::to_string(&workflow.nodes)?,
                    workflow.updated_at.to_rfc3339(),
                    id
                ],
            )
            .map_err(db_err)?;

            debug!(workflow = %id, "Workflow updated");
            Ok(Some(workflow))
        })
    }

    fn soft_delete(&self, id: &str) -> BoxFuture<'_, Result<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let changed = conn
                .execute(
                    "UPDATE workflows SET is_deleted = 1, updated_at = ?1
                     WHERE id = ?2 AND is_deleted = 0",
                    params![Utc::now().to_rfc3339(), id],
                )
                .map_err(db_err)?;
            if changed > 0 {
                debug!(workflow = %id, "Workflow soft-deleted");
            }
            Ok(changed > 0)
        })
    }
}
