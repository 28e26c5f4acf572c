//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Cascading deletes are
//! performed explicitly, leaves first, instead of relying on foreign-key
//! enforcement.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::folders::model::{Folder, FolderDeletion, FolderListing};
use crate::jobs::model::{Job, JobFilter, JobStatus, JobUnit, TaskJobStats};
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tasks::model::{Task, TaskFilter};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
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
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query that returns a single id column.
    async fn query_ids(
        &self,
        op: &str,
        sql: &str,
        ids_json: &str,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![ids_json])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op} row: {e}")))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("{op}.id: {e}")))?;
            out.push(parse_uuid(&raw, op)?);
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp encoding. Fixed precision keeps text ordering
/// consistent with time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

/// Map an INSERT failure, keeping constraint violations distinct.
fn insert_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

/// Escape `\`, `%` and `_` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s))
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("{what} parse {s:?}: {e}")))
}

fn str_to_status(s: &str) -> JobStatus {
    s.parse().unwrap_or_else(|_| {
        warn!(status = s, "Unknown status in database, treating as pending");
        JobStatus::Pending
    })
}

/// Encode a list of ids as a JSON array for `json_each(?)` filters.
fn ids_json(ids: &[Uuid]) -> Result<String, DatabaseError> {
    serde_json::to_string(ids).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn to_json_text(value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

// ── Row mapping ─────────────────────────────────────────────────────

const FOLDER_COLUMNS: &str = "id, name, parent_id, order_index, created_at";

const TASK_COLUMNS: &str = "id, folder_id, title, text, sub_ids, created_at";

const JOB_COLUMNS: &str =
    "id, task_id, status, config, created_at, started_at, completed_at, error";

const UNIT_COLUMNS: &str = "id, job_id, task_id, position, task_title, task_text, status, result, error, started_at, completed_at";

fn row_to_folder(row: &libsql::Row) -> Result<Folder, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("folder.id: {e}")))?;
    let name: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("folder.name: {e}")))?;
    let parent_id = match row.get::<String>(2).ok().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_uuid(&raw, "folder.parent_id")?),
        None => None,
    };
    let order_index: Option<i64> = row.get(3).ok();
    let created_str: String = row.get(4).unwrap_or_default();

    Ok(Folder {
        id: parse_uuid(&id_str, "folder.id")?,
        name,
        parent_id,
        order_index,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("task.id: {e}")))?;
    let folder_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("task.folder_id: {e}")))?;
    let title: Option<String> = row.get::<String>(2).ok();
    let text: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("task.text: {e}")))?;

    // Malformed references are dropped rather than failing the whole row.
    let sub_raw: String = row.get(4).unwrap_or_else(|_| "[]".to_string());
    let sub_ids: Vec<Uuid> = serde_json::from_str::<Vec<String>>(&sub_raw)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect();

    let created_str: String = row.get(5).unwrap_or_default();

    Ok(Task {
        id: parse_uuid(&id_str, "task.id")?,
        folder_id: parse_uuid(&folder_str, "task.folder_id")?,
        title,
        text,
        sub_ids,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("job.id: {e}")))?;
    let task_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("job.task_id: {e}")))?;
    let status_str: String = row.get(2).unwrap_or_else(|_| "pending".to_string());
    let config_str: String = row.get(3).unwrap_or_else(|_| "{}".to_string());
    let config = serde_json::from_str(&config_str)
        .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
    let created_str: String = row.get(4).unwrap_or_default();

    Ok(Job {
        id: parse_uuid(&id_str, "job.id")?,
        task_id: parse_uuid(&task_str, "job.task_id")?,
        status: str_to_status(&status_str),
        config,
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(row.get(5).ok()),
        completed_at: parse_optional_datetime(row.get(6).ok()),
        error: row.get::<String>(7).ok(),
    })
}

fn row_to_unit(row: &libsql::Row) -> Result<JobUnit, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("unit.id: {e}")))?;
    let job_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("unit.job_id: {e}")))?;
    let task_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("unit.task_id: {e}")))?;
    let position: i64 = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("unit.position: {e}")))?;
    let status_str: String = row.get(6).unwrap_or_else(|_| "pending".to_string());
    let result = row
        .get::<String>(7)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(JobUnit {
        id: parse_uuid(&id_str, "unit.id")?,
        job_id: parse_uuid(&job_str, "unit.job_id")?,
        task_id: parse_uuid(&task_str, "unit.task_id")?,
        position,
        task_title: row.get::<String>(4).ok(),
        task_text: row.get(5).unwrap_or_default(),
        status: str_to_status(&status_str),
        result,
        error: row.get::<String>(8).ok(),
        started_at: parse_optional_datetime(row.get(9).ok()),
        completed_at: parse_optional_datetime(row.get(10).ok()),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Folders ─────────────────────────────────────────────────────

    async fn insert_folder(&self, folder: &Folder) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO folders (id, name, parent_id, order_index, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    folder.id.to_string(),
                    folder.name.as_str(),
                    folder.parent_id.map(|id| id.to_string()),
                    folder.order_index,
                    ts(&folder.created_at),
                ],
            )
            .await
            .map_err(|e| insert_error("insert_folder", e))?;
        debug!(folder_id = %folder.id, "Folder inserted");
        Ok(())
    }

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_folder: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_folder(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_folder row: {e}"))),
        }
    }

    async fn list_folders(&self) -> Result<Vec<FolderListing>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT f.id, f.name, f.parent_id, f.order_index, f.created_at,
                        (SELECT COUNT(*) FROM tasks t WHERE t.folder_id = f.id)
                 FROM folders f",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_folders: {e}")))?;

        let mut folders = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_folders row: {e}")))?
        {
            folders.push(FolderListing {
                folder: row_to_folder(&row)?,
                task_count: row.get(5).unwrap_or(0),
            });
        }
        Ok(folders)
    }

    async fn update_folder(&self, folder: &Folder) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE folders SET name = ?1, parent_id = ?2, order_index = ?3 WHERE id = ?4",
                params![
                    folder.name.as_str(),
                    folder.parent_id.map(|id| id.to_string()),
                    folder.order_index,
                    folder.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_folder: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "folder".into(),
                id: folder.id.to_string(),
            });
        }
        Ok(())
    }

    async fn folder_subtree(&self, id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        // The depth cap only matters if the table was corrupted into a cycle.
        let mut rows = self
            .conn()
            .query(
                "WITH RECURSIVE subtree(id, depth) AS (
                    SELECT id, 0 FROM folders WHERE id = ?1
                    UNION
                    SELECT f.id, s.depth + 1 FROM folders f
                    JOIN subtree s ON f.parent_id = s.id
                    WHERE s.depth < 1000
                 )
                 SELECT id, MAX(depth) AS d FROM subtree GROUP BY id ORDER BY d DESC",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("folder_subtree: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("folder_subtree row: {e}")))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("folder_subtree.id: {e}")))?;
            ids.push(parse_uuid(&raw, "folder_subtree.id")?);
        }
        Ok(ids)
    }

    async fn reorder_folders(
        &self,
        ids: &[Uuid],
        parent_id: Option<Uuid>,
    ) -> Result<(), DatabaseError> {
        let parent = parent_id.map(|id| id.to_string());
        for (index, id) in ids.iter().enumerate() {
            self.conn()
                .execute(
                    "UPDATE folders SET order_index = ?1, parent_id = ?2 WHERE id = ?3",
                    params![index as i64, parent.clone(), id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("reorder_folders: {e}")))?;
        }
        Ok(())
    }

    async fn delete_folder_tree(&self, id: Uuid) -> Result<FolderDeletion, DatabaseError> {
        let folder_ids = self.folder_subtree(id).await?;
        if folder_ids.is_empty() {
            return Ok(FolderDeletion::default());
        }
        let folders_json = ids_json(&folder_ids)?;

        let task_ids = self
            .query_ids(
                "delete_folder_tree tasks",
                "SELECT id FROM tasks WHERE folder_id IN (SELECT value FROM json_each(?1))",
                &folders_json,
            )
            .await?;
        let tasks_json = ids_json(&task_ids)?;
        let conn = self.conn();

        conn.execute(
            "DELETE FROM job_units WHERE job_id IN (
                SELECT id FROM jobs WHERE task_id IN (SELECT value FROM json_each(?1)))",
            params![tasks_json.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_folder_tree units: {e}")))?;

        let jobs = conn
            .execute(
                "DELETE FROM jobs WHERE task_id IN (SELECT value FROM json_each(?1))",
                params![tasks_json.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_folder_tree jobs: {e}")))?;

        let tasks = conn
            .execute(
                "DELETE FROM tasks WHERE id IN (SELECT value FROM json_each(?1))",
                params![tasks_json.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_folder_tree tasks: {e}")))?;

        let mut folders = 0;
        for folder_id in &folder_ids {
            folders += conn
                .execute(
                    "DELETE FROM folders WHERE id = ?1",
                    params![folder_id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_folder_tree folders: {e}")))?;
        }

        Ok(FolderDeletion {
            folders,
            tasks,
            jobs,
        })
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let sub_ids = ids_json(&task.sub_ids)?;
        self.conn()
            .execute(
                "INSERT INTO tasks (id, folder_id, title, text, sub_ids, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.id.to_string(),
                    task.folder_id.to_string(),
                    task.title.as_deref(),
                    task.text.as_str(),
                    sub_ids,
                    ts(&task.created_at),
                ],
            )
            .await
            .map_err(|e| insert_error("insert_task", e))?;
        debug!(task_id = %task.id, "Task inserted");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task row: {e}"))),
        }
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, DatabaseError> {
        let folders = match &filter.folder_ids {
            Some(ids) => Some(ids_json(ids)?),
            None => None,
        };
        let pattern = filter
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(&q.to_lowercase())));

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE (?1 IS NULL OR folder_id IN (SELECT value FROM json_each(?1)))
                       AND (?2 IS NULL OR lower(text) LIKE ?2 ESCAPE '\\' OR lower(COALESCE(title, '')) LIKE ?2 ESCAPE '\\')
                     ORDER BY created_at DESC
                     LIMIT ?3 OFFSET ?4"
                ),
                params![
                    folders,
                    pattern,
                    filter.limit.unwrap_or(-1),
                    filter.offset.unwrap_or(0),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks row: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let sub_ids = ids_json(&task.sub_ids)?;
        let count = self
            .conn()
            .execute(
                "UPDATE tasks SET folder_id = ?1, title = ?2, text = ?3, sub_ids = ?4 WHERE id = ?5",
                params![
                    task.folder_id.to_string(),
                    task.title.as_deref(),
                    task.text.as_str(),
                    sub_ids,
                    task.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task".into(),
                id: task.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM job_units WHERE job_id IN (SELECT id FROM jobs WHERE task_id = ?1)",
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_task units: {e}")))?;
        conn.execute("DELETE FROM jobs WHERE task_id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task jobs: {e}")))?;
        let count = conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        Ok(count > 0)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job, units: &[JobUnit]) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                job.id.to_string(),
                job.task_id.to_string(),
                job.status.as_str(),
                to_json_text(&job.config)?,
                ts(&job.created_at),
                opt_ts(&job.started_at),
                opt_ts(&job.completed_at),
                job.error.as_deref(),
            ],
        )
        .await
        .map_err(|e| insert_error("insert_job", e))?;

        for unit in units {
            if let Err(e) = self.insert_unit(unit).await {
                // Leave no partial plan behind.
                if let Err(cleanup) = self.delete_job(job.id).await {
                    warn!(job_id = %job.id, error = %cleanup, "Failed to clean up partial job");
                }
                return Err(e);
            }
        }
        debug!(job_id = %job.id, units = units.len(), "Job inserted");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job row: {e}"))),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE (?1 IS NULL OR task_id = ?1) AND (?2 IS NULL OR status = ?2)
                     ORDER BY created_at DESC
                     LIMIT ?3 OFFSET ?4"
                ),
                params![
                    filter.task_id.map(|id| id.to_string()),
                    filter.status.map(|s| s.as_str()),
                    filter.limit.unwrap_or(-1),
                    filter.offset.unwrap_or(0),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_jobs row: {e}")))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn update_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, error = ?2, started_at = ?3, completed_at = ?4 WHERE id = ?5",
                params![
                    job.status.as_str(),
                    job.error.as_deref(),
                    opt_ts(&job.started_at),
                    opt_ts(&job.completed_at),
                    job.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_job: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job".into(),
                id: job.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM job_units WHERE job_id = ?1",
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_job units: {e}")))?;
        let count = conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_job: {e}")))?;
        Ok(count > 0)
    }

    async fn task_job_stats(
        &self,
        task_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, TaskJobStats)>, DatabaseError> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stats: HashMap<Uuid, TaskJobStats> = HashMap::new();

        let mut rows = self
            .conn()
            .query(
                "SELECT task_id, status, COUNT(*) FROM jobs
                 WHERE task_id IN (SELECT value FROM json_each(?1))
                 GROUP BY task_id, status",
                params![ids_json(task_ids)?],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("task_job_stats: {e}")))?;

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("task_job_stats row: {e}")))?
        {
            let task_str: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("task_job_stats.task_id: {e}")))?;
            let status_str: String = row.get(1).unwrap_or_default();
            let count: i64 = row.get(2).unwrap_or(0);
            let task_id = parse_uuid(&task_str, "task_job_stats.task_id")?;
            stats
                .entry(task_id)
                .or_default()
                .record(str_to_status(&status_str), count);
        }

        Ok(task_ids
            .iter()
            .map(|id| (*id, stats.get(id).cloned().unwrap_or_default()))
            .collect())
    }

    // ── Job units ───────────────────────────────────────────────────

    async fn list_units(&self, job_id: Uuid) -> Result<Vec<JobUnit>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {UNIT_COLUMNS} FROM job_units WHERE job_id = ?1 ORDER BY position ASC"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_units: {e}")))?;

        let mut units = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_units row: {e}")))?
        {
            units.push(row_to_unit(&row)?);
        }
        Ok(units)
    }

    async fn get_unit(
        &self,
        job_id: Uuid,
        position: i64,
    ) -> Result<Option<JobUnit>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {UNIT_COLUMNS} FROM job_units WHERE job_id = ?1 AND position = ?2"),
                params![job_id.to_string(), position],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_unit: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_unit(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_unit row: {e}"))),
        }
    }

    async fn unit_statuses(&self, job_id: Uuid) -> Result<Vec<JobStatus>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status FROM job_units WHERE job_id = ?1 ORDER BY position ASC",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("unit_statuses: {e}")))?;

        let mut statuses = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("unit_statuses row: {e}")))?
        {
            let raw: String = row.get(0).unwrap_or_default();
            statuses.push(str_to_status(&raw));
        }
        Ok(statuses)
    }

    async fn update_unit(&self, unit: &JobUnit) -> Result<(), DatabaseError> {
        let result = match &unit.result {
            Some(value) => Some(to_json_text(value)?),
            None => None,
        };
        let count = self
            .conn()
            .execute(
                "UPDATE job_units SET status = ?1, result = ?2, error = ?3, started_at = ?4, completed_at = ?5 WHERE id = ?6",
                params![
                    unit.status.as_str(),
                    result,
                    unit.error.as_deref(),
                    opt_ts(&unit.started_at),
                    opt_ts(&unit.completed_at),
                    unit.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_unit: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job_unit".into(),
                id: unit.id.to_string(),
            });
        }
        Ok(())
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value_str: String = row.get(0).unwrap_or_else(|_| "null".to_string());
                let value: serde_json::Value =
                    serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let value_str = to_json_text(value)?;
        self.conn()
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value_str, ts(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;
        Ok(())
    }
}

impl LibSqlBackend {
    async fn insert_unit(&self, unit: &JobUnit) -> Result<(), DatabaseError> {
        let result = match &unit.result {
            Some(value) => Some(to_json_text(value)?),
            None => None,
        };
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO job_units ({UNIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    unit.id.to_string(),
                    unit.job_id.to_string(),
                    unit.task_id.to_string(),
                    unit.position,
                    unit.task_title.as_deref(),
                    unit.task_text.as_str(),
                    unit.status.as_str(),
                    result,
                    unit.error.as_deref(),
                    opt_ts(&unit.started_at),
                    opt_ts(&unit.completed_at),
                ],
            )
            .await
            .map_err(|e| insert_error("insert_unit", e))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn unit_for(job: &Job, task: &Task, position: i64) -> JobUnit {
        JobUnit {
            id: Uuid::new_v4(),
            job_id: job.id,
            task_id: task.id,
            position,
            task_title: task.title.clone(),
            task_text: task.text.clone(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    // ── Folder tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_folder() {
        let db = test_db().await;
        let folder = Folder::new("Checkout flows", None);
        db.insert_folder(&folder).await.unwrap();

        let fetched = db.get_folder(folder.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Checkout flows");
        assert!(fetched.parent_id.is_none());
        assert!(fetched.order_index.is_none());
        assert_eq!(fetched.created_at, folder.created_at);
    }

    #[tokio::test]
    async fn get_folder_not_found() {
        let db = test_db().await;
        assert!(db.get_folder(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subtree_is_deepest_first() {
        let db = test_db().await;
        let root = Folder::new("root", None);
        let child = Folder::new("child", Some(root.id));
        let grandchild = Folder::new("grandchild", Some(child.id));
        let unrelated = Folder::new("other", None);
        for f in [&root, &child, &grandchild, &unrelated] {
            db.insert_folder(f).await.unwrap();
        }

        let ids = db.folder_subtree(root.id).await.unwrap();
        assert_eq!(ids, vec![grandchild.id, child.id, root.id]);
    }

    #[tokio::test]
    async fn reorder_sets_index_and_parent() {
        let db = test_db().await;
        let parent = Folder::new("parent", None);
        let a = Folder::new("a", None);
        let b = Folder::new("b", None);
        let c = Folder::new("c", None);
        for f in [&parent, &a, &b, &c] {
            db.insert_folder(f).await.unwrap();
        }

        db.reorder_folders(&[b.id, a.id, c.id], Some(parent.id))
            .await
            .unwrap();

        for (id, expected) in [(b.id, 0), (a.id, 1), (c.id, 2)] {
            let f = db.get_folder(id).await.unwrap().unwrap();
            assert_eq!(f.order_index, Some(expected));
            assert_eq!(f.parent_id, Some(parent.id));
        }
    }

    #[tokio::test]
    async fn list_folders_counts_tasks() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        db.insert_task(&Task::new(folder.id, "one")).await.unwrap();
        db.insert_task(&Task::new(folder.id, "two")).await.unwrap();

        let listings = db.list_folders().await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].task_count, 2);
    }

    #[tokio::test]
    async fn delete_folder_tree_cascades() {
        let db = test_db().await;
        let root = Folder::new("root", None);
        let child = Folder::new("child", Some(root.id));
        let keep = Folder::new("keep", None);
        for f in [&root, &child, &keep] {
            db.insert_folder(f).await.unwrap();
        }
        let doomed = Task::new(child.id, "doomed");
        let kept = Task::new(keep.id, "kept");
        db.insert_task(&doomed).await.unwrap();
        db.insert_task(&kept).await.unwrap();

        let job = Job::new(doomed.id, json!({}));
        db.insert_job(&job, &[unit_for(&job, &doomed, 0)])
            .await
            .unwrap();

        let deleted = db.delete_folder_tree(root.id).await.unwrap();
        assert_eq!(
            deleted,
            FolderDeletion {
                folders: 2,
                tasks: 1,
                jobs: 1
            }
        );
        assert!(db.get_folder(child.id).await.unwrap().is_none());
        assert!(db.get_task(doomed.id).await.unwrap().is_none());
        assert!(db.get_job(job.id).await.unwrap().is_none());
        assert!(db.list_units(job.id).await.unwrap().is_empty());
        assert!(db.get_task(kept.id).await.unwrap().is_some());
    }

    // ── Task tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn task_roundtrip_keeps_sub_ids_order() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let task = Task::new(folder.id, "chain")
            .with_title("Chain")
            .with_sub_ids(vec![y, x]);
        db.insert_task(&task).await.unwrap();

        let fetched = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.sub_ids, vec![y, x]);
        assert_eq!(fetched.title.as_deref(), Some("Chain"));
    }

    #[tokio::test]
    async fn list_tasks_filters() {
        let db = test_db().await;
        let f1 = Folder::new("f1", None);
        let f2 = Folder::new("f2", None);
        db.insert_folder(&f1).await.unwrap();
        db.insert_folder(&f2).await.unwrap();

        let mut login = Task::new(f1.id, "Open the login page");
        login.created_at = Utc::now() - chrono::Duration::seconds(10);
        let checkout = Task::new(f1.id, "Checkout with card");
        let other = Task::new(f2.id, "Login as admin");
        for t in [&login, &checkout, &other] {
            db.insert_task(t).await.unwrap();
        }

        let in_f1 = db
            .list_tasks(&TaskFilter {
                folder_ids: Some(vec![f1.id]),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = in_f1.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![checkout.id, login.id]);

        let matching = db
            .list_tasks(&TaskFilter {
                query: Some("LOGIN".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(matching.len(), 2);

        let page = db
            .list_tasks(&TaskFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn task_search_treats_wildcards_literally() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let percent = Task::new(folder.id, "Reach 100% done");
        let plain = Task::new(folder.id, "Reach 1000 done");
        let underscore = Task::new(folder.id, "fill user_name");
        let lookalike = Task::new(folder.id, "fill userXname");
        let backslash = Task::new(folder.id, r"open C:\temp");
        for t in [&percent, &plain, &underscore, &lookalike, &backslash] {
            db.insert_task(t).await.unwrap();
        }

        let search = |q: &str| TaskFilter {
            query: Some(q.into()),
            ..Default::default()
        };
        let ids = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.id).collect::<Vec<_>>();

        assert_eq!(ids(db.list_tasks(&search("100%")).await.unwrap()), vec![percent.id]);
        assert_eq!(ids(db.list_tasks(&search("user_name")).await.unwrap()), vec![underscore.id]);
        assert_eq!(ids(db.list_tasks(&search(r"C:\temp")).await.unwrap()), vec![backslash.id]);
        assert_eq!(db.list_tasks(&search("%")).await.unwrap().len(), 1);
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like(r"50%_a\b"), r"50\%\_a\\b");
    }

    #[tokio::test]
    async fn duplicate_task_id_is_a_constraint_violation() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let task = Task::new(folder.id, "t");
        db.insert_task(&task).await.unwrap();

        let err = db.insert_task(&task).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn delete_task_removes_its_jobs() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let task = Task::new(folder.id, "t");
        db.insert_task(&task).await.unwrap();
        let job = Job::new(task.id, json!({}));
        db.insert_job(&job, &[unit_for(&job, &task, 0)]).await.unwrap();

        assert!(db.delete_task(task.id).await.unwrap());
        assert!(db.get_job(job.id).await.unwrap().is_none());
        assert!(!db.delete_task(task.id).await.unwrap());
    }

    // ── Job tests ───────────────────────────────────────────────────

    #[tokio::test]
    async fn job_and_units_roundtrip() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let task = Task::new(folder.id, "login").with_title("Login");
        db.insert_task(&task).await.unwrap();

        let job = Job::new(task.id, json!({"max_steps": 5}));
        let units = vec![unit_for(&job, &task, 0), unit_for(&job, &task, 1)];
        db.insert_job(&job, &units).await.unwrap();

        let fetched = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.config["max_steps"], 5);

        let stored = db.list_units(job.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].position, 1);
        assert_eq!(stored[0].task_title.as_deref(), Some("Login"));

        let mut unit = db.get_unit(job.id, 1).await.unwrap().unwrap();
        unit.status = JobStatus::Completed;
        unit.result = Some(json!({"summary": "done"}));
        unit.completed_at = Some(Utc::now());
        db.update_unit(&unit).await.unwrap();

        assert_eq!(
            db.unit_statuses(job.id).await.unwrap(),
            vec![JobStatus::Pending, JobStatus::Completed]
        );
        let reread = db.get_unit(job.id, 1).await.unwrap().unwrap();
        assert_eq!(reread.result, Some(json!({"summary": "done"})));
        assert!(db.get_unit(job.id, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_position_leaves_nothing_behind() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let task = Task::new(folder.id, "t");
        db.insert_task(&task).await.unwrap();

        let job = Job::new(task.id, json!({}));
        let units = vec![unit_for(&job, &task, 0), unit_for(&job, &task, 0)];
        let err = db.insert_job(&job, &units).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
        assert_eq!(
            crate::error::Error::from(err).kind(),
            crate::error::ErrorKind::Conflict
        );
        assert!(db.get_job(job.id).await.unwrap().is_none());
        assert!(db.list_units(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_jobs_filters_and_stats() {
        let db = test_db().await;
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let a = Task::new(folder.id, "a");
        let b = Task::new(folder.id, "b");
        db.insert_task(&a).await.unwrap();
        db.insert_task(&b).await.unwrap();

        let mut done = Job::new(a.id, json!({}));
        done.created_at = Utc::now() - chrono::Duration::seconds(5);
        let running = Job::new(a.id, json!({}));
        db.insert_job(&done, &[unit_for(&done, &a, 0)]).await.unwrap();
        db.insert_job(&running, &[unit_for(&running, &a, 0)])
            .await
            .unwrap();

        done.status = JobStatus::Completed;
        done.completed_at = Some(Utc::now());
        db.update_job(&done).await.unwrap();
        let mut running = running;
        running.status = JobStatus::Running;
        db.update_job(&running).await.unwrap();

        let for_a = db
            .list_jobs(&JobFilter {
                task_id: Some(a.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            for_a.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![running.id, done.id]
        );

        let completed = db
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);

        let stats = db.task_job_stats(&[a.id, b.id]).await.unwrap();
        assert_eq!(stats[0].0, a.id);
        assert_eq!(stats[0].1.total, 2);
        assert_eq!(stats[0].1.completed, 1);
        assert_eq!(stats[0].1.running, 1);
        assert_eq!(stats[1].1, TaskJobStats::default());
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let db = test_db().await;
        let job = Job::new(Uuid::new_v4(), json!({}));
        assert!(matches!(
            db.update_job(&job).await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    // ── Settings tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn settings_upsert() {
        let db = test_db().await;
        assert!(db.get_setting("missing").await.unwrap().is_none());

        db.set_setting("agent_config", &json!({"headless": true}))
            .await
            .unwrap();
        db.set_setting("agent_config", &json!({"headless": false}))
            .await
            .unwrap();
        let value = db.get_setting("agent_config").await.unwrap().unwrap();
        assert_eq!(value, json!({"headless": false}));
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pilot.db");
        let folder = Folder::new("persisted", None);
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_folder(&folder).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_folder(folder.id).await.unwrap().is_some());
    }
}
