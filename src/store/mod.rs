//! SQLite persistence.
//!
//! Two pools share one database file: `read` serves snapshot queries, while
//! `write` holds a single connection so every mutating transaction
//! serializes — the single-writer discipline the rest of the crate leans on
//! for lease claims, cycle checks, and status transitions.
//!
//! Named operations take `impl Executor` so the Engine can compose several
//! of them plus event appends inside one transaction; passing the read pool
//! runs the same query against committed state.

pub mod event_log;

use anyhow::Result;
use base64::Engine as _;
use serde::Serialize;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};
use std::{path::Path, str::FromStr};

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Attestation, Decision, EntityKind, Iteration, IterationStatus, Project, Task, TaskStatus,
    TaskType,
};
use crate::policy::ValidationMode;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct Storage {
    read: SqlitePool,
    write: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) the database at `db_path` and apply
    /// migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true);

        let write = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await?;
        let read = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        Self::migrate(&write).await?;
        Ok(Self { read, write })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // A single pinned connection: :memory: databases are per-connection.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self {
            read: pool.clone(),
            write: pool,
        })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for sql in [
            include_str!("migrations/001_init.sql"),
            include_str!("migrations/002_leases_events.sql"),
            include_str!("migrations/003_rbac.sql"),
        ] {
            for stmt in sql.split(';') {
                let stmt = stmt.trim();
                if !stmt.is_empty() {
                    sqlx::query(stmt).execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    /// Begin a serialized write transaction. Dropping the returned
    /// transaction without committing rolls it back.
    pub async fn begin_write(&self) -> EngineResult<Transaction<'static, Sqlite>> {
        Ok(self.write.begin().await?)
    }

    /// Pool for snapshot reads.
    pub fn reader(&self) -> &SqlitePool {
        &self.read
    }
}

// ─── Cursors ──────────────────────────────────────────────────────────────────

/// Opaque composite cursor over `(created_at, id)` descending. The encoded
/// form is URL-safe base64 of `created_at|id`.
pub fn encode_cursor(created_at: &str, id: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("{created_at}|{id}"))
}

pub fn decode_cursor(cursor: &str) -> EngineResult<(String, String)> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| EngineError::bad_field("cursor", "malformed cursor"))?;
    let text =
        String::from_utf8(bytes).map_err(|_| EngineError::bad_field("cursor", "malformed cursor"))?;
    let (created_at, id) = text
        .split_once('|')
        .ok_or_else(|| EngineError::bad_field("cursor", "malformed cursor"))?;
    Ok((created_at.to_string(), id.to_string()))
}

/// One page of a cursor listing. `next_cursor` is empty when the listing is
/// exhausted.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: String,
}

/// Clamp a caller-supplied limit into `1..=MAX_PAGE_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT)
}

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub description: String,
    pub config: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IterationRow {
    pub id: String,
    pub project_id: String,
    pub goal: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: String,
    pub project_id: String,
    pub iteration_id: Option<String>,
    pub parent_id: Option<String>,
    pub task_type: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub assignee_id: Option<String>,
    pub work_proof: String,
    pub validation_mode: String,
    pub required_attestations: String,
    pub required_threshold: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DecisionRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub decision: String,
    pub decider_id: String,
    pub context: String,
    pub rationale: String,
    pub alternatives: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttestationRow {
    pub id: String,
    pub project_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub kind: String,
    pub actor_id: String,
    pub ts: String,
    pub payload: String,
}

fn parse_json(column: &str, raw: &str) -> EngineResult<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("corrupt {column} column: {e}")))
}

fn parse_string_array(column: &str, raw: &str) -> EngineResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("corrupt {column} column: {e}")))
}

impl ProjectRow {
    pub fn into_project(self) -> Project {
        Project {
            id: self.id,
            kind: self.kind,
            status: self.status,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

impl IterationRow {
    pub fn into_iteration(self) -> EngineResult<Iteration> {
        let status = IterationStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!("corrupt iteration status: {}", self.status))
        })?;
        Ok(Iteration {
            id: self.id,
            project_id: self.project_id,
            goal: self.goal,
            status,
            created_at: self.created_at,
        })
    }
}

impl TaskRow {
    pub fn status(&self) -> EngineResult<TaskStatus> {
        TaskStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!("corrupt task status: {}", self.status))
        })
    }

    pub fn into_task(self, depends_on: Vec<String>) -> EngineResult<Task> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!("corrupt task status: {}", self.status))
        })?;
        let task_type = TaskType::parse(&self.task_type).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!("corrupt task type: {}", self.task_type))
        })?;
        let validation_mode = ValidationMode::parse(&self.validation_mode).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!(
                "corrupt validation mode: {}",
                self.validation_mode
            ))
        })?;
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            iteration_id: self.iteration_id,
            parent_id: self.parent_id,
            task_type,
            title: self.title,
            description: self.description,
            status,
            assignee_id: self.assignee_id,
            work_proof: parse_json("work_proof", &self.work_proof)?,
            validation_mode,
            required_attestations: parse_string_array(
                "required_attestations",
                &self.required_attestations,
            )?,
            required_threshold: self.required_threshold.map(|n| n as u32),
            depends_on,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

impl DecisionRow {
    pub fn into_decision(self) -> EngineResult<Decision> {
        Ok(Decision {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            decision: self.decision,
            decider_id: self.decider_id,
            context: parse_json("context", &self.context)?,
            rationale: parse_string_array("rationale", &self.rationale)?,
            alternatives: parse_string_array("alternatives", &self.alternatives)?,
            created_at: self.created_at,
        })
    }
}

impl AttestationRow {
    pub fn into_attestation(self) -> EngineResult<Attestation> {
        let entity_kind = EntityKind::parse(&self.entity_kind).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!("corrupt entity kind: {}", self.entity_kind))
        })?;
        Ok(Attestation {
            id: self.id,
            project_id: self.project_id,
            entity_kind,
            entity_id: self.entity_id,
            kind: self.kind,
            actor_id: self.actor_id,
            ts: self.ts,
            payload: parse_json("payload", &self.payload)?,
        })
    }
}

// ─── Projects ─────────────────────────────────────────────────────────────────

pub async fn insert_project(
    ex: impl Executor<'_, Database = Sqlite>,
    row: &ProjectRow,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO projects (id, kind, status, description, config, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.kind)
    .bind(&row.status)
    .bind(&row.description)
    .bind(&row.config)
    .bind(&row.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_project(
    ex: impl Executor<'_, Database = Sqlite>,
    id: &str,
) -> sqlx::Result<Option<ProjectRow>> {
    sqlx::query_as("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(ex)
        .await
}

pub async fn list_projects(
    ex: impl Executor<'_, Database = Sqlite>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> sqlx::Result<Vec<ProjectRow>> {
    match cursor {
        Some((created_at, id)) => {
            sqlx::query_as(
                "SELECT * FROM projects
                 WHERE created_at < ? OR (created_at = ? AND id < ?)
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(&created_at)
            .bind(&created_at)
            .bind(&id)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
        None => {
            sqlx::query_as("SELECT * FROM projects ORDER BY created_at DESC, id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(ex)
                .await
        }
    }
}

// ─── Iterations ───────────────────────────────────────────────────────────────

pub async fn insert_iteration(
    ex: impl Executor<'_, Database = Sqlite>,
    row: &IterationRow,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO iterations (id, project_id, goal, status, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.project_id)
    .bind(&row.goal)
    .bind(&row.status)
    .bind(&row.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_iteration(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    id: &str,
) -> sqlx::Result<Option<IterationRow>> {
    sqlx::query_as("SELECT * FROM iterations WHERE id = ? AND project_id = ?")
        .bind(id)
        .bind(project_id)
        .fetch_optional(ex)
        .await
}

pub async fn update_iteration_status(
    ex: impl Executor<'_, Database = Sqlite>,
    id: &str,
    status: &str,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE iterations SET status = ? WHERE id = ?")
        .bind(status)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn list_iterations(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    cursor: Option<(String, String)>,
    limit: i64,
) -> sqlx::Result<Vec<IterationRow>> {
    match cursor {
        Some((created_at, id)) => {
            sqlx::query_as(
                "SELECT * FROM iterations
                 WHERE project_id = ?
                   AND (created_at < ? OR (created_at = ? AND id < ?))
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(project_id)
            .bind(&created_at)
            .bind(&created_at)
            .bind(&id)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT * FROM iterations WHERE project_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(project_id)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
    }
}

// ─── Tasks ────────────────────────────────────────────────────────────────────

pub async fn insert_task(
    ex: impl Executor<'_, Database = Sqlite>,
    row: &TaskRow,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO tasks (id, project_id, iteration_id, parent_id, task_type, title,
                            description, status, assignee_id, work_proof, validation_mode,
                            required_attestations, required_threshold, created_at,
                            updated_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.project_id)
    .bind(&row.iteration_id)
    .bind(&row.parent_id)
    .bind(&row.task_type)
    .bind(&row.title)
    .bind(&row.description)
    .bind(&row.status)
    .bind(&row.assignee_id)
    .bind(&row.work_proof)
    .bind(&row.validation_mode)
    .bind(&row.required_attestations)
    .bind(row.required_threshold)
    .bind(&row.created_at)
    .bind(&row.updated_at)
    .bind(&row.completed_at)
    .execute(ex)
    .await?;
    Ok(())
}

/// Rewrite every mutable task column. The Engine mutates a loaded row and
/// persists it whole; `id`, `project_id`, and `created_at` never change.
pub async fn update_task(
    ex: impl Executor<'_, Database = Sqlite>,
    row: &TaskRow,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE tasks SET iteration_id = ?, parent_id = ?, task_type = ?, title = ?,
                          description = ?, status = ?, assignee_id = ?, work_proof = ?,
                          validation_mode = ?, required_attestations = ?,
                          required_threshold = ?, updated_at = ?, completed_at = ?
         WHERE id = ?",
    )
    .bind(&row.iteration_id)
    .bind(&row.parent_id)
    .bind(&row.task_type)
    .bind(&row.title)
    .bind(&row.description)
    .bind(&row.status)
    .bind(&row.assignee_id)
    .bind(&row.work_proof)
    .bind(&row.validation_mode)
    .bind(&row.required_attestations)
    .bind(row.required_threshold)
    .bind(&row.updated_at)
    .bind(&row.completed_at)
    .bind(&row.id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_task(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    id: &str,
) -> sqlx::Result<Option<TaskRow>> {
    sqlx::query_as("SELECT * FROM tasks WHERE id = ? AND project_id = ?")
        .bind(id)
        .bind(project_id)
        .fetch_optional(ex)
        .await
}

pub async fn list_tasks(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    status: Option<&str>,
    iteration_id: Option<&str>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> sqlx::Result<Vec<TaskRow>> {
    let mut qb = sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM tasks WHERE project_id = ");
    qb.push_bind(project_id);
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(iteration_id) = iteration_id {
        qb.push(" AND iteration_id = ").push_bind(iteration_id);
    }
    if let Some((created_at, id)) = cursor {
        qb.push(" AND (created_at < ")
            .push_bind(created_at.clone())
            .push(" OR (created_at = ")
            .push_bind(created_at)
            .push(" AND id < ")
            .push_bind(id)
            .push("))");
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit);
    qb.build_query_as().fetch_all(ex).await
}

/// Every task in the project, oldest first — used to assemble the tree.
pub async fn all_project_tasks(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
) -> sqlx::Result<Vec<TaskRow>> {
    sqlx::query_as(
        "SELECT * FROM tasks WHERE project_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(project_id)
    .fetch_all(ex)
    .await
}

// ─── Task dependencies ────────────────────────────────────────────────────────

pub async fn insert_task_dep(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    task_id: &str,
    depends_on_id: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO task_deps (task_id, depends_on_id, project_id) VALUES (?, ?, ?)",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .bind(project_id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn delete_task_dep(
    ex: impl Executor<'_, Database = Sqlite>,
    task_id: &str,
    depends_on_id: &str,
) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM task_deps WHERE task_id = ? AND depends_on_id = ?")
        .bind(task_id)
        .bind(depends_on_id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Every `(task_id, depends_on_id)` edge in the project — one query for
/// tree assembly instead of one per task.
pub async fn all_project_deps(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
) -> sqlx::Result<Vec<(String, String)>> {
    sqlx::query_as(
        "SELECT task_id, depends_on_id FROM task_deps WHERE project_id = ?
         ORDER BY task_id, depends_on_id",
    )
    .bind(project_id)
    .fetch_all(ex)
    .await
}

/// Ids this task depends on, ordered for stable serialization.
pub async fn deps_of(
    ex: impl Executor<'_, Database = Sqlite>,
    task_id: &str,
) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT depends_on_id FROM task_deps WHERE task_id = ? ORDER BY depends_on_id")
            .bind(task_id)
            .fetch_all(ex)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ─── Decisions ────────────────────────────────────────────────────────────────

pub async fn insert_decision(
    ex: impl Executor<'_, Database = Sqlite>,
    row: &DecisionRow,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO decisions (id, project_id, title, decision, decider_id, context,
                                rationale, alternatives, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.project_id)
    .bind(&row.title)
    .bind(&row.decision)
    .bind(&row.decider_id)
    .bind(&row.context)
    .bind(&row.rationale)
    .bind(&row.alternatives)
    .bind(&row.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_decision(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    id: &str,
) -> sqlx::Result<Option<DecisionRow>> {
    sqlx::query_as("SELECT * FROM decisions WHERE id = ? AND project_id = ?")
        .bind(id)
        .bind(project_id)
        .fetch_optional(ex)
        .await
}

pub async fn list_decisions(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    cursor: Option<(String, String)>,
    limit: i64,
) -> sqlx::Result<Vec<DecisionRow>> {
    match cursor {
        Some((created_at, id)) => {
            sqlx::query_as(
                "SELECT * FROM decisions
                 WHERE project_id = ?
                   AND (created_at < ? OR (created_at = ? AND id < ?))
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(project_id)
            .bind(&created_at)
            .bind(&created_at)
            .bind(&id)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT * FROM decisions WHERE project_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(project_id)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
    }
}

// ─── Attestations ─────────────────────────────────────────────────────────────

pub async fn insert_attestation(
    ex: impl Executor<'_, Database = Sqlite>,
    row: &AttestationRow,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO attestations (id, project_id, entity_kind, entity_id, kind, actor_id,
                                   ts, payload)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.project_id)
    .bind(&row.entity_kind)
    .bind(&row.entity_id)
    .bind(&row.kind)
    .bind(&row.actor_id)
    .bind(&row.ts)
    .bind(&row.payload)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn list_attestations(
    ex: impl Executor<'_, Database = Sqlite>,
    project_id: &str,
    entity_kind: Option<&str>,
    entity_id: Option<&str>,
    kind: Option<&str>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> sqlx::Result<Vec<AttestationRow>> {
    let mut qb =
        sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM attestations WHERE project_id = ");
    qb.push_bind(project_id);
    if let Some(entity_kind) = entity_kind {
        qb.push(" AND entity_kind = ").push_bind(entity_kind);
    }
    if let Some(entity_id) = entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id);
    }
    if let Some(kind) = kind {
        qb.push(" AND kind = ").push_bind(kind);
    }
    if let Some((ts, id)) = cursor {
        qb.push(" AND (ts < ")
            .push_bind(ts.clone())
            .push(" OR (ts = ")
            .push_bind(ts)
            .push(" AND id < ")
            .push_bind(id)
            .push("))");
    }
    qb.push(" ORDER BY ts DESC, id DESC LIMIT ").push_bind(limit);
    qb.build_query_as().fetch_all(ex).await
}

/// Attestation kinds attached to one entity, in arrival order (duplicates
/// preserved — the evaluator treats them as a multiset).
pub async fn kinds_for_entity(
    ex: impl Executor<'_, Database = Sqlite>,
    entity_kind: &str,
    entity_id: &str,
) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT kind FROM attestations WHERE entity_kind = ? AND entity_id = ?
         ORDER BY ts ASC, id ASC",
    )
    .bind(entity_kind)
    .bind(entity_id)
    .fetch_all(ex)
    .await?;
    Ok(rows.into_iter().map(|(k,)| k).collect())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let cursor = encode_cursor("2026-01-01T00:00:00Z", "01ARZ");
        let (created_at, id) = decode_cursor(&cursor).unwrap();
        assert_eq!(created_at, "2026-01-01T00:00:00Z");
        assert_eq!(id, "01ARZ");
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(decode_cursor("!!!not-base64!!!").is_err());
        let no_separator =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("no-separator");
        assert!(decode_cursor(&no_separator).is_err());
    }

    #[test]
    fn limits_clamp() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some(25)), 25);
    }

    #[tokio::test]
    async fn opens_on_disk_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(".proofline").join("proofline.db");
        {
            let storage = Storage::open(&db_path).await.unwrap();
            let mut tx = storage.begin_write().await.unwrap();
            insert_project(
                &mut *tx,
                &ProjectRow {
                    id: "p1".into(),
                    kind: "software".into(),
                    status: "active".into(),
                    description: String::new(),
                    config: "{}".into(),
                    created_at: "2026-01-01T00:00:00Z".into(),
                },
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        // Reopen: migrations are idempotent and data persists.
        let storage = Storage::open(&db_path).await.unwrap();
        assert!(get_project(storage.reader(), "p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn migrations_apply_and_basic_crud_works() {
        let storage = Storage::open_in_memory().await.unwrap();
        let mut tx = storage.begin_write().await.unwrap();
        let row = ProjectRow {
            id: "p1".into(),
            kind: "software".into(),
            status: "active".into(),
            description: String::new(),
            config: "{}".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        insert_project(&mut *tx, &row).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = get_project(storage.reader(), "p1").await.unwrap().unwrap();
        assert_eq!(loaded.kind, "software");
        assert!(get_project(storage.reader(), "p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn task_dep_rows_are_set_like() {
        let storage = Storage::open_in_memory().await.unwrap();
        let mut tx = storage.begin_write().await.unwrap();
        let project = ProjectRow {
            id: "p1".into(),
            kind: "software".into(),
            status: "active".into(),
            description: String::new(),
            config: "{}".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        insert_project(&mut *tx, &project).await.unwrap();
        for id in ["a", "b"] {
            let task = TaskRow {
                id: id.into(),
                project_id: "p1".into(),
                iteration_id: None,
                parent_id: None,
                task_type: "chore".into(),
                title: id.into(),
                description: String::new(),
                status: "planned".into(),
                assignee_id: None,
                work_proof: "{}".into(),
                validation_mode: "none".into(),
                required_attestations: "[]".into(),
                required_threshold: None,
                created_at: "2026-01-01T00:00:00Z".into(),
                updated_at: "2026-01-01T00:00:00Z".into(),
                completed_at: None,
            };
            insert_task(&mut *tx, &task).await.unwrap();
        }
        insert_task_dep(&mut *tx, "p1", "a", "b").await.unwrap();
        insert_task_dep(&mut *tx, "p1", "a", "b").await.unwrap();
        tx.commit().await.unwrap();

        let deps = deps_of(storage.reader(), "a").await.unwrap();
        assert_eq!(deps, vec!["b".to_string()]);
    }
}
