use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, ffi, params};

use super::models::*;
use super::reorder::{self, StoredPosition};
use crate::errors::PositionError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads. The mutex also serializes every move made
/// through one process.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Startup and tests only.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct BoardDb {
    conn: Connection,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub status_id: Option<i64>,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.busy_timeout(std::time::Duration::from_millis(250))
            .context("Failed to set busy timeout")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS organizations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS task_statuses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    sort_order INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                    project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                    status_id INTEGER REFERENCES task_statuses(id) ON DELETE SET NULL,
                    parent_id INTEGER REFERENCES tasks(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS task_positions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    context TEXT NOT NULL CHECK (context IN ('project', 'all_projects', 'kanban_status')),
                    context_id INTEGER,
                    position INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(organization_id, task_id, context, position)
                );

                CREATE INDEX IF NOT EXISTS idx_projects_org ON projects(organization_id);
                CREATE INDEX IF NOT EXISTS idx_task_statuses_org ON task_statuses(organization_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_org ON tasks(organization_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);
                CREATE INDEX IF NOT EXISTS idx_task_positions_group
                    ON task_positions(organization_id, context, context_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_task_positions_slot
                    ON task_positions(organization_id, context, COALESCE(context_id, 0), position);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_task_positions_member
                    ON task_positions(organization_id, context, COALESCE(context_id, 0), task_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Organizations ─────────────────────────────────────────────────

    pub fn create_organization(&self, name: &str) -> Result<Organization> {
        self.conn
            .execute("INSERT INTO organizations (name) VALUES (?1)", params![name])
            .context("Failed to insert organization")?;
        let id = self.conn.last_insert_rowid();
        self.get_organization(id)?
            .context("Organization not found after insert")
    }

    pub fn list_organizations(&self) -> Result<Vec<Organization>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM organizations ORDER BY id")
            .context("Failed to prepare list_organizations")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .context("Failed to query organizations")?;
        let mut orgs = Vec::new();
        for row in rows {
            orgs.push(row.context("Failed to read organization row")?);
        }
        Ok(orgs)
    }

    pub fn get_organization(&self, id: i64) -> Result<Option<Organization>> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM organizations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query organization")
    }

    fn require_organization(&self, id: i64) -> Result<()> {
        if self.get_organization(id)?.is_none() {
            return Err(PositionError::NotFound(format!("Organization {} not found", id)).into());
        }
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, organization_id: i64, name: &str) -> Result<Project> {
        self.require_organization(organization_id)?;
        self.conn
            .execute(
                "INSERT INTO projects (organization_id, name) VALUES (?1, ?2)",
                params![organization_id, name],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(organization_id, id)?
            .context("Project not found after insert")
    }

    pub fn list_projects(&self, organization_id: i64) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, organization_id, name, created_at FROM projects
                 WHERE organization_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(params![organization_id], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, organization_id: i64, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, organization_id, name, created_at FROM projects
                 WHERE id = ?1 AND organization_id = ?2",
                params![id, organization_id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        organization_id: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query project")
    }

    // ── Task statuses (kanban columns) ────────────────────────────────

    pub fn create_status(&self, organization_id: i64, name: &str, sort_order: i32) -> Result<TaskStatus> {
        self.require_organization(organization_id)?;
        self.conn
            .execute(
                "INSERT INTO task_statuses (organization_id, name, sort_order) VALUES (?1, ?2, ?3)",
                params![organization_id, name, sort_order],
            )
            .context("Failed to insert task status")?;
        let id = self.conn.last_insert_rowid();
        self.get_status(organization_id, id)?
            .context("Task status not found after insert")
    }

    pub fn list_statuses(&self, organization_id: i64) -> Result<Vec<TaskStatus>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, organization_id, name, sort_order FROM task_statuses
                 WHERE organization_id = ?1 ORDER BY sort_order, id",
            )
            .context("Failed to prepare list_statuses")?;
        let rows = stmt
            .query_map(params![organization_id], |row| {
                Ok(TaskStatus {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    sort_order: row.get(3)?,
                })
            })
            .context("Failed to query task statuses")?;
        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row.context("Failed to read task status row")?);
        }
        Ok(statuses)
    }

    pub fn get_status(&self, organization_id: i64, id: i64) -> Result<Option<TaskStatus>> {
        self.conn
            .query_row(
                "SELECT id, organization_id, name, sort_order FROM task_statuses
                 WHERE id = ?1 AND organization_id = ?2",
                params![id, organization_id],
                |row| {
                    Ok(TaskStatus {
                        id: row.get(0)?,
                        organization_id: row.get(1)?,
                        name: row.get(2)?,
                        sort_order: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query task status")
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(&self, organization_id: i64, task: &NewTask) -> Result<Task> {
        self.require_organization(organization_id)?;
        if let Some(project_id) = task.project_id {
            if self.get_project(organization_id, project_id)?.is_none() {
                return Err(PositionError::NotFound(format!("Project {} not found", project_id)).into());
            }
        }
        if let Some(status_id) = task.status_id {
            if self.get_status(organization_id, status_id)?.is_none() {
                return Err(PositionError::NotFound(format!("Task status {} not found", status_id)).into());
            }
        }
        if let Some(parent_id) = task.parent_id {
            if self.get_task(organization_id, parent_id)?.is_none() {
                return Err(PositionError::task_not_found(parent_id, organization_id).into());
            }
        }

        self.conn
            .execute(
                "INSERT INTO tasks (organization_id, project_id, status_id, parent_id, title)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    organization_id,
                    task.project_id,
                    task.status_id,
                    task.parent_id,
                    task.title
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(organization_id, id)?
            .context("Task not found after insert")
    }

    pub fn get_task(&self, organization_id: i64, id: i64) -> Result<Option<Task>> {
        self.conn
            .query_row(
                "SELECT id, organization_id, project_id, status_id, parent_id, title, created_at, updated_at
                 FROM tasks WHERE id = ?1 AND organization_id = ?2",
                params![id, organization_id],
                task_from_row,
            )
            .optional()
            .context("Failed to query task")
    }

    /// Tasks visible in a context, ordered by id. `None` lists every task of
    /// the organization.
    pub fn list_tasks(&self, organization_id: i64, scope: Option<&ContextKey>) -> Result<Vec<Task>> {
        let (filter, context_id) = match scope.map(|k| (k.context(), k.context_id())) {
            None => ("", None),
            Some((PositionContext::AllProjects, _)) => (" AND project_id IS NOT NULL", None),
            Some((PositionContext::Project, id)) => (" AND project_id = ?2", id),
            Some((PositionContext::KanbanStatus, id)) => (" AND status_id = ?2", id),
        };
        let sql = format!(
            "SELECT id, organization_id, project_id, status_id, parent_id, title, created_at, updated_at
             FROM tasks WHERE organization_id = ?1{} ORDER BY id",
            filter
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_tasks")?;
        let rows = match context_id {
            Some(id) => stmt.query_map(params![organization_id, id], task_from_row),
            None => stmt.query_map(params![organization_id], task_from_row),
        }
        .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?);
        }
        Ok(tasks)
    }

    /// Tasks of a context in board order: positioned first by position, the
    /// rest by ascending id.
    pub fn list_tasks_ordered(&self, organization_id: i64, key: &ContextKey) -> Result<Vec<Task>> {
        self.ensure_context_owned(organization_id, key)?;
        let tasks = self.list_tasks(organization_id, Some(key))?;
        let positions = read_group(&self.conn, organization_id, key)?
            .into_iter()
            .map(|r| (r.task_id, r.position))
            .collect();
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        let order = reorder::fallback_order(&positions, &ids);

        let mut by_id: std::collections::HashMap<i64, Task> =
            tasks.into_iter().map(|t| (t.id, t)).collect();
        Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    /// Delete a task and its subtasks, then close the gaps they leave in
    /// every ordered group they were positioned in.
    pub fn delete_task(&self, organization_id: i64, id: i64) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let groups = groups_of_subtree(&tx, organization_id, id)?;
        let count = tx
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND organization_id = ?2",
                params![id, organization_id],
            )
            .context("Failed to delete task")?;
        if count == 0 {
            return Ok(false);
        }

        for key in &groups {
            let written = compact_group(&tx, organization_id, key)?;
            tracing::debug!(task_id = id, group = %key, written, "compacted group after delete");
        }

        tx.commit().context("Failed to commit task delete")?;
        Ok(true)
    }

    /// Move a task to another kanban column. The task leaves its old column's
    /// ordering (which is compacted) and shows up unpositioned in the new one.
    pub fn set_task_status(&self, organization_id: i64, id: i64, status_id: Option<i64>) -> Result<Task> {
        let task = self
            .get_task(organization_id, id)?
            .ok_or_else(|| PositionError::task_not_found(id, organization_id))?;
        if let Some(sid) = status_id {
            if self.get_status(organization_id, sid)?.is_none() {
                return Err(PositionError::NotFound(format!("Task status {} not found", sid)).into());
            }
        }
        if task.status_id == status_id {
            return Ok(task);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE tasks SET status_id = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status_id, id],
        )
        .context("Failed to update task status")?;

        if let Some(old) = task.status_id {
            let key = ContextKey::kanban_status(old);
            tx.execute(
                "DELETE FROM task_positions
                 WHERE organization_id = ?1 AND task_id = ?2 AND context = ?3 AND context_id = ?4",
                params![organization_id, id, key.context().as_str(), old],
            )
            .context("Failed to drop kanban position")?;
            compact_group(&tx, organization_id, &key)?;
        }

        tx.commit().context("Failed to commit status change")?;
        self.get_task(organization_id, id)?
            .context("Task not found after status change")
    }

    // ── Positions ─────────────────────────────────────────────────────

    /// All stored positions of one group, ascending.
    pub fn list_positions(&self, organization_id: i64, key: &ContextKey) -> Result<Vec<TaskPosition>> {
        self.ensure_context_owned(organization_id, key)?;
        let rows = read_group(&self.conn, organization_id, key)?;
        Ok(rows
            .into_iter()
            .map(|r| TaskPosition {
                task_id: r.task_id,
                position: r.position,
            })
            .collect())
    }

    /// Place `req.task_id` at `req.position` within its group and persist
    /// every shifted, renumbered or synthesized row in one transaction.
    pub fn move_position(&self, organization_id: i64, req: &MoveRequest) -> Result<MoveOutcome> {
        let key = req.validate()?;
        self.ensure_context_owned(organization_id, &key)?;
        self.ensure_tasks_in_group(
            organization_id,
            &key,
            std::iter::once(req.task_id).chain(req.task_ids.iter().copied()),
        )?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let stored = read_group(&tx, organization_id, &key)?;
        let mut entries = reorder::resolve_group(&stored, &req.task_ids);
        if !entries.iter().any(|e| e.task_id() == req.task_id) {
            entries.push(PositionEntry::Derived {
                task_id: req.task_id,
                position: entries.len() as i32 + 1,
            });
        }

        let plan = reorder::apply_move(&mut entries, req.task_id, req.position)
            .context("Moved task missing from resolved group")?;
        let written = persist_group(&tx, organization_id, &key, &entries)?;
        tx.commit().map_err(write_error)?;

        tracing::debug!(
            organization_id,
            group = %key,
            task_id = plan.task_id,
            from = plan.from,
            to = plan.to,
            written,
            "moved task position"
        );

        Ok(MoveOutcome {
            positions: entries.iter().map(PositionEntry::as_pair).collect(),
            written,
        })
    }

    fn ensure_context_owned(&self, organization_id: i64, key: &ContextKey) -> Result<()> {
        match (key.context(), key.context_id()) {
            (PositionContext::Project, Some(id)) => {
                if self.get_project(organization_id, id)?.is_none() {
                    return Err(PositionError::NotFound(format!(
                        "Project {} not found in organization {}",
                        id, organization_id
                    ))
                    .into());
                }
            }
            (PositionContext::KanbanStatus, Some(id)) => {
                if self.get_status(organization_id, id)?.is_none() {
                    return Err(PositionError::NotFound(format!(
                        "Task status {} not found in organization {}",
                        id, organization_id
                    ))
                    .into());
                }
            }
            _ => self.require_organization(organization_id)?,
        }
        Ok(())
    }

    /// Every id must be a task of the organization that belongs to the group:
    /// its project for `project`, its column for `kanban_status`, any project
    /// for `all_projects`.
    fn ensure_tasks_in_group(
        &self,
        organization_id: i64,
        key: &ContextKey,
        ids: impl Iterator<Item = i64>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT project_id, status_id FROM tasks WHERE id = ?1 AND organization_id = ?2")
            .context("Failed to prepare task membership check")?;
        for id in ids {
            let scope: Option<(Option<i64>, Option<i64>)> = stmt
                .query_row(params![id, organization_id], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()
                .context("Failed to check task membership")?;
            let Some((project_id, status_id)) = scope else {
                return Err(PositionError::task_not_found(id, organization_id).into());
            };
            let member = match key.context() {
                PositionContext::Project => project_id.is_some() && project_id == key.context_id(),
                PositionContext::KanbanStatus => status_id.is_some() && status_id == key.context_id(),
                PositionContext::AllProjects => project_id.is_some(),
            };
            if !member {
                return Err(PositionError::NotFound(format!("Task {} is not in group {}", id, key)).into());
            }
        }
        Ok(())
    }
}

// ── Group helpers (usable on a connection or an open transaction) ─────

fn read_group(conn: &Connection, organization_id: i64, key: &ContextKey) -> Result<Vec<StoredPosition>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, task_id, position FROM task_positions
             WHERE organization_id = ?1 AND context = ?2 AND context_id IS ?3
             ORDER BY position, task_id",
        )
        .map_err(|e| read_error(e, "Failed to prepare read_group"))?;
    let rows = stmt
        .query_map(
            params![organization_id, key.context().as_str(), key.context_id()],
            |row| {
                Ok(StoredPosition {
                    row_id: row.get(0)?,
                    task_id: row.get(1)?,
                    position: row.get(2)?,
                })
            },
        )
        .map_err(|e| read_error(e, "Failed to query task positions"))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| read_error(e, "Failed to read task position row"))?);
    }
    Ok(out)
}

/// Write every dirty entry of a group. Rows that change slot are parked at a
/// negative placeholder first so the slot index never sees two tasks at once.
fn persist_group(
    conn: &Connection,
    organization_id: i64,
    key: &ContextKey,
    entries: &[PositionEntry],
) -> Result<usize> {
    let dirty: Vec<&PositionEntry> = entries.iter().filter(|e| e.is_dirty()).collect();

    for entry in &dirty {
        if let PositionEntry::Stored { row_id, .. } = entry {
            conn.execute(
                "UPDATE task_positions SET position = -id WHERE id = ?1",
                params![row_id],
            )
            .map_err(write_error)?;
        }
    }

    for entry in &dirty {
        match entry {
            PositionEntry::Stored {
                row_id, position, ..
            } => {
                conn.execute(
                    "UPDATE task_positions SET position = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![position, row_id],
                )
                .map_err(write_error)?;
            }
            PositionEntry::Derived { task_id, position } => {
                conn.execute(
                    "INSERT INTO task_positions (organization_id, task_id, context, context_id, position)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        organization_id,
                        task_id,
                        key.context().as_str(),
                        key.context_id(),
                        position
                    ],
                )
                .map_err(write_error)?;
            }
        }
    }

    Ok(dirty.len())
}

fn compact_group(conn: &Connection, organization_id: i64, key: &ContextKey) -> Result<usize> {
    let stored = read_group(conn, organization_id, key)?;
    let entries = reorder::resolve_group(&stored, &[]);
    persist_group(conn, organization_id, key, &entries)
}

fn groups_of_subtree(conn: &Connection, organization_id: i64, task_id: i64) -> Result<Vec<ContextKey>> {
    let mut stmt = conn
        .prepare(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT ?1
                 UNION ALL
                 SELECT t.id FROM tasks t JOIN subtree s ON t.parent_id = s.id
             )
             SELECT DISTINCT context, context_id FROM task_positions
             WHERE organization_id = ?2 AND task_id IN (SELECT id FROM subtree)",
        )
        .context("Failed to prepare groups_of_subtree")?;
    let rows = stmt
        .query_map(params![task_id, organization_id], |row| {
            Ok(GroupRow {
                context: row.get(0)?,
                context_id: row.get(1)?,
            })
        })
        .context("Failed to query task groups")?;
    let mut keys = Vec::new();
    for row in rows {
        keys.push(row.context("Failed to read group row")?.into_key()?);
    }
    Ok(keys)
}

/// Map write failures to the typed errors callers act on. Uniqueness
/// violations and lock contention mean another writer got there first.
fn write_error(err: rusqlite::Error) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
        match ffi_err.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return PositionError::Conflict(err.to_string()).into();
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return PositionError::NotFound(format!("Referenced task no longer exists: {}", err))
                    .into();
            }
            _ => {}
        }
    }
    read_error(err, "Failed to write task positions")
}

/// Lock contention while reading a group is a lost race, not a broken store.
fn read_error(err: rusqlite::Error, what: &'static str) -> anyhow::Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            PositionError::Conflict(err.to_string()).into()
        }
        _ => anyhow::Error::new(err).context(what),
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        project_id: row.get(2)?,
        status_id: row.get(3)?,
        parent_id: row.get(4)?,
        title: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row for `(context, context_id)` before parsing the context string.
struct GroupRow {
    context: String,
    context_id: Option<i64>,
}

impl GroupRow {
    fn into_key(self) -> Result<ContextKey> {
        let context = PositionContext::from_str(&self.context)
            .context("Failed to parse stored position context")?;
        Ok(ContextKey::new(context, self.context_id)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
