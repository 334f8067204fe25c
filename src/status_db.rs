//! The optional persisted task-status store (spec §1/§6): out of scope as
//! "the hard part" but built here as a real external collaborator, the way
//! `original_source/db/loader.py::DbLoader`/`db/monitor.py::DbMonitor` insert
//! and query task records in Mongo. This rework swaps Mongo for an embedded
//! `rusqlite` database (no external service dependency needed for a
//! single-coordinator-process run, and the schema is identical either way).

use crate::task::{Task, TaskId, TaskType};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StatusDbError {
    #[error("status database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl crate::ErrorClassification for StatusDbError {
    fn is_retryable(&self) -> bool {
        matches!(self, StatusDbError::Sqlite(_))
    }
}

/// Per-task status, per spec §6. `NotAvailable` is the initial status for a
/// DATA-typed task until its producing MOVER completes, mirroring
/// `db/loader.py::DbLoader.insert`'s `'NOT_AVAILABLE'` default for `type ==
/// 'DATA'` records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NotAvailable,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::NotAvailable => "NOT_AVAILABLE",
        }
    }
}

/// A persisted record, per spec §6: `{workflow_id, task_id, type, command,
/// params, dependencies, submission_time, start_time, end_time, status}`.
#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub workflow_id: String,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub command: String,
    pub params: String,
    pub dependencies: String,
}

/// The status-store interface the executor consumes. `NoopStatusStore` is
/// the default (the spec marks this whole surface optional); `SqliteStatusStore`
/// implements it for `madats run --status-db <path>`.
pub trait StatusStore: Send + Sync {
    fn insert_workflow(&self, record: &TaskRecord) -> Result<(), StatusDbError>;
    fn update_status(&self, workflow_id: &str, task_id: TaskId, status: TaskStatus) -> Result<(), StatusDbError>;
    fn mark_started(&self, workflow_id: &str, task_id: TaskId) -> Result<(), StatusDbError>;
    fn mark_finished(&self, workflow_id: &str, task_id: TaskId, status: TaskStatus) -> Result<(), StatusDbError>;
}

/// No-op store: used whenever `--status-db` is not supplied.
#[derive(Default)]
pub struct NoopStatusStore;

impl StatusStore for NoopStatusStore {
    fn insert_workflow(&self, _record: &TaskRecord) -> Result<(), StatusDbError> {
        Ok(())
    }

    fn update_status(&self, _workflow_id: &str, _task_id: TaskId, _status: TaskStatus) -> Result<(), StatusDbError> {
        Ok(())
    }

    fn mark_started(&self, _workflow_id: &str, _task_id: TaskId) -> Result<(), StatusDbError> {
        Ok(())
    }

    fn mark_finished(&self, _workflow_id: &str, _task_id: TaskId, _status: TaskStatus) -> Result<(), StatusDbError> {
        Ok(())
    }
}

/// SQLite-backed store implementing the exact record schema of spec §6.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
}

impl SqliteStatusStore {
    pub fn open(path: &Path) -> Result<SqliteStatusStore, StatusDbError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                workflow_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                type TEXT NOT NULL,
                command TEXT NOT NULL,
                params TEXT NOT NULL,
                dependencies TEXT NOT NULL,
                submission_time TEXT,
                start_time TEXT,
                end_time TEXT,
                status TEXT NOT NULL,
                PRIMARY KEY (workflow_id, task_id)
            )",
            [],
        )?;
        Ok(SqliteStatusStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<SqliteStatusStore, StatusDbError> {
        Self::open(Path::new(":memory:"))
    }
}

impl StatusStore for SqliteStatusStore {
    fn insert_workflow(&self, record: &TaskRecord) -> Result<(), StatusDbError> {
        let status = match record.task_type {
            TaskType::Compute => TaskStatus::Pending,
            TaskType::Data | TaskType::Cleanup => TaskStatus::NotAvailable,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tasks
                (workflow_id, task_id, type, command, params, dependencies, submission_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'), ?7)",
            params![
                record.workflow_id,
                record.task_id.to_string(),
                format!("{:?}", record.task_type),
                record.command,
                record.params,
                record.dependencies,
                status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn update_status(&self, workflow_id: &str, task_id: TaskId, status: TaskStatus) -> Result<(), StatusDbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?1 WHERE workflow_id = ?2 AND task_id = ?3",
            params![status.as_str(), workflow_id, task_id.to_string()],
        )?;
        Ok(())
    }

    fn mark_started(&self, workflow_id: &str, task_id: TaskId) -> Result<(), StatusDbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?1, start_time = datetime('now')
             WHERE workflow_id = ?2 AND task_id = ?3",
            params![TaskStatus::Running.as_str(), workflow_id, task_id.to_string()],
        )?;
        Ok(())
    }

    fn mark_finished(&self, workflow_id: &str, task_id: TaskId, status: TaskStatus) -> Result<(), StatusDbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?1, end_time = datetime('now')
             WHERE workflow_id = ?2 AND task_id = ?3",
            params![status.as_str(), workflow_id, task_id.to_string()],
        )?;
        Ok(())
    }
}

/// Builds the record for one task ahead of insertion, materializing its
/// params to a space-joined string the way
/// `db/loader.py::DbLoader.insert` joins `task.get_remapped_params()`.
pub fn record_for(
    workflow_id: &str,
    task: &Task,
    vds: &crate::vds::VirtualDataSpace,
    dag: &crate::dag::Dag,
) -> TaskRecord {
    let params = task
        .params
        .iter()
        .map(|p| match p {
            crate::task::Param::Literal(s) => s.clone(),
            crate::task::Param::Ref(vdo_id) => vds
                .vdo(*vdo_id)
                .map(|v| v.abs_path().to_string())
                .unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    let dependencies = dag
        .predecessors(task.id)
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",");

    TaskRecord {
        workflow_id: workflow_id.to_string(),
        task_id: task.id,
        task_type: task.task_type,
        command: task.command.clone(),
        params,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::setup_test_logging;
    use crate::storage::{TierInfo, YamlStorageCatalog};
    use crate::vds::VirtualDataSpace;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn vds_with_task() -> (VirtualDataSpace, TaskId) {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "scratch".to_string(),
            TierInfo {
                mount: "/s".to_string(),
                persist: "short_term".to_string(),
                interface: "posix".to_string(),
                bandwidth: 700,
            },
        );
        let mut vds = VirtualDataSpace::new(
            setup_test_logging(),
            Arc::new(YamlStorageCatalog::from_tiers(tiers)),
        );
        let t = vds.register_task(Task::new_compute("t1", "cat"));
        (vds, t)
    }

    #[test]
    fn sqlite_store_round_trips_status() {
        let (vds, task_id) = vds_with_task();
        let dag = crate::dag::build(&vds).unwrap();
        let task = vds.task(task_id).unwrap();
        let record = record_for("wf-1", task, &vds, &dag);

        let store = SqliteStatusStore::in_memory().unwrap();
        store.insert_workflow(&record).unwrap();
        store.mark_started("wf-1", task_id).unwrap();
        store.mark_finished("wf-1", task_id, TaskStatus::Completed).unwrap();

        let conn = store.conn.lock().unwrap();
        let status: String = conn
            .query_row(
                "SELECT status FROM tasks WHERE workflow_id = ?1 AND task_id = ?2",
                params!["wf-1", task_id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "COMPLETED");
    }

    #[test]
    fn noop_store_never_errors() {
        let store = NoopStatusStore;
        let id = TaskId::new();
        store.update_status("wf", id, TaskStatus::Failed).unwrap();
    }
}
