//! SQLite-backed task store and execution log.
//!
//! One database file holds both the task snapshots (as JSON, with an expiry
//! column) and the execution log (one row per entry, ordered by sequence).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tokio::sync::Mutex;

use super::{
    format_timestamp, sequence_entry, ExecutionLog, LogAction, LogEntry, StoreError, TaskMutator,
    TaskStore,
};
use crate::task::{Task, TaskId};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL,
    task_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_expires_at ON tasks(expires_at);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);

CREATE TABLE IF NOT EXISTS task_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    subtask_id TEXT,
    subtask_type TEXT,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT,
    progress REAL NOT NULL,
    UNIQUE (task_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs(task_id, sequence);
"#;

const DB_FILE: &str = "tasks.db";

fn map_sqlite_err(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if matches!(
            err.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
        ) {
            return StoreError::Unavailable(e.to_string());
        }
    }
    StoreError::Internal(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Internal(format!("Task join error: {}", e))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {:?}: {}", s, e)))
}

fn decode_task(json: &str) -> Result<Task, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_task(task: &Task) -> Result<String, StoreError> {
    serde_json::to_string(task).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Raw `task_logs` row before decoding.
struct LogRow {
    task_id: String,
    sequence: i64,
    subtask_id: Option<String>,
    subtask_type: Option<String>,
    timestamp: String,
    action: String,
    details: Option<String>,
    progress: f64,
}

impl LogRow {
    fn into_entry(self) -> Result<LogEntry, StoreError> {
        let task_id = self
            .task_id
            .parse()
            .map_err(|e| StoreError::Serialization(format!("bad task id: {}", e)))?;
        let subtask_id = self
            .subtask_id
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| StoreError::Serialization(format!("bad subtask id: {}", e)))?;
        let action = LogAction::parse(&self.action)
            .ok_or_else(|| StoreError::Serialization(format!("bad action {:?}", self.action)))?;
        Ok(LogEntry {
            task_id,
            sequence: self.sequence as u64,
            subtask_id,
            subtask_type: self.subtask_type.map(Into::into),
            timestamp: parse_timestamp(&self.timestamp)?,
            action,
            details: self.details,
            progress: self.progress,
        })
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    retention: chrono::Duration,
}

impl SqliteStore {
    /// Open (or create) the database under `data_dir`.
    pub async fn open(data_dir: PathBuf, retention: Duration) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&data_dir).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to create data dir {:?}: {}", data_dir, e))
        })?;
        let db_path = data_dir.join(DB_FILE);

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(map_sqlite_err)?;
            conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(join_err)??;

        tracing::info!("SQLite task store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let id = task.id();
        let json = encode_task(task)?;
        let status = task.status().as_str();
        let created_at = format_timestamp(task.created_at());
        let updated_at = format_timestamp(task.updated_at());
        let now = Utc::now();
        let now_str = format_timestamp(now);
        let expires_at = format_timestamp(now + self.retention);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(map_sqlite_err)?;
            // An expired row with the same id is dead; replace it.
            tx.execute(
                "DELETE FROM tasks WHERE id = ?1 AND expires_at <= ?2",
                params![id.to_string(), now_str],
            )
            .map_err(map_sqlite_err)?;
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO tasks (id, status, task_json, created_at, updated_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id.to_string(), status, json, created_at, updated_at, expires_at],
                )
                .map_err(map_sqlite_err)?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(id));
            }
            tx.commit().map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let conn = self.conn.clone();
        let now = format_timestamp(Utc::now());

        let json: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT task_json FROM tasks WHERE id = ?1 AND expires_at > ?2",
                params![id.to_string(), now],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)??;

        match json {
            Some(json) => decode_task(&json),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update(&self, id: TaskId, mutator: TaskMutator) -> Result<Task, StoreError> {
        let conn = self.conn.clone();
        let now = format_timestamp(Utc::now());

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(map_sqlite_err)?;

            let json: Option<String> = tx
                .query_row(
                    "SELECT task_json FROM tasks WHERE id = ?1 AND expires_at > ?2",
                    params![id.to_string(), now],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)?;
            let Some(json) = json else {
                return Err(StoreError::NotFound(id));
            };

            let mut task = decode_task(&json)?;
            mutator(&mut task);

            tx.execute(
                "UPDATE tasks SET status = ?1, task_json = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    task.status().as_str(),
                    encode_task(&task)?,
                    format_timestamp(task.updated_at()),
                    id.to_string()
                ],
            )
            .map_err(map_sqlite_err)?;
            tx.commit().map_err(map_sqlite_err)?;
            Ok(task)
        })
        .await
        .map_err(join_err)?
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let now = format_timestamp(Utc::now());

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let live = conn
                .execute(
                    "DELETE FROM tasks WHERE id = ?1 AND expires_at > ?2",
                    params![id.to_string(), now],
                )
                .map_err(map_sqlite_err)?;
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
                .map_err(map_sqlite_err)?;
            Ok(live > 0)
        })
        .await
        .map_err(join_err)?
    }

    async fn list_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let conn = self.conn.clone();
        let now = format_timestamp(Utc::now());

        let raw: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare("SELECT id FROM tasks WHERE expires_at > ?1 ORDER BY created_at DESC")
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(params![now], |row| row.get::<_, String>(0))
                .map_err(map_sqlite_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)??;

        raw.iter()
            .map(|s| {
                s.parse()
                    .map_err(|e| StoreError::Serialization(format!("bad task id {:?}: {}", s, e)))
            })
            .collect()
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.conn.clone();
        let now = format_timestamp(Utc::now());

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM tasks WHERE expires_at <= ?1", params![now])
                .map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl ExecutionLog for SqliteStore {
    async fn append(&self, entry: LogEntry) -> Result<LogEntry, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(map_sqlite_err)?;
            let task_id = entry.task_id.to_string();

            let previous: Option<(i64, String)> = tx
                .query_row(
                    "SELECT sequence, timestamp FROM task_logs
                     WHERE task_id = ?1 ORDER BY sequence DESC LIMIT 1",
                    params![&task_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(map_sqlite_err)?;
            let previous = match previous {
                Some((seq, ts)) => Some((seq as u64, parse_timestamp(&ts)?)),
                None => None,
            };
            let entry = sequence_entry(entry, previous);

            tx.execute(
                "INSERT INTO task_logs
                 (task_id, sequence, subtask_id, subtask_type, timestamp, action, details, progress)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    task_id,
                    entry.sequence as i64,
                    entry.subtask_id.map(|s| s.to_string()),
                    entry.subtask_type.as_ref().map(|c| c.as_str().to_string()),
                    format_timestamp(entry.timestamp),
                    entry.action.as_str(),
                    entry.details,
                    entry.progress,
                ],
            )
            .map_err(map_sqlite_err)?;
            tx.commit().map_err(map_sqlite_err)?;
            Ok(entry)
        })
        .await
        .map_err(join_err)?
    }

    async fn read_all(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn.clone();

        let rows: Vec<LogRow> = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT task_id, sequence, subtask_id, subtask_type, timestamp, action, details, progress
                     FROM task_logs
                     WHERE task_id = ?1
                     ORDER BY sequence ASC",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(params![task_id.to_string()], |row| {
                    Ok(LogRow {
                        task_id: row.get(0)?,
                        sequence: row.get(1)?,
                        subtask_id: row.get(2)?,
                        subtask_type: row.get(3)?,
                        timestamp: row.get(4)?,
                        action: row.get(5)?,
                        details: row.get(6)?,
                        progress: row.get(7)?,
                    })
                })
                .map_err(map_sqlite_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)??;

        rows.into_iter().map(LogRow::into_entry).collect()
    }

    async fn purge(&self, task_id: TaskId) -> Result<usize, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "DELETE FROM task_logs WHERE task_id = ?1",
                params![task_id.to_string()],
            )
            .map_err(map_sqlite_err)
        })
        .await
        .map_err(join_err)?
    }
}
