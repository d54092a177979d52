//! Task storage and the execution log, with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database holding task snapshots and the execution log
//!
//! The task store keeps the *current* snapshot of each task and expires it
//! after the configured retention. The execution log is a separate,
//! append-only record of lifecycle events; the two are written by the
//! orchestrator and never derived from each other.

mod memory;
mod sqlite;

pub use memory::{InMemoryExecutionLog, InMemoryTaskStore};
pub use sqlite::SqliteStore;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{CapabilityType, Subtask, SubtaskId, Task, TaskId};

/// Errors surfaced by storage backends.
///
/// `Unavailable` and `NotFound` are deliberately distinct: the first is
/// retryable, the second is final.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} already exists")]
    AlreadyExists(TaskId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Read-modify-write step applied atomically by [`TaskStore::update`].
pub type TaskMutator = Box<dyn FnOnce(&mut Task) + Send>;

/// Task store trait - implemented by all storage backends.
///
/// # Contract
/// - `update` applies the mutator to a copy and commits it only on success;
///   concurrent updates of the same id never interleave
/// - expired entries behave exactly like missing ones
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Store a new task; retention starts now.
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    async fn update(&self, id: TaskId, mutator: TaskMutator) -> Result<Task, StoreError>;

    /// Returns `false` if nothing was stored under `id`.
    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Ids of every live task, newest first.
    async fn list_ids(&self) -> Result<Vec<TaskId>, StoreError>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Lifecycle event recorded in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Created,
    Started,
    Progress,
    Completed,
    Failed,
    TaskCompleted,
    TaskFailed,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Created => "created",
            LogAction::Started => "started",
            LogAction::Progress => "progress",
            LogAction::Completed => "completed",
            LogAction::Failed => "failed",
            LogAction::TaskCompleted => "task_completed",
            LogAction::TaskFailed => "task_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "created" => LogAction::Created,
            "started" => LogAction::Started,
            "progress" => LogAction::Progress,
            "completed" => LogAction::Completed,
            "failed" => LogAction::Failed,
            "task_completed" => LogAction::TaskCompleted,
            "task_failed" => LogAction::TaskFailed,
            _ => return None,
        })
    }

    pub fn is_task_terminal(&self) -> bool {
        matches!(self, LogAction::TaskCompleted | LogAction::TaskFailed)
    }
}

/// A single entry in a task's execution log.
///
/// # Invariants (per task, enforced by `ExecutionLog::append`)
/// - `sequence` starts at 0 and increases by one per entry
/// - `timestamp` never decreases with `sequence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub task_id: TaskId,
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_type: Option<CapabilityType>,
    pub timestamp: DateTime<Utc>,
    pub action: LogAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Task progress at the time of the entry
    pub progress: f64,
}

impl LogEntry {
    /// A task-level entry. `sequence` is assigned on append.
    pub fn for_task(task: &Task, action: LogAction, details: Option<String>) -> Self {
        Self {
            task_id: task.id(),
            sequence: 0,
            subtask_id: None,
            subtask_type: None,
            timestamp: Utc::now(),
            action,
            details,
            progress: task.progress(),
        }
    }

    /// A subtask-level entry. `sequence` is assigned on append.
    pub fn for_subtask(
        task: &Task,
        subtask: &Subtask,
        action: LogAction,
        details: Option<String>,
    ) -> Self {
        Self {
            subtask_id: Some(subtask.id()),
            subtask_type: Some(subtask.capability().clone()),
            ..Self::for_task(task, action, details)
        }
    }
}

/// Append-only, per-task execution log.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Append an entry, assigning its sequence and clamping its timestamp so
    /// the per-task order stays monotonic. Failures always propagate.
    async fn append(&self, entry: LogEntry) -> Result<LogEntry, StoreError>;

    /// Every entry for `task_id` in append order (empty if none).
    async fn read_all(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError>;

    /// Remove a task's log entirely (explicit delete only).
    async fn purge(&self, task_id: TaskId) -> Result<usize, StoreError>;
}

/// Fill in `sequence` and clamp `timestamp` against the previous entry.
pub(crate) fn sequence_entry(mut entry: LogEntry, previous: Option<(u64, DateTime<Utc>)>) -> LogEntry {
    match previous {
        Some((sequence, timestamp)) => {
            entry.sequence = sequence + 1;
            if entry.timestamp < timestamp {
                entry.timestamp = timestamp;
            }
        }
        None => entry.sequence = 0,
    }
    entry
}

/// Timestamp format used for stored, lexically comparable times.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    Memory,
    #[default]
    Sqlite,
}

impl StoreType {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Handles to both halves of the storage layer.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub log: Arc<dyn ExecutionLog>,
}

/// Create the task store and execution log for the configured backend.
pub async fn create_stores(
    store_type: StoreType,
    data_dir: PathBuf,
    retention: Duration,
) -> Result<Stores, StoreError> {
    match store_type {
        StoreType::Memory => Ok(Stores {
            tasks: Arc::new(InMemoryTaskStore::new(retention)),
            log: Arc::new(InMemoryExecutionLog::new()),
        }),
        StoreType::Sqlite => {
            let store = Arc::new(SqliteStore::open(data_dir, retention).await?);
            Ok(Stores {
                tasks: store.clone(),
                log: store,
            })
        }
    }
}
