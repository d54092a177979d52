//! In-memory task store and execution log (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{sequence_entry, ExecutionLog, LogEntry, StoreError, TaskMutator, TaskStore};
use crate::task::{Task, TaskId};

#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    expires_at: DateTime<Utc>,
}

impl StoredTask {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, StoredTask>>>,
    retention: chrono::Duration,
}

impl InMemoryTaskStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::config::DEFAULT_RETENTION_SECS))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&task.id()) {
            if !existing.is_expired(now) {
                return Err(StoreError::AlreadyExists(task.id()));
            }
        }
        tasks.insert(
            task.id(),
            StoredTask {
                task: task.clone(),
                expires_at: now + self.retention,
            },
        );
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let now = Utc::now();
        let tasks = self.tasks.read().await;
        match tasks.get(&id) {
            Some(stored) if !stored.is_expired(now) => Ok(stored.task.clone()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn update(&self, id: TaskId, mutator: TaskMutator) -> Result<Task, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let stored = match tasks.get_mut(&id) {
            Some(stored) if !stored.is_expired(now) => stored,
            _ => return Err(StoreError::NotFound(id)),
        };
        let mut updated = stored.task.clone();
        mutator(&mut updated);
        stored.task = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let now = Utc::now();
        let removed = self.tasks.write().await.remove(&id);
        Ok(matches!(removed, Some(stored) if !stored.is_expired(now)))
    }

    async fn list_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let now = Utc::now();
        let mut live: Vec<(DateTime<Utc>, TaskId)> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| (s.task.created_at(), s.task.id()))
            .collect();
        live.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(live.into_iter().map(|(_, id)| id).collect())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, stored| !stored.is_expired(now));
        Ok(before - tasks.len())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionLog {
    entries: Arc<RwLock<HashMap<TaskId, Vec<LogEntry>>>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn append(&self, entry: LogEntry) -> Result<LogEntry, StoreError> {
        let mut entries = self.entries.write().await;
        let log = entries.entry(entry.task_id).or_default();
        let previous = log.last().map(|e| (e.sequence, e.timestamp));
        let entry = sequence_entry(entry, previous);
        log.push(entry.clone());
        Ok(entry)
    }

    async fn read_all(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn purge(&self, task_id: TaskId) -> Result<usize, StoreError> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&task_id)
            .map(|log| log.len())
            .unwrap_or(0))
    }
}
