//! Notification bus - per-task fan-out of task snapshots and log entries.
//!
//! Each task id gets its own broadcast channel per topic, created lazily on
//! first subscribe. Every subscriber has an independent bounded buffer; a
//! subscriber that falls behind loses its oldest undelivered items (the
//! newest snapshot always supersedes older ones) and never slows the
//! publisher or other subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::store::LogEntry;
use crate::task::{Task, TaskId};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

struct Topic<T: Clone> {
    channels: RwLock<HashMap<TaskId, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> Topic<T> {
    fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    async fn publish(&self, id: TaskId, item: T) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&id) {
            Some(sender) => sender.send(item).unwrap_or(0),
            None => 0,
        }
    }

    async fn subscribe(&self, id: TaskId) -> broadcast::Receiver<T> {
        let mut channels = self.channels.write().await;
        channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    async fn close(&self, id: TaskId) {
        self.channels.write().await.remove(&id);
    }

    async fn release(&self, id: TaskId) {
        let mut channels = self.channels.write().await;
        if channels.get(&id).is_some_and(|s| s.receiver_count() == 0) {
            channels.remove(&id);
        }
    }

    async fn subscriber_count(&self, id: TaskId) -> usize {
        self.channels
            .read()
            .await
            .get(&id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

/// A live subscription to one task's stream.
pub struct Subscription<T: Clone> {
    task_id: TaskId,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next item, or `None` once the stream is closed and drained.
    ///
    /// Items dropped because this subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "Subscriber for task {} lagged, skipped {} items",
                        self.task_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Pub/sub hub for task snapshots and execution log entries.
pub struct NotificationBus {
    tasks: Topic<Task>,
    logs: Topic<LogEntry>,
}

impl NotificationBus {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            tasks: Topic::new(subscriber_buffer),
            logs: Topic::new(subscriber_buffer),
        }
    }

    pub fn shared(subscriber_buffer: usize) -> Arc<Self> {
        Arc::new(Self::new(subscriber_buffer))
    }

    /// Broadcast a task snapshot; returns how many subscribers received it.
    pub async fn publish(&self, task: &Task) -> usize {
        self.tasks.publish(task.id(), task.clone()).await
    }

    pub async fn subscribe(&self, task_id: TaskId) -> Subscription<Task> {
        Subscription {
            task_id,
            rx: self.tasks.subscribe(task_id).await,
        }
    }

    /// Broadcast an execution log entry.
    pub async fn publish_log(&self, entry: &LogEntry) -> usize {
        self.logs.publish(entry.task_id, entry.clone()).await
    }

    pub async fn subscribe_logs(&self, task_id: TaskId) -> Subscription<LogEntry> {
        Subscription {
            task_id,
            rx: self.logs.subscribe(task_id).await,
        }
    }

    /// End every stream for `task_id`. Subscribers drain what is buffered,
    /// then see end-of-stream.
    pub async fn close(&self, task_id: TaskId) {
        self.tasks.close(task_id).await;
        self.logs.close(task_id).await;
    }

    /// Forget the streams for `task_id` that nobody listens to any more.
    /// Live subscribers are left alone.
    pub async fn release(&self, task_id: TaskId) {
        self.tasks.release(task_id).await;
        self.logs.release(task_id).await;
    }

    pub async fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.tasks.subscriber_count(task_id).await + self.logs.subscriber_count(task_id).await
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}
