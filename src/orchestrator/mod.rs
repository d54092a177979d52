//! Orchestrator - accepts submissions and drives tasks to completion.
//!
//! # Lifecycle
//! `submit` validates the description, plans it, checks the plan and stores
//! the new task. A valid, non-empty plan gets its own driver (see `run`),
//! which is the only writer of that task's state from then on.
//!
//! # Error boundary
//! Only validation, not-found and storage-unavailable errors reach callers.
//! Everything that goes wrong inside a task (planning, dispatch, timeouts,
//! executor failures) becomes task state instead.

mod run;
mod summary;

pub use summary::build_summary;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{NotificationBus, Subscription};
use crate::executor::Dispatcher;
use crate::planner::Planner;
use crate::store::{ExecutionLog, LogAction, LogEntry, StoreError, Stores, TaskStore};
use crate::task::{
    DependencyGraph, FailurePolicy, PlanningError, SubtaskDraft, Task, TaskContext, TaskId,
};

/// What to do when the planner returns no subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyPlanPolicy {
    /// Complete the task immediately with progress 1.0
    #[default]
    Complete,
    /// Fail the task as a planning error
    Fail,
}

impl EmptyPlanPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "complete" | "completed" => Some(Self::Complete),
            "fail" | "failed" => Some(Self::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_description_chars: usize,
    pub max_subtasks: usize,
    /// Used when a submission does not choose a policy
    pub failure_policy: FailurePolicy,
    pub empty_plan_policy: EmptyPlanPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_description_chars: 10_000,
            max_subtasks: 10,
            failure_policy: FailurePolicy::FailFast,
            empty_plan_policy: EmptyPlanPolicy::Complete,
        }
    }
}

/// Errors that cross the orchestration boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            StoreError::Unavailable(msg) => OrchestratorError::StorageUnavailable(msg),
            other => OrchestratorError::Internal(other.to_string()),
        }
    }
}

/// Handle to a running driver.
struct RunningTask {
    /// Fired on delete; stops the driver without further writes
    abort: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// The task orchestration engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    tasks: Arc<dyn TaskStore>,
    log: Arc<dyn ExecutionLog>,
    bus: Arc<NotificationBus>,
    planner: Arc<dyn Planner>,
    dispatcher: Dispatcher,
    config: OrchestratorConfig,
    running: Arc<Mutex<HashMap<TaskId, RunningTask>>>,
}

impl Orchestrator {
    pub fn new(
        stores: Stores,
        bus: Arc<NotificationBus>,
        planner: Arc<dyn Planner>,
        dispatcher: Dispatcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tasks: stores.tasks,
            log: stores.log,
            bus,
            planner,
            dispatcher,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    /// Submit a new task.
    ///
    /// # Returns
    /// The stored snapshot: Pending with a driver started, Completed for an
    /// accepted empty plan, or Failed when the plan was rejected.
    ///
    /// # Errors
    /// `Validation` for an empty or oversized description, and
    /// `StorageUnavailable` when the task could not be stored or logged.
    pub async fn submit(
        &self,
        description: &str,
        context: TaskContext,
        failure_policy: Option<FailurePolicy>,
    ) -> Result<Task, OrchestratorError> {
        if description.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "Task description cannot be empty".to_string(),
            ));
        }
        let chars = description.chars().count();
        if chars > self.config.max_description_chars {
            return Err(OrchestratorError::Validation(format!(
                "Task description too long ({} chars, maximum is {})",
                chars, self.config.max_description_chars
            )));
        }

        let drafts = self.planner.plan(description, &context);
        let verdict = self.check_plan(&drafts);

        let policy = failure_policy.unwrap_or(self.config.failure_policy);
        let mut task = Task::new(description, context, drafts, policy)
            .map_err(|e| OrchestratorError::Validation(e.to_string()))?;

        self.tasks.create(&task).await?;
        tracing::info!(
            "Task {} created with {} subtasks ({} planner)",
            task.id(),
            task.subtasks().len(),
            self.planner.name()
        );

        if let Err(e) = self.log_created(&task).await {
            tracing::error!("Execution log append failed for new task {}: {}", task.id(), e);
            self.abandon(&mut task, format!("Execution log unavailable: {}", e))
                .await;
            return Err(e.into());
        }

        match verdict {
            Err(planning_error) => {
                tracing::info!("Task {} rejected at planning: {}", task.id(), planning_error);
                self.conclude(&mut task, Err(planning_error.to_string()))
                    .await?;
            }
            Ok(None) => {
                tracing::info!("Task {} has an empty plan; completing", task.id());
                let summary = build_summary(&task);
                self.conclude(&mut task, Ok(summary)).await?;
            }
            Ok(Some(graph)) => {
                self.spawn_driver(task.clone(), graph).await;
            }
        }

        Ok(task)
    }

    /// Validate a plan. `Ok(None)` is an accepted empty plan.
    fn check_plan(
        &self,
        drafts: &[SubtaskDraft],
    ) -> Result<Option<DependencyGraph>, PlanningError> {
        if drafts.is_empty() {
            return match self.config.empty_plan_policy {
                EmptyPlanPolicy::Complete => Ok(None),
                EmptyPlanPolicy::Fail => Err(PlanningError::EmptyPlan),
            };
        }
        if drafts.len() > self.config.max_subtasks {
            return Err(PlanningError::TooManySubtasks {
                count: drafts.len(),
                max: self.config.max_subtasks,
            });
        }
        DependencyGraph::from_drafts(drafts).map(Some)
    }

    async fn log_created(&self, task: &Task) -> Result<(), StoreError> {
        let detail = format!("Task created with {} subtasks", task.subtasks().len());
        let entry = self
            .log
            .append(LogEntry::for_task(task, LogAction::Created, Some(detail)))
            .await?;
        self.bus.publish_log(&entry).await;

        for subtask in task.subtasks() {
            let detail = format!("Planned {} subtask: {}", subtask.capability(), subtask.description());
            let entry = self
                .log
                .append(LogEntry::for_subtask(task, subtask, LogAction::Created, Some(detail)))
                .await?;
            self.bus.publish_log(&entry).await;
        }
        Ok(())
    }

    /// Finish a task that never gets a driver.
    async fn conclude(
        &self,
        task: &mut Task,
        outcome: Result<String, String>,
    ) -> Result<(), OrchestratorError> {
        let (action, detail) = match outcome {
            Ok(result) => {
                task.complete(Some(result))
                    .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                (LogAction::TaskCompleted, "No subtasks to run".to_string())
            }
            Err(error) => {
                task.fail(error.clone())
                    .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                (LogAction::TaskFailed, error)
            }
        };

        let snapshot = task.clone();
        self.tasks
            .update(task.id(), Box::new(move |t: &mut Task| *t = snapshot))
            .await?;
        let entry = self
            .log
            .append(LogEntry::for_task(task, action, Some(detail)))
            .await?;
        self.bus.publish_log(&entry).await;
        self.bus.publish(task).await;
        self.bus.close(task.id()).await;
        Ok(())
    }

    /// Best-effort failure of a task whose log cannot be written.
    async fn abandon(&self, task: &mut Task, error: String) {
        if task.fail(error).is_err() {
            return;
        }
        let snapshot = task.clone();
        if let Err(e) = self
            .tasks
            .update(task.id(), Box::new(move |t: &mut Task| *t = snapshot))
            .await
        {
            tracing::warn!("Could not mark task {} failed: {}", task.id(), e);
        }
        self.bus.publish(task).await;
        self.bus.close(task.id()).await;
    }

    async fn spawn_driver(&self, task: Task, graph: DependencyGraph) {
        let id = task.id();
        let abort = CancellationToken::new();
        self.running.lock().await.insert(
            id,
            RunningTask {
                abort: abort.clone(),
                handle: None,
            },
        );

        let driver = run::Driver::new(self.clone(), task, graph, abort);
        let handle = tokio::spawn(driver.run());

        if let Some(entry) = self.running.lock().await.get_mut(&id) {
            entry.handle = Some(handle);
        }
    }

    async fn driver_finished(&self, id: TaskId) {
        self.running.lock().await.remove(&id);
    }

    /// Number of tasks with a live driver.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Current snapshot of a task.
    pub async fn get_task(&self, id: TaskId) -> Result<Task, OrchestratorError> {
        Ok(self.tasks.get(id).await?)
    }

    /// Ordered execution log of a task.
    ///
    /// The log outlives the snapshot's retention; `NotFound` only when both
    /// are gone.
    pub async fn get_logs(&self, id: TaskId) -> Result<Vec<LogEntry>, OrchestratorError> {
        let logs = self.log.read_all(id).await?;
        if logs.is_empty() {
            self.tasks.get(id).await?;
        }
        Ok(logs)
    }

    /// Ids of every live task, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<TaskId>, OrchestratorError> {
        Ok(self.tasks.list_ids().await?)
    }

    /// Cancel a task (if running) and remove its snapshot and log.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), OrchestratorError> {
        let running = self.running.lock().await.remove(&id);
        if let Some(run) = running {
            run.abort.cancel();
            if let Some(handle) = run.handle {
                if let Err(e) = handle.await {
                    tracing::warn!("Driver for task {} ended abnormally: {}", id, e);
                }
            }
            tracing::info!("Cancelled running task {}", id);
        }

        let existed = self.tasks.delete(id).await?;
        let purged = self.log.purge(id).await?;
        self.bus.close(id).await;

        if !existed && purged == 0 {
            return Err(OrchestratorError::NotFound(id));
        }
        tracing::info!("Deleted task {} ({} log entries)", id, purged);
        Ok(())
    }

    /// Subscribe to snapshots of a task.
    ///
    /// Returns the current snapshot together with the subscription, taken
    /// in that order so no change in between is missed. For a task that is
    /// already terminal the subscription ends immediately.
    pub async fn subscribe(
        &self,
        id: TaskId,
    ) -> Result<(Task, Subscription<Task>), OrchestratorError> {
        let subscription = self.bus.subscribe(id).await;
        let task = match self.tasks.get(id).await {
            Ok(task) => task,
            Err(e) => {
                drop(subscription);
                self.bus.release(id).await;
                return Err(e.into());
            }
        };
        if task.is_terminal() {
            self.bus.close(id).await;
        }
        Ok((task, subscription))
    }

    /// Subscribe to new log entries of a task.
    ///
    /// Returns the history so far and a subscription. Entries appended
    /// between the two may appear in both; callers skip by `sequence`.
    pub async fn subscribe_logs(
        &self,
        id: TaskId,
    ) -> Result<(Vec<LogEntry>, Subscription<LogEntry>), OrchestratorError> {
        let subscription = self.bus.subscribe_logs(id).await;
        let history = match self.get_logs(id).await {
            Ok(history) => history,
            Err(e) => {
                drop(subscription);
                self.bus.release(id).await;
                return Err(e);
            }
        };
        if history.last().is_some_and(|e| e.action.is_task_terminal()) {
            self.bus.close(id).await;
        }
        Ok((history, subscription))
    }

    /// Drop expired task snapshots.
    pub async fn purge_expired(&self) -> Result<usize, OrchestratorError> {
        Ok(self.tasks.purge_expired().await?)
    }

    /// Storage health check.
    pub async fn storage_status(&self) -> Result<(), OrchestratorError> {
        Ok(self.tasks.ping().await?)
    }

    pub fn storage_is_persistent(&self) -> bool {
        self.tasks.is_persistent()
    }
}

#[cfg(test)]
mod tests;
