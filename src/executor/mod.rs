//! Executors - the pluggable workers that run subtasks.
//!
//! An [`Executor`] handles exactly one capability type. Executors are
//! registered in an [`ExecutorRegistry`] keyed by capability, and the
//! [`Dispatcher`] looks them up, enforces the per-call deadline and
//! classifies the outcome.

mod simulated;

#[cfg(test)]
pub(crate) mod testing;

pub use simulated::SimulatedExecutor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::task::{CapabilityType, FailureKind, Subtask, SubtaskId, TaskContext, TaskId};

/// Error reported by an executor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("Execution cancelled")]
    Cancelled,
}

/// Result of a completed dependency, handed to downstream executors.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamResult {
    pub subtask_id: SubtaskId,
    pub capability: CapabilityType,
    pub result: String,
}

/// Progress reported by a running executor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub subtask_id: SubtaskId,
    pub progress: f64,
}

/// Handle executors use to report intermediate progress.
///
/// Reports never block: if the orchestrator is behind, the update is
/// dropped (a later report or the completion supersedes it).
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    subtask_id: SubtaskId,
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(subtask_id: SubtaskId, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { subtask_id, tx }
    }

    /// A reporter whose updates go nowhere.
    pub fn detached(subtask_id: SubtaskId) -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { subtask_id, tx }
    }

    pub fn report(&self, progress: f64) {
        let _ = self.tx.try_send(ProgressUpdate {
            subtask_id: self.subtask_id,
            progress,
        });
    }
}

/// Everything an executor may read while running a subtask.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: TaskId,
    /// Description of the parent task
    pub task_description: String,
    pub context: TaskContext,
    /// Results of the subtask's dependencies, in dependency order
    pub upstream: Vec<UpstreamResult>,
    /// Cancelled when the task fails fast or is deleted
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

/// A worker capable of performing one category of subtask.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The capability this executor handles.
    fn capability(&self) -> CapabilityType;

    /// Human-readable name, for logs.
    fn name(&self) -> &str;

    /// Run the subtask and return its textual result.
    ///
    /// Long-running executors should observe `ctx.cancel` and return
    /// [`ExecutorError::Cancelled`] promptly once it fires.
    async fn execute(&self, subtask: &Subtask, ctx: ExecutionContext)
        -> Result<String, ExecutorError>;
}

/// Mapping from capability type to the executor that handles it.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<CapabilityType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a simulated executor for each canonical capability.
    pub fn simulated(step: Duration) -> Self {
        let mut registry = Self::new();
        for capability in CapabilityType::CANONICAL {
            registry.register(Arc::new(SimulatedExecutor::new(capability, step)));
        }
        registry
    }

    /// Register an executor, replacing any previous one for its capability.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let capability = executor.capability();
        if let Some(previous) = self.executors.insert(capability.clone(), executor) {
            tracing::debug!(
                "Replaced executor {} for capability {}",
                previous.name(),
                capability
            );
        }
    }

    pub fn get(&self, capability: &CapabilityType) -> Option<Arc<dyn Executor>> {
        self.executors.get(capability).cloned()
    }

    /// Registered capabilities, sorted by name.
    pub fn capabilities(&self) -> Vec<CapabilityType> {
        let mut list: Vec<_> = self.executors.keys().cloned().collect();
        list.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        list
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// Classified outcome of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(String),
    Failed { kind: FailureKind, message: String },
}

impl DispatchOutcome {
    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        DispatchOutcome::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Looks up executors and runs them under a deadline.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ExecutorRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: ExecutorRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `subtask` on the executor registered for its capability.
    ///
    /// Never panics and never returns early without an outcome. Cancellation
    /// is cooperative: the executor watches `ctx.cancel` and answers with
    /// [`ExecutorError::Cancelled`], while the timeout bounds how long an
    /// executor that ignores it can run.
    pub async fn dispatch(&self, subtask: &Subtask, ctx: ExecutionContext) -> DispatchOutcome {
        let Some(executor) = self.registry.get(subtask.capability()) else {
            return DispatchOutcome::failed(
                FailureKind::Dispatch,
                format!(
                    "No executor available for subtask type: {}",
                    subtask.capability()
                ),
            );
        };

        tracing::debug!(
            "Dispatching subtask {} ({}) to {}",
            subtask.id(),
            subtask.capability(),
            executor.name()
        );

        match tokio::time::timeout(self.timeout, executor.execute(subtask, ctx)).await {
            Ok(Ok(result)) => DispatchOutcome::Completed(result),
            Ok(Err(ExecutorError::Cancelled)) => {
                DispatchOutcome::failed(FailureKind::Cancelled, "Execution cancelled")
            }
            Ok(Err(ExecutorError::Failed(message))) => {
                DispatchOutcome::failed(FailureKind::Execution, message)
            }
            Err(_) => DispatchOutcome::failed(
                FailureKind::Timeout,
                format!(
                    "Executor {} timed out after {}s",
                    executor.name(),
                    self.timeout.as_secs_f64()
                ),
            ),
        }
    }
}
