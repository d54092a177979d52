//! Core Task type and its lifecycle.
//!
//! # Invariants
//! - `progress` never decreases over the lifetime of a task
//! - `status == Completed` implies `progress == 1.0` and every subtask completed
//! - `status == Failed` implies a failed subtask or a rejected plan
//! - `id` is unique within a store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subtask::{Subtask, SubtaskDraft, SubtaskId};

/// Opaque key-value bag supplied with a submission.
pub type TaskContext = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within a store
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task or subtask in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> InProgress -> Completed
///                       \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `true` if the status is Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a task when one of its subtasks fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the task at the first subtask failure and cancel siblings.
    #[default]
    FailFast,
    /// Keep unaffected siblings running; fail once nothing else can progress.
    ContinueOnFailure,
}

impl FailurePolicy {
    /// Parse from a config or request value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "failfast" => Some(Self::FailFast),
            "continue" | "continue_on_failure" | "continue-on-failure" => {
                Some(Self::ContinueOnFailure)
            }
            _ => None,
        }
    }
}

/// A user-submitted unit of work decomposed into subtasks.
///
/// Fields are private; the orchestrator drives state only through the
/// explicit transitions below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    id: TaskId,

    description: String,

    #[serde(default)]
    context: TaskContext,

    status: TaskStatus,

    /// Fraction of completed subtasks in [0.0, 1.0]
    progress: f64,

    subtasks: Vec<Subtask>,

    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    #[serde(default)]
    failure_policy: FailurePolicy,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task from planner drafts.
    ///
    /// # Preconditions
    /// - `description` is non-empty after trimming
    ///
    /// # Postconditions
    /// - `status == Pending`, `progress == 0.0`
    /// - one pending subtask per draft, in draft order
    pub fn new(
        description: impl Into<String>,
        context: TaskContext,
        drafts: Vec<SubtaskDraft>,
        failure_policy: FailurePolicy,
    ) -> Result<Self, TaskError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription);
        }

        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            description,
            context,
            status: TaskStatus::Pending,
            progress: 0.0,
            subtasks: drafts.into_iter().map(Subtask::from_draft).collect(),
            result: None,
            error: None,
            failure_policy,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn subtask(&self, id: SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id() == id)
    }

    pub fn subtask_mut(&mut self, id: SubtaskId) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id() == id)
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of subtasks that reached Completed.
    pub fn completed_count(&self) -> usize {
        self.subtasks
            .iter()
            .filter(|s| s.status() == TaskStatus::Completed)
            .count()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Recompute progress as completed / total.
    ///
    /// # Postcondition
    /// `progress` is the max of its previous value and the new ratio.
    pub fn recompute_progress(&mut self) -> f64 {
        if !self.subtasks.is_empty() {
            let ratio = self.completed_count() as f64 / self.subtasks.len() as f64;
            self.progress = self.progress.max(ratio.clamp(0.0, 1.0));
        }
        self.touch();
        self.progress
    }

    // State transitions - explicit and validated

    /// Transition the task to InProgress.
    ///
    /// # Precondition
    /// `self.status == Pending`
    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::InProgress;
                self.touch();
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other,
                to: TaskStatus::InProgress,
            }),
        }
    }

    /// Transition the task to Completed.
    ///
    /// # Preconditions
    /// - task is not terminal
    /// - every subtask is Completed (vacuously true with no subtasks)
    pub fn complete(&mut self, result: Option<String>) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Completed,
            });
        }
        if self.completed_count() != self.subtasks.len() {
            return Err(TaskError::IncompleteSubtasks {
                completed: self.completed_count(),
                total: self.subtasks.len(),
            });
        }
        self.status = TaskStatus::Completed;
        self.progress = 1.0;
        self.result = result;
        self.touch();
        Ok(())
    }

    /// Transition the task to Failed with a human-readable error.
    ///
    /// # Precondition
    /// task is not terminal
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Failed,
            });
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.touch();
        Ok(())
    }
}

/// Errors that can occur during task transitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Task description cannot be empty")]
    EmptyDescription,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Only {completed} of {total} subtasks are completed")]
    IncompleteSubtasks { completed: usize, total: usize },
}
