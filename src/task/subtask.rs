//! Subtask definitions.
//!
//! A planner produces [`SubtaskDraft`]s; a task turns each draft into a
//! [`Subtask`] with its own lifecycle. Each subtask has:
//! - A capability type (which executor handles it)
//! - Dependencies on sibling subtasks, by id
//! - Progress, result and error as reported by its executor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{TaskError, TaskStatus};

/// Unique identifier for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for SubtaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The category of work a subtask requires.
///
/// The four canonical members have dedicated variants; anything else is
/// carried as `Custom` so new capabilities need no code change here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CapabilityType {
    WebResearch,
    CodeGeneration,
    DataAnalysis,
    ContentCreation,
    Custom(String),
}

impl CapabilityType {
    pub const CANONICAL: [CapabilityType; 4] = [
        CapabilityType::WebResearch,
        CapabilityType::CodeGeneration,
        CapabilityType::DataAnalysis,
        CapabilityType::ContentCreation,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            CapabilityType::WebResearch => "web_research",
            CapabilityType::CodeGeneration => "code_generation",
            CapabilityType::DataAnalysis => "data_analysis",
            CapabilityType::ContentCreation => "content_creation",
            CapabilityType::Custom(name) => name,
        }
    }

    /// Title-cased label, e.g. "Web Research".
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<String> for CapabilityType {
    fn from(value: String) -> Self {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "web_research" => return CapabilityType::WebResearch,
            "code_generation" => return CapabilityType::CodeGeneration,
            "data_analysis" => return CapabilityType::DataAnalysis,
            "content_creation" => return CapabilityType::ContentCreation,
            _ => {}
        }
        CapabilityType::Custom(normalized)
    }
}

impl From<&str> for CapabilityType {
    fn from(value: &str) -> Self {
        CapabilityType::from(value.to_string())
    }
}

impl From<CapabilityType> for String {
    fn from(value: CapabilityType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a subtask ended up Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No executor registered for the capability (configuration fault)
    Dispatch,
    /// Executor exceeded its deadline
    Timeout,
    /// Executor reported failure
    Execution,
    /// Cancelled because a sibling failed or the task was deleted
    Cancelled,
    /// A dependency failed, so this subtask can never run
    DependencyFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Dispatch => "dispatch",
            FailureKind::Timeout => "timeout",
            FailureKind::Execution => "execution",
            FailureKind::Cancelled => "cancelled",
            FailureKind::DependencyFailed => "dependency_failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned subtask before it becomes part of a Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskDraft {
    pub id: SubtaskId,
    pub capability: CapabilityType,
    pub description: String,
    /// Ids of sibling drafts that must complete first
    pub dependencies: Vec<SubtaskId>,
}

impl SubtaskDraft {
    /// Create a new draft with a fresh id and no dependencies.
    pub fn new(capability: CapabilityType, description: impl Into<String>) -> Self {
        Self {
            id: SubtaskId::new(),
            capability,
            description: description.into(),
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency on another draft.
    pub fn with_dependency(mut self, id: SubtaskId) -> Self {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Add multiple dependencies.
    pub fn with_dependencies(mut self, ids: impl IntoIterator<Item = SubtaskId>) -> Self {
        for id in ids {
            self = self.with_dependency(id);
        }
        self
    }
}

/// One typed unit of work within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    id: SubtaskId,

    #[serde(rename = "type")]
    capability: CapabilityType,

    description: String,

    status: TaskStatus,

    #[serde(default)]
    dependencies: Vec<SubtaskId>,

    progress: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Subtask {
    pub(crate) fn from_draft(draft: SubtaskDraft) -> Self {
        let now = Utc::now();
        Self {
            id: draft.id,
            capability: draft.capability,
            description: draft.description,
            status: TaskStatus::Pending,
            dependencies: draft.dependencies,
            progress: 0.0,
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> SubtaskId {
        self.id
    }

    pub fn capability(&self) -> &CapabilityType {
        &self.capability
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn dependencies(&self) -> &[SubtaskId] {
        &self.dependencies
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// # Precondition
    /// `self.status == Pending`
    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::InProgress;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other,
                to: TaskStatus::InProgress,
            }),
        }
    }

    /// # Precondition
    /// `self.status == InProgress`
    pub fn complete(&mut self, result: String) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::InProgress => {
                self.status = TaskStatus::Completed;
                self.progress = 1.0;
                self.result = Some(result);
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other,
                to: TaskStatus::Completed,
            }),
        }
    }

    /// Mark the subtask Failed. Pending subtasks may fail without starting
    /// (cancellation, failed dependency).
    pub fn fail(&mut self, kind: FailureKind, error: impl Into<String>) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Failed,
            });
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.error_kind = Some(kind);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record executor-reported progress. Returns `true` if the value moved.
    ///
    /// Ignored unless the subtask is running; values are clamped to
    /// [0.0, 1.0) and never decrease.
    pub fn report_progress(&mut self, progress: f64) -> bool {
        if self.status != TaskStatus::InProgress || !progress.is_finite() {
            return false;
        }
        let clamped = progress.clamp(0.0, 0.99);
        if clamped <= self.progress {
            return false;
        }
        self.progress = clamped;
        self.updated_at = Utc::now();
        true
    }
}
