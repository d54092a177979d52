//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::replay::ReplaySnapshot;
use crate::store::LogEntry;
use crate::task::{TaskContext, TaskId};

/// Request to submit a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTaskRequest {
    /// The natural-language task description
    pub task: String,

    /// Opaque context passed to every executor
    #[serde(default)]
    pub context: Option<TaskContext>,

    /// `fail_fast` or `continue`; the service default when omitted
    #[serde(default)]
    pub failure_policy: Option<String>,
}

/// Query parameters for replay endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayQuery {
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayResponse {
    pub replay: ReplaySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteTaskResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskListResponse {
    pub status: String,
    pub tasks: Vec<TaskId>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    pub version: String,
    pub storage: StorageHealth,
    pub planner: String,
    /// Capabilities with a registered executor
    pub executors: Vec<String>,
    pub running_tasks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    /// `sqlite` or `memory`
    pub backend: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A command sent by a live replay client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ReplayCommand {
    Pause,
    Resume,
    Speed { value: f64 },
}
