//! Replay - re-emit a task's execution log, as a snapshot or paced live.
//!
//! Replay is read-only: it never touches task state. A live session walks
//! the log in order and waits `gap / speed` between consecutive entries,
//! where `gap` is the difference of their recorded timestamps.

mod session;

pub use session::{ReplayControl, ReplayController, ReplayFrame, ReplaySession};

use std::time::Duration;

use serde::Serialize;

use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::store::LogEntry;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Largest accepted speed multiplier
    pub max_speed: f64,
    /// Optional cap on the wall-clock wait for a single gap
    pub max_delay: Option<Duration>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_speed: 10.0,
            max_delay: None,
        }
    }
}

impl ReplayConfig {
    /// Check that `0 < speed <= max_speed`.
    pub fn validate_speed(&self, speed: f64) -> Result<f64, ReplayError> {
        if speed.is_finite() && speed > 0.0 && speed <= self.max_speed {
            Ok(speed)
        } else {
            Err(ReplayError::InvalidSpeed {
                speed,
                max: self.max_speed,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("Replay speed must be greater than 0 and at most {max}, got {speed}")]
    InvalidSpeed { speed: f64, max: f64 },

    #[error("Replay session has finished")]
    Finished,
}

impl From<ReplayError> for OrchestratorError {
    fn from(err: ReplayError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

/// A whole task and its log, for client-side replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySnapshot {
    pub task: Task,
    pub logs: Vec<LogEntry>,
    pub speed: f64,
    /// Seconds the replay takes at `speed`
    pub duration: f64,
}

/// Wall-clock seconds needed to replay `logs` at `speed`.
///
/// Zero with fewer than two entries.
pub fn replay_duration(logs: &[LogEntry], speed: f64) -> f64 {
    match (logs.first(), logs.last()) {
        (Some(first), Some(last)) if logs.len() >= 2 => {
            let span = (last.timestamp - first.timestamp)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64();
            span / speed
        }
        _ => 0.0,
    }
}

/// Read-only access to execution logs for replay.
#[derive(Clone)]
pub struct ReplayEngine {
    orchestrator: Orchestrator,
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(orchestrator: Orchestrator, config: ReplayConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Snapshot replay of a task.
    pub async fn get_replay(
        &self,
        task_id: TaskId,
        speed: f64,
    ) -> Result<ReplaySnapshot, OrchestratorError> {
        let speed = self.config.validate_speed(speed)?;
        let task = self.orchestrator.get_task(task_id).await?;
        let logs = self.orchestrator.get_logs(task_id).await?;
        let duration = replay_duration(&logs, speed);
        Ok(ReplaySnapshot {
            task,
            logs,
            speed,
            duration,
        })
    }

    /// Start a live, paced replay of a task's log.
    pub async fn start_session(
        &self,
        task_id: TaskId,
        speed: f64,
    ) -> Result<ReplaySession, OrchestratorError> {
        let speed = self.config.validate_speed(speed)?;
        let logs = self.orchestrator.get_logs(task_id).await?;
        tracing::debug!(
            "Starting live replay of task {} ({} entries, speed {})",
            task_id,
            logs.len(),
            speed
        );
        Ok(ReplaySession::start(task_id, logs, speed, &self.config))
    }
}
