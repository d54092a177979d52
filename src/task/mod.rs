//! Task module - tasks, subtasks, and the dependency graph between them.
//!
//! State lives in private fields and changes only through explicit
//! transitions that return `Result`, so an invalid move (completing a
//! pending subtask, failing a finished task) is an error rather than a
//! silently corrupted snapshot.

pub mod task;
mod graph;
mod subtask;

pub use task::{FailurePolicy, Task, TaskContext, TaskError, TaskId, TaskStatus};
pub use graph::{DependencyGraph, PlanningError};
pub use subtask::{CapabilityType, FailureKind, Subtask, SubtaskDraft, SubtaskId};
