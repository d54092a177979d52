//! # Agent Orchestrator
//!
//! Decomposes natural-language tasks into typed subtasks, runs them as a
//! dependency graph across pluggable capability executors, and records an
//! execution log that can be replayed at configurable speed.
//!
//! ## Architecture
//!
//! ```text
//!   submit ──▶ Planner ──▶ DependencyGraph ──▶ Orchestrator driver
//!                                                  │
//!                         ┌────────────────────────┼──────────────────────┐
//!                         ▼                        ▼                      ▼
//!                    Dispatcher              TaskStore /            NotificationBus
//!                (executor per capability)   ExecutionLog          (SSE subscribers)
//!                                                  │
//!                                                  ▼
//!                                           ReplayEngine
//! ```
//!
//! ## Task Flow
//! 1. Validate and plan the description into subtasks
//! 2. Reject cyclic or dangling plans before anything runs
//! 3. Dispatch every ready subtask concurrently, respecting dependencies
//! 4. Persist, log, then publish each state change
//! 5. Finish with a Markdown summary or a failure description
//!
//! ## Modules
//! - `task`: Task and subtask state machines, dependency graph
//! - `planner`: Description to subtask decomposition
//! - `executor`: Capability executors and the dispatcher
//! - `orchestrator`: Task lifecycle and scheduling
//! - `store`: Task snapshots and the execution log (memory or SQLite)
//! - `bus`: Per-task notification fan-out
//! - `replay`: Snapshot and live replay of execution logs
//! - `api`: HTTP, SSE and WebSocket surface

pub mod api;
pub mod bus;
pub mod config;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod replay;
pub mod store;
pub mod task;
pub mod util;

pub use config::Config;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use task::{Task, TaskId, TaskStatus};
