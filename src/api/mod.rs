//! HTTP API for the orchestrator.
//!
//! ## Endpoints
//!
//! - `POST /tasks/submit` - Submit a new task
//! - `GET /tasks/{id}` - Get a task snapshot
//! - `GET /tasks/{id}/logs` - Get the execution log
//! - `GET /tasks/{id}/replay?speed=` - Task and log for client-side replay
//! - `DELETE /tasks/{id}` - Cancel and remove a task
//! - `GET /tasks/{id}/stream` - Stream task snapshots via SSE
//! - `GET /tasks/{id}/logs/stream` - Stream log entries via SSE
//! - `GET /ws/{id}/replay?speed=` - Live paced replay over WebSocket
//! - `GET /api/tasks` - List task ids
//! - `GET /health` - Service and storage health

mod replay_ws;
mod routes;
mod stream;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
