//! Server-sent event streams of task snapshots and log entries.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Serialize;

use crate::task::TaskId;

use super::routes::{error_response, AppState};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive")
}

/// Build a named JSON event, or `None` if the payload does not serialize.
fn json_event<T: Serialize>(name: &str, payload: &T) -> Option<Event> {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to encode {} event: {}", name, e);
            None
        }
    }
}

/// Stream task snapshots via SSE.
///
/// The current snapshot is sent first; the stream ends after a terminal
/// snapshot.
pub async fn stream_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let (initial, mut subscription) = state
        .orchestrator
        .subscribe(id)
        .await
        .map_err(error_response)?;

    let stream = async_stream::stream! {
        let done = initial.is_terminal();
        match json_event("task", &initial) {
            Some(event) => yield Ok(event),
            None => return,
        }
        if done {
            return;
        }

        while let Some(task) = subscription.recv().await {
            let done = task.is_terminal();
            match json_event("task", &task) {
                Some(event) => yield Ok(event),
                None => break,
            }
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// Stream execution log entries via SSE.
///
/// History is sent first, then live entries; the stream ends after the
/// task-level terminal entry.
pub async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let (history, mut subscription) = state
        .orchestrator
        .subscribe_logs(id)
        .await
        .map_err(error_response)?;

    let stream = async_stream::stream! {
        let mut last_sequence: Option<u64> = None;
        for entry in &history {
            match json_event("log", entry) {
                Some(event) => yield Ok(event),
                None => return,
            }
            last_sequence = Some(entry.sequence);
            if entry.action.is_task_terminal() {
                return;
            }
        }

        while let Some(entry) = subscription.recv().await {
            // Entries appended while the history was read arrive twice
            if last_sequence.is_some_and(|seq| entry.sequence <= seq) {
                continue;
            }
            last_sequence = Some(entry.sequence);
            let done = entry.action.is_task_terminal();
            match json_event("log", &entry) {
                Some(event) => yield Ok(event),
                None => break,
            }
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}
