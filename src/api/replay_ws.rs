//! WebSocket endpoint for live, paced replay of a task's execution log.
//!
//! Server frames are the JSON-encoded replay frames (`replay_start`,
//! `replay_event`, `replay_complete`) plus `error` for rejected commands.
//! Clients send `{"command": "pause" | "resume" | "speed", "value": x}`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::replay::{ReplayController, ReplayFrame, ReplaySession};
use crate::task::TaskId;

use super::routes::{error_response, AppState};
use super::types::{ReplayCommand, ReplayQuery};

/// Upgrade to a live replay session.
///
/// The session is created before the upgrade so an unknown task or a bad
/// speed is reported as a plain HTTP error.
pub async fn replay_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    Query(query): Query<ReplayQuery>,
) -> Result<Response, (StatusCode, String)> {
    let session = state
        .replay
        .start_session(id, query.speed)
        .await
        .map_err(error_response)?;

    Ok(ws.on_upgrade(move |socket| handle_replay_socket(socket, session)))
}

async fn handle_replay_socket(socket: WebSocket, mut session: ReplaySession) {
    let controller = session.controller();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            frame = session.next_frame() => {
                let Some(frame) = frame else { break };
                let done = matches!(frame, ReplayFrame::ReplayComplete { .. });
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Failed to encode replay frame: {}", e);
                        break;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
                if done {
                    break;
                }
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(message) = apply_command(&controller, &text).await {
                            let reply = serde_json::json!({ "type": "error", "message": message });
                            if ws_sender.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws_sender.close().await;
    tracing::debug!("Replay socket closed");
}

/// Parse a client command and forward it to the session.
async fn apply_command(controller: &ReplayController, text: &str) -> Result<(), String> {
    let command: ReplayCommand =
        serde_json::from_str(text).map_err(|e| format!("Invalid command: {}", e))?;
    let result = match command {
        ReplayCommand::Pause => controller.pause().await,
        ReplayCommand::Resume => controller.resume().await,
        ReplayCommand::Speed { value } => controller.set_speed(value).await,
    };
    result.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayConfig;
    use crate::store::{LogAction, LogEntry};
    use crate::task::{CapabilityType, FailurePolicy, SubtaskDraft, Task, TaskContext};

    fn session() -> ReplaySession {
        let task = Task::new(
            "Research it",
            TaskContext::new(),
            vec![SubtaskDraft::new(CapabilityType::WebResearch, "Search")],
            FailurePolicy::FailFast,
        )
        .unwrap();
        let created = LogEntry::for_task(&task, LogAction::Created, None);
        let mut completed = LogEntry::for_task(&task, LogAction::TaskCompleted, None);
        // keeps the session alive for the whole test
        completed.timestamp = created.timestamp + chrono::Duration::hours(1);
        let entries = vec![created, completed];
        ReplaySession::start(task.id(), entries, 1.0, &ReplayConfig::default())
    }

    #[tokio::test]
    async fn test_commands_reach_the_session() {
        let session = session();
        let controller = session.controller();

        assert_eq!(apply_command(&controller, r#"{"command":"pause"}"#).await, Ok(()));
        assert_eq!(apply_command(&controller, r#"{"command":"resume"}"#).await, Ok(()));
        assert_eq!(
            apply_command(&controller, r#"{"command":"speed","value":4}"#).await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_bad_commands_are_reported() {
        let session = session();
        let controller = session.controller();

        let err = apply_command(&controller, r#"{"command":"speed","value":0}"#)
            .await
            .unwrap_err();
        assert!(err.contains("speed"));

        let err = apply_command(&controller, "not json").await.unwrap_err();
        assert!(err.starts_with("Invalid command"));
    }

    #[test]
    fn test_frames_are_tagged() {
        let id = TaskId::new();
        let json = serde_json::to_value(ReplayFrame::ReplayComplete { task_id: id }).unwrap();
        assert_eq!(json["type"], "replay_complete");
        assert_eq!(json["task_id"], id.to_string());
    }
}
