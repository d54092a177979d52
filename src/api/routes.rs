//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bus::NotificationBus;
use crate::config::Config;
use crate::executor::{Dispatcher, ExecutorRegistry};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::planner::KeywordPlanner;
use crate::replay::ReplayEngine;
use crate::store::{create_stores, StoreType};
use crate::task::{FailurePolicy, Task, TaskId};

use super::replay_ws;
use super::stream;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub replay: ReplayEngine,
}

impl AppState {
    /// Wire stores, bus, planner and executors from configuration.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let stores = create_stores(
            config.store_type,
            config.data_dir.clone(),
            config.retention,
        )
        .await?;
        let bus = NotificationBus::shared(config.subscriber_buffer);

        let registry = if config.simulated_executors {
            ExecutorRegistry::simulated(config.simulated_step)
        } else {
            ExecutorRegistry::new()
        };
        if registry.is_empty() {
            tracing::warn!("No executors registered; every dispatched subtask will fail");
        }
        let dispatcher = Dispatcher::new(registry, config.executor_timeout);

        let orchestrator = Orchestrator::new(
            stores,
            bus,
            Arc::new(KeywordPlanner::default()),
            dispatcher,
            config.orchestrator.clone(),
        );
        let replay = ReplayEngine::new(orchestrator.clone(), config.replay.clone());

        Ok(Self {
            config,
            orchestrator,
            replay,
        })
    }
}

/// Build the router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .route("/tasks/submit", post(submit_task))
        .route("/tasks/:id", get(get_task).delete(delete_task))
        .route("/tasks/:id/logs", get(get_logs))
        .route("/tasks/:id/replay", get(get_replay))
        .route("/tasks/:id/stream", get(stream::stream_task))
        .route("/tasks/:id/logs/stream", get(stream::stream_logs))
        .route("/ws/:id/replay", get(replay_ws::replay_ws))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::from_config(config).await?);

    tracing::info!(
        "Orchestrator ready: store={}, planner={}, executors={}",
        if state.orchestrator.storage_is_persistent() {
            "sqlite"
        } else {
            "memory"
        },
        state.orchestrator.planner_name(),
        state.orchestrator.dispatcher().registry().len()
    );

    spawn_expiry_sweep(Arc::clone(&state));

    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically drop expired task snapshots.
fn spawn_expiry_sweep(state: Arc<AppState>) {
    let period = state.config.sweep_interval;
    if period.is_zero() {
        tracing::info!("Expired-task sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match state.orchestrator.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Purged {} expired tasks", n),
                Err(e) => tracing::warn!("Expired-task sweep failed: {}", e),
            }
        }
    });
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Map an orchestration error onto an HTTP status.
pub(super) fn error_response(err: OrchestratorError) -> (StatusCode, String) {
    let status = match &err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!("Request failed: {}", err);
    }
    (status, err.to_string())
}

/// Health check.
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = &state.orchestrator;
    let storage_error = orchestrator.storage_status().await.err();
    let status = if storage_error.is_some() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let backend = match state.config.store_type {
        StoreType::Memory => "memory",
        StoreType::Sqlite => "sqlite",
    };

    let response = HealthResponse {
        status: if storage_error.is_some() { "degraded" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: StorageHealth {
            backend: backend.to_string(),
            available: storage_error.is_none(),
            error: storage_error.map(|e| e.to_string()),
        },
        planner: orchestrator.planner_name().to_string(),
        executors: orchestrator
            .dispatcher()
            .registry()
            .capabilities()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect(),
        running_tasks: orchestrator.running_count().await,
    };
    (status, Json(response))
}

/// Submit a new task.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    let failure_policy = match req.failure_policy.as_deref() {
        Some(raw) => Some(FailurePolicy::parse(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Unknown failure policy: {}", raw),
            )
        })?),
        None => None,
    };

    state
        .orchestrator
        .submit(&req.task, req.context.unwrap_or_default(), failure_policy)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Get a task snapshot.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<Task>, (StatusCode, String)> {
    state
        .orchestrator
        .get_task(id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Get the full execution log of a task.
async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<LogsResponse>, (StatusCode, String)> {
    let logs = state
        .orchestrator
        .get_logs(id)
        .await
        .map_err(error_response)?;
    Ok(Json(LogsResponse { logs }))
}

/// Task and log for client-side replay.
async fn get_replay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<ReplayResponse>, (StatusCode, String)> {
    let replay = state
        .replay
        .get_replay(id, query.speed)
        .await
        .map_err(error_response)?;
    Ok(Json(ReplayResponse { replay }))
}

/// Cancel a task if running and remove it with its log.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<DeleteTaskResponse>, (StatusCode, String)> {
    state
        .orchestrator
        .delete_task(id)
        .await
        .map_err(error_response)?;
    Ok(Json(DeleteTaskResponse {
        status: "success".to_string(),
        message: format!("Task {} deleted", id),
    }))
}

/// List stored task ids, newest first.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TaskListResponse>, (StatusCode, String)> {
    let tasks = state
        .orchestrator
        .list_tasks()
        .await
        .map_err(error_response)?;
    Ok(Json(TaskListResponse {
        status: "success".to_string(),
        tasks,
    }))
}
