//! Per-task driver.
//!
//! One driver runs per submitted task. It owns the authoritative in-memory
//! snapshot, dispatches eligible subtasks into a `JoinSet`, and reacts to
//! completions and progress reports as they come back. Every state change
//! is persisted first, then logged, then published.
//!
//! # Invariants
//! - The driver is the only writer of its task's snapshot
//! - A subtask is dispatched only when all its dependencies are Completed
//! - Nothing is applied once the task is terminal
//! - Executors still running when the task ends are awaited and their
//!   outcomes dropped, unless the task is deleted

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{build_summary, Orchestrator};
use crate::executor::{
    DispatchOutcome, ExecutionContext, ProgressReporter, ProgressUpdate, UpstreamResult,
};
use crate::store::{LogAction, LogEntry, StoreError};
use crate::task::{DependencyGraph, FailureKind, FailurePolicy, Subtask, Task, TaskStatus};

const PROGRESS_BUFFER: usize = 256;
const PERSIST_ATTEMPTS: u32 = 5;
const PERSIST_BACKOFF_START: Duration = Duration::from_millis(50);
const PERSIST_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Why a driver stopped before the task reached a terminal state.
#[derive(Debug)]
enum Halt {
    /// Task deleted
    Aborted,
    /// Snapshot vanished from the store (deleted or expired)
    Gone,
    /// Persisting failed after retries
    Store(StoreError),
    /// Appending to the execution log failed
    Log(StoreError),
}

pub(super) struct Driver {
    orch: Orchestrator,
    task: Task,
    graph: DependencyGraph,
    abort: CancellationToken,
    /// Child of `abort`; handed to executors
    cancel: CancellationToken,
    ready: VecDeque<usize>,
    joins: JoinSet<(usize, DispatchOutcome)>,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    progress_rx: mpsc::Receiver<ProgressUpdate>,
}

impl Driver {
    pub(super) fn new(
        orch: Orchestrator,
        task: Task,
        graph: DependencyGraph,
        abort: CancellationToken,
    ) -> Self {
        let cancel = abort.child_token();
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        Self {
            orch,
            task,
            graph,
            abort,
            cancel,
            ready: VecDeque::new(),
            joins: JoinSet::new(),
            progress_tx,
            progress_rx,
        }
    }

    pub(super) async fn run(mut self) {
        let id = self.task.id();
        match self.drive().await {
            Ok(()) => {}
            Err(Halt::Aborted) => {
                tracing::debug!("Driver for task {} stopped: task deleted", id)
            }
            Err(Halt::Gone) => {
                tracing::warn!("Task {} is no longer in the store; driver stopping", id)
            }
            Err(Halt::Store(e)) => {
                tracing::error!("Giving up on task {}: could not persist state: {}", id, e)
            }
            Err(Halt::Log(e)) => {
                tracing::error!("Execution log append failed for task {}: {}", id, e);
                self.fail_without_log(format!("Execution log unavailable: {}", e))
                    .await;
            }
        }

        self.cancel.cancel();
        if self.task.is_terminal() {
            self.drain().await;
        }
        self.joins.shutdown().await;
        self.orch.bus.close(id).await;
        self.orch.driver_finished(id).await;
    }

    /// Wait for dispatches still running after the task became terminal.
    /// Their outcomes are discarded; a delete stops the wait.
    async fn drain(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => return,
                joined = self.joins.join_next() => match joined {
                    Some(Ok((node, outcome))) => {
                        let _ = self.on_outcome(node, outcome).await;
                    }
                    Some(Err(e)) => tracing::error!(
                        "Dispatch for task {} did not return: {}",
                        self.task.id(),
                        e
                    ),
                    None => return,
                },
            }
        }
    }

    async fn drive(&mut self) -> Result<(), Halt> {
        self.ready.extend(self.graph.roots());

        loop {
            self.dispatch_ready().await?;

            if self.task.is_terminal() {
                return Ok(());
            }
            if self.joins.is_empty() {
                return self.finish().await;
            }

            tokio::select! {
                biased;
                _ = self.abort.cancelled() => return Err(Halt::Aborted),
                Some(joined) = self.joins.join_next() => match joined {
                    Ok((node, outcome)) => self.on_outcome(node, outcome).await?,
                    Err(e) => tracing::error!(
                        "Dispatch for task {} did not return: {}",
                        self.task.id(),
                        e
                    ),
                },
                Some(update) = self.progress_rx.recv() => self.on_progress(update).await?,
            }
        }
    }

    fn subtask(&self, node: usize) -> &Subtask {
        &self.task.subtasks()[node]
    }

    fn upstream_of(&self, node: usize) -> Vec<UpstreamResult> {
        self.graph
            .dependencies(node)
            .iter()
            .map(|&dep| {
                let upstream = self.subtask(dep);
                UpstreamResult {
                    subtask_id: upstream.id(),
                    capability: upstream.capability().clone(),
                    result: upstream.result().unwrap_or_default().to_string(),
                }
            })
            .collect()
    }

    /// Dispatch everything in the ready queue, in FIFO order.
    async fn dispatch_ready(&mut self) -> Result<(), Halt> {
        while let Some(node) = self.ready.pop_front() {
            if self.task.is_terminal() {
                self.ready.clear();
                break;
            }
            let subtask_id = self.graph.id(node);

            if self.task.status() == TaskStatus::Pending {
                if let Err(e) = self.task.start() {
                    tracing::warn!("Task {} could not start: {}", self.task.id(), e);
                    continue;
                }
                tracing::info!("Task {} in progress", self.task.id());
            }

            match self.task.subtask_mut(subtask_id).map(|s| s.start()) {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    tracing::warn!("Skipping dispatch of subtask {}: {}", subtask_id, e);
                    continue;
                }
                None => continue,
            }
            self.task.touch();

            let subtask = self.subtask(node).clone();
            let detail = match self.orch.dispatcher.registry().get(subtask.capability()) {
                Some(executor) => format!("Dispatched to {}", executor.name()),
                None => format!("Dispatched {} subtask", subtask.capability()),
            };
            let entry =
                LogEntry::for_subtask(&self.task, &subtask, LogAction::Started, Some(detail));
            self.persist().await?;
            self.record(entry).await?;
            self.publish().await;

            let ctx = ExecutionContext {
                task_id: self.task.id(),
                task_description: self.task.description().to_string(),
                context: self.task.context().clone(),
                upstream: self.upstream_of(node),
                cancel: self.cancel.clone(),
                progress: ProgressReporter::new(subtask_id, self.progress_tx.clone()),
            };
            let dispatcher = self.orch.dispatcher.clone();

            tracing::debug!(
                "Task {}: dispatching subtask {} ({})",
                self.task.id(),
                subtask_id,
                subtask.capability()
            );
            self.joins.spawn(async move {
                let outcome = AssertUnwindSafe(dispatcher.dispatch(&subtask, ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| DispatchOutcome::Failed {
                        kind: FailureKind::Execution,
                        message: "Executor panicked".to_string(),
                    });
                (node, outcome)
            });
        }
        Ok(())
    }

    async fn on_outcome(&mut self, node: usize, outcome: DispatchOutcome) -> Result<(), Halt> {
        let subtask_id = self.graph.id(node);
        if self.task.is_terminal() {
            match outcome {
                DispatchOutcome::Failed {
                    kind: FailureKind::Cancelled,
                    ..
                } => tracing::debug!("Subtask {} acknowledged cancellation", subtask_id),
                _ => tracing::warn!(
                    "Discarding late result for subtask {} of terminal task {}",
                    subtask_id,
                    self.task.id()
                ),
            }
            return Ok(());
        }

        match outcome {
            DispatchOutcome::Completed(result) => self.on_completed(node, result).await,
            DispatchOutcome::Failed { kind, message } => {
                self.on_failed(node, kind, message).await
            }
        }
    }

    async fn on_completed(&mut self, node: usize, result: String) -> Result<(), Halt> {
        let subtask_id = self.graph.id(node);
        match self.task.subtask_mut(subtask_id).map(|s| s.complete(result)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::warn!("Discarding result for subtask {}: {}", subtask_id, e);
                return Ok(());
            }
            None => return Ok(()),
        }
        let progress = self.task.recompute_progress();

        let subtask = self.subtask(node);
        tracing::info!(
            "Task {}: subtask {} ({}) completed, progress {:.0}%",
            self.task.id(),
            subtask_id,
            subtask.capability(),
            progress * 100.0
        );
        let entry = LogEntry::for_subtask(
            &self.task,
            subtask,
            LogAction::Completed,
            Some(format!("{} subtask completed", subtask.capability().label())),
        );
        self.persist().await?;
        self.record(entry).await?;
        self.publish().await;

        let task = &self.task;
        for next in self
            .graph
            .unlocked_by(node, |i| task.subtasks()[i].status() == TaskStatus::Completed)
        {
            if task.subtasks()[next].status() == TaskStatus::Pending && !self.ready.contains(&next)
            {
                self.ready.push_back(next);
            }
        }
        Ok(())
    }

    async fn on_failed(
        &mut self,
        node: usize,
        kind: FailureKind,
        message: String,
    ) -> Result<(), Halt> {
        let subtask_id = self.graph.id(node);
        match self
            .task
            .subtask_mut(subtask_id)
            .map(|s| s.fail(kind, message.clone()))
        {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::warn!("Discarding failure of subtask {}: {}", subtask_id, e);
                return Ok(());
            }
            None => return Ok(()),
        }
        self.task.touch();

        let subtask = self.subtask(node);
        tracing::info!(
            "Task {}: subtask {} ({}) failed [{}]: {}",
            self.task.id(),
            subtask_id,
            subtask.capability(),
            kind,
            message
        );
        let entry = LogEntry::for_subtask(&self.task, subtask, LogAction::Failed, Some(message.clone()));

        match self.task.failure_policy() {
            FailurePolicy::FailFast => {
                self.persist().await?;
                self.record(entry).await?;
                self.fail_fast(node, message).await
            }
            FailurePolicy::ContinueOnFailure => {
                self.block_downstream(node);
                self.persist().await?;
                self.record(entry).await?;
                self.publish().await;
                Ok(())
            }
        }
    }

    /// Fail the task and cancel every sibling that has not finished.
    ///
    /// Running siblings get a `failed` log entry; siblings that never
    /// started change state without one.
    async fn fail_fast(&mut self, failed_node: usize, message: String) -> Result<(), Halt> {
        self.cancel.cancel();
        self.ready.clear();

        let failed = self.subtask(failed_node);
        let reason = format!(
            "Cancelled: {} subtask {} failed",
            failed.capability(),
            failed.id()
        );
        let error = format!(
            "Subtask {} ({}) failed: {}",
            failed.id(),
            failed.capability(),
            message
        );

        let mut interrupted = Vec::new();
        for node in 0..self.graph.len() {
            let id = self.graph.id(node);
            let Some(sibling) = self.task.subtask_mut(id) else {
                continue;
            };
            let was_running = sibling.status() == TaskStatus::InProgress;
            if sibling.fail(FailureKind::Cancelled, reason.clone()).is_ok() && was_running {
                interrupted.push(node);
            }
        }

        if let Err(e) = self.task.fail(error.clone()) {
            tracing::warn!("Task {} could not be failed: {}", self.task.id(), e);
            return Ok(());
        }
        tracing::info!("Task {} failed: {}", self.task.id(), error);

        self.persist().await?;
        for node in interrupted {
            let entry = LogEntry::for_subtask(
                &self.task,
                self.subtask(node),
                LogAction::Failed,
                Some(reason.clone()),
            );
            self.record(entry).await?;
        }
        let entry = LogEntry::for_task(&self.task, LogAction::TaskFailed, Some(error));
        self.record(entry).await?;
        self.publish().await;
        Ok(())
    }

    /// Mark every pending subtask downstream of `node` as blocked.
    fn block_downstream(&mut self, node: usize) {
        for blocked in self.graph.downstream_of(node) {
            let id = self.graph.id(blocked);
            if let Some(subtask) = self.task.subtask_mut(id) {
                if subtask.status() == TaskStatus::Pending
                    && subtask
                        .fail(FailureKind::DependencyFailed, "Dependency failed")
                        .is_ok()
                {
                    tracing::debug!("Subtask {} blocked by failed dependency", id);
                }
            }
            self.ready.retain(|&n| n != blocked);
        }
    }

    /// Conclude once nothing is ready or running.
    async fn finish(&mut self) -> Result<(), Halt> {
        let total = self.task.subtasks().len();
        if self.task.completed_count() == total {
            let summary = build_summary(&self.task);
            if let Err(e) = self.task.complete(Some(summary)) {
                tracing::warn!("Task {} could not complete: {}", self.task.id(), e);
                return Ok(());
            }
            tracing::info!("Task {} completed", self.task.id());
            let entry = LogEntry::for_task(
                &self.task,
                LogAction::TaskCompleted,
                Some(format!("All {} subtasks completed successfully", total)),
            );
            self.persist().await?;
            self.record(entry).await?;
        } else {
            let failed: Vec<&Subtask> = self
                .task
                .subtasks()
                .iter()
                .filter(|s| s.status() == TaskStatus::Failed)
                .collect();
            let error = match failed
                .iter()
                .find(|s| s.error_kind() != Some(FailureKind::DependencyFailed))
            {
                Some(first) => format!(
                    "{} of {} subtasks failed; first failure in {} subtask {}: {}",
                    failed.len(),
                    total,
                    first.capability(),
                    first.id(),
                    first.error().unwrap_or("unknown error")
                ),
                None => "No further progress possible".to_string(),
            };
            if let Err(e) = self.task.fail(error.clone()) {
                tracing::warn!("Task {} could not be failed: {}", self.task.id(), e);
                return Ok(());
            }
            tracing::info!("Task {} failed: {}", self.task.id(), error);
            let entry = LogEntry::for_task(&self.task, LogAction::TaskFailed, Some(error));
            self.persist().await?;
            self.record(entry).await?;
        }
        self.publish().await;
        Ok(())
    }

    async fn on_progress(&mut self, update: ProgressUpdate) -> Result<(), Halt> {
        if self.task.is_terminal() {
            return Ok(());
        }
        let moved = self
            .task
            .subtask_mut(update.subtask_id)
            .map(|s| s.report_progress(update.progress))
            .unwrap_or(false);
        if !moved {
            return Ok(());
        }
        self.task.touch();

        let Some(subtask) = self.task.subtask(update.subtask_id) else {
            return Ok(());
        };
        let entry = LogEntry::for_subtask(
            &self.task,
            subtask,
            LogAction::Progress,
            Some(format!("{:.0}% complete", subtask.progress() * 100.0)),
        );
        self.persist().await?;
        self.record(entry).await?;
        self.publish().await;
        Ok(())
    }

    /// Overwrite the stored snapshot with the local one, retrying transient
    /// storage errors with capped exponential backoff.
    async fn persist(&self) -> Result<(), Halt> {
        let id = self.task.id();
        let mut delay = PERSIST_BACKOFF_START;

        for attempt in 1..=PERSIST_ATTEMPTS {
            let snapshot = self.task.clone();
            match self
                .orch
                .tasks
                .update(id, Box::new(move |t: &mut Task| *t = snapshot))
                .await
            {
                Ok(_) => return Ok(()),
                Err(StoreError::NotFound(_)) => return Err(Halt::Gone),
                Err(e) if e.is_retryable() && attempt < PERSIST_ATTEMPTS => {
                    tracing::warn!(
                        "Persisting task {} failed (attempt {}/{}): {}; retrying in {:?}",
                        id,
                        attempt,
                        PERSIST_ATTEMPTS,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = self.abort.cancelled() => return Err(Halt::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(PERSIST_BACKOFF_MAX);
                }
                Err(e) => return Err(Halt::Store(e)),
            }
        }
        Err(Halt::Store(StoreError::Unavailable(format!(
            "gave up after {} attempts",
            PERSIST_ATTEMPTS
        ))))
    }

    async fn record(&self, entry: LogEntry) -> Result<(), Halt> {
        let entry = self.orch.log.append(entry).await.map_err(Halt::Log)?;
        self.orch.bus.publish_log(&entry).await;
        Ok(())
    }

    async fn publish(&self) {
        self.orch.bus.publish(&self.task).await;
    }

    /// Mark the task failed when its log can no longer be written.
    async fn fail_without_log(&mut self, error: String) {
        self.cancel.cancel();
        if self.task.fail(error).is_err() {
            return;
        }
        if let Err(Halt::Store(e)) = self.persist().await {
            tracing::error!("Task {} could not be marked failed: {}", self.task.id(), e);
        }
        self.publish().await;
    }
}
