use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use super::*;
use crate::executor::testing::{Behavior, ScriptedExecutor};
use crate::executor::ExecutorRegistry;
use crate::planner::KeywordPlanner;
use crate::store::{InMemoryExecutionLog, InMemoryTaskStore, TaskMutator};
use crate::task::{CapabilityType, FailureKind, TaskStatus};

/// Planner that always returns the same drafts.
struct FixedPlanner(Vec<SubtaskDraft>);

impl Planner for FixedPlanner {
    fn plan(&self, _description: &str, _context: &TaskContext) -> Vec<SubtaskDraft> {
        self.0.clone()
    }
}

/// Task store that can be switched off, or told to fail upcoming updates.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryTaskStore,
    down: AtomicBool,
    failing_updates: AtomicUsize,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        self.check()?;
        self.inner.create(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn update(&self, id: TaskId, mutator: TaskMutator) -> Result<Task, StoreError> {
        self.check()?;
        let pending = self.failing_updates.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_updates.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("write timed out".to_string()));
        }
        self.inner.update(id, mutator).await
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn list_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        self.check()?;
        self.inner.list_ids().await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.purge_expired().await
    }
}

fn registry(executors: Vec<ScriptedExecutor>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    for executor in executors {
        registry.register(Arc::new(executor));
    }
    registry
}

fn orchestrator_with(
    tasks: Arc<dyn TaskStore>,
    planner: Arc<dyn Planner>,
    registry: ExecutorRegistry,
    timeout: Duration,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(
        Stores {
            tasks,
            log: Arc::new(InMemoryExecutionLog::new()),
        },
        Arc::new(NotificationBus::default()),
        planner,
        Dispatcher::new(registry, timeout),
        config,
    )
}

fn orchestrator(registry: ExecutorRegistry) -> Orchestrator {
    orchestrator_with(
        Arc::new(InMemoryTaskStore::default()),
        Arc::new(KeywordPlanner::default()),
        registry,
        Duration::from_secs(5),
        OrchestratorConfig::default(),
    )
}

fn fixed(registry: ExecutorRegistry, drafts: Vec<SubtaskDraft>, policy: FailurePolicy) -> Orchestrator {
    orchestrator_with(
        Arc::new(InMemoryTaskStore::default()),
        Arc::new(FixedPlanner(drafts)),
        registry,
        Duration::from_secs(5),
        OrchestratorConfig {
            failure_policy: policy,
            ..OrchestratorConfig::default()
        },
    )
}

async fn wait_terminal(orch: &Orchestrator, id: TaskId) -> Task {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let task = orch.get_task(id).await.unwrap();
            if task.is_terminal() && orch.running_count().await == 0 {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task did not reach a terminal state")
}

fn actions_for(logs: &[LogEntry], subtask: &crate::task::Subtask) -> Vec<LogAction> {
    logs.iter()
        .filter(|e| e.subtask_id == Some(subtask.id()))
        .map(|e| e.action)
        .collect()
}

fn assert_log_well_formed(logs: &[LogEntry]) {
    for (i, entry) in logs.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64);
    }
    assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(logs.windows(2).all(|w| w[0].progress <= w[1].progress));
}

#[tokio::test]
async fn test_research_then_write_completes() {
    let orch = orchestrator(registry(vec![
        ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::Succeed("research notes".to_string()),
        ),
        ScriptedExecutor::new(CapabilityType::ContentCreation, Behavior::EchoUpstream),
    ]));

    let submitted = orch
        .submit(
            "Research quantum computing and write a summary",
            TaskContext::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(submitted.status(), TaskStatus::Pending);

    let task = wait_terminal(&orch, submitted.id()).await;
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.progress(), 1.0);

    let research = &task.subtasks()[0];
    let write = &task.subtasks()[1];
    assert_eq!(research.capability(), &CapabilityType::WebResearch);
    assert_eq!(write.dependencies(), &[research.id()]);
    assert_eq!(write.result(), Some("research notes"));

    let result = task.result().unwrap();
    assert!(result.starts_with("# Task Execution Summary"));
    assert!(result.contains("## Web Research\n\nresearch notes"));

    let logs = orch.get_logs(task.id()).await.unwrap();
    assert_log_well_formed(&logs);
    assert_eq!(logs.last().unwrap().action, LogAction::TaskCompleted);
    assert_eq!(
        actions_for(&logs, research),
        vec![LogAction::Created, LogAction::Started, LogAction::Completed]
    );

    let pos = |subtask: &crate::task::Subtask, action: LogAction| {
        logs.iter()
            .position(|e| e.subtask_id == Some(subtask.id()) && e.action == action)
            .unwrap()
    };
    assert!(pos(research, LogAction::Completed) < pos(write, LogAction::Started));
}

#[tokio::test]
async fn test_unregistered_capability_fails_task() {
    let orch = orchestrator(registry(vec![ScriptedExecutor::new(
        CapabilityType::WebResearch,
        Behavior::Succeed("unused".to_string()),
    )]));

    let submitted = orch
        .submit("Analyze this dataset", TaskContext::new(), None)
        .await
        .unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;

    assert_eq!(task.status(), TaskStatus::Failed);
    let analysis = &task.subtasks()[0];
    assert_eq!(analysis.capability(), &CapabilityType::DataAnalysis);
    assert_eq!(analysis.error_kind(), Some(FailureKind::Dispatch));
    assert!(task.error().unwrap().contains("data_analysis"));
}

#[tokio::test]
async fn test_cycle_fails_before_any_dispatch() {
    let mut a = SubtaskDraft::new(CapabilityType::WebResearch, "a");
    let b = SubtaskDraft::new(CapabilityType::ContentCreation, "b").with_dependency(a.id);
    a = a.with_dependency(b.id);

    let research = Arc::new(ScriptedExecutor::new(
        CapabilityType::WebResearch,
        Behavior::Succeed("x".to_string()),
    ));
    let mut reg = ExecutorRegistry::new();
    reg.register(research.clone());
    let orch = fixed(reg, vec![a, b], FailurePolicy::FailFast);

    let task = orch
        .submit("anything", TaskContext::new(), None)
        .await
        .unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("Circular dependency"));
    assert!(task
        .subtasks()
        .iter()
        .all(|s| s.status() == TaskStatus::Pending));

    let stored = orch.get_task(task.id()).await.unwrap();
    assert_eq!(stored.status(), TaskStatus::Failed);

    let logs = orch.get_logs(task.id()).await.unwrap();
    assert!(logs.iter().all(|e| e.action != LogAction::Started));
    assert_eq!(logs.last().unwrap().action, LogAction::TaskFailed);
    assert_eq!(research.calls(), 0);
    assert_eq!(orch.running_count().await, 0);
}

#[tokio::test]
async fn test_independent_subtasks_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let reg = registry(vec![
        ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::Rendezvous(barrier.clone(), "r".to_string()),
        ),
        ScriptedExecutor::new(
            CapabilityType::DataAnalysis,
            Behavior::Rendezvous(barrier.clone(), "d".to_string()),
        ),
    ]);
    let drafts = vec![
        SubtaskDraft::new(CapabilityType::WebResearch, "r"),
        SubtaskDraft::new(CapabilityType::DataAnalysis, "d"),
    ];
    let orch = fixed(reg, drafts, FailurePolicy::FailFast);

    let submitted = orch.submit("both", TaskContext::new(), None).await.unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_fail_fast_cancels_siblings() {
    let a = SubtaskDraft::new(CapabilityType::WebResearch, "a");
    let b = SubtaskDraft::new(CapabilityType::DataAnalysis, "b");
    let c = SubtaskDraft::new(CapabilityType::ContentCreation, "c").with_dependency(a.id);
    let reg = registry(vec![
        ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::FailAfter(Duration::from_millis(20), "source unreachable".to_string()),
        ),
        ScriptedExecutor::new(CapabilityType::DataAnalysis, Behavior::Hang),
        ScriptedExecutor::new(
            CapabilityType::ContentCreation,
            Behavior::Succeed("never".to_string()),
        ),
    ]);
    let orch = fixed(reg, vec![a, b, c], FailurePolicy::FailFast);

    let submitted = orch.submit("go", TaskContext::new(), None).await.unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;

    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("source unreachable"));
    let [a, b, c] = task.subtasks() else {
        panic!("expected three subtasks");
    };
    assert_eq!(a.error_kind(), Some(FailureKind::Execution));
    assert_eq!(b.error_kind(), Some(FailureKind::Cancelled));
    assert_eq!(c.error_kind(), Some(FailureKind::Cancelled));

    let logs = orch.get_logs(task.id()).await.unwrap();
    assert_log_well_formed(&logs);
    assert_eq!(
        actions_for(&logs, b),
        vec![LogAction::Created, LogAction::Started, LogAction::Failed]
    );
    assert_eq!(actions_for(&logs, c), vec![LogAction::Created]);
    assert_eq!(logs.last().unwrap().action, LogAction::TaskFailed);
    assert!(logs.iter().all(|e| e.action != LogAction::TaskCompleted));
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_outlives_sibling_that_ignores_cancellation() {
    let a = SubtaskDraft::new(CapabilityType::WebResearch, "a");
    let b = SubtaskDraft::new(CapabilityType::DataAnalysis, "b");
    let reg = registry(vec![
        ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::FailAfter(Duration::from_millis(10), "source unreachable".to_string()),
        ),
        ScriptedExecutor::new(
            CapabilityType::DataAnalysis,
            Behavior::SucceedAfter(Duration::from_millis(200), "late".to_string()),
        ),
    ]);
    let orch = fixed(reg, vec![a, b], FailurePolicy::FailFast);

    let started = tokio::time::Instant::now();
    let submitted = orch.submit("go", TaskContext::new(), None).await.unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;
    // the driver stayed around for the late answer
    assert!(started.elapsed() >= Duration::from_millis(200));

    assert_eq!(task.status(), TaskStatus::Failed);
    let sibling = &task.subtasks()[1];
    assert_eq!(sibling.status(), TaskStatus::Failed);
    assert_eq!(sibling.error_kind(), Some(FailureKind::Cancelled));
    assert_eq!(sibling.result(), None);

    let logs = orch.get_logs(task.id()).await.unwrap();
    assert_log_well_formed(&logs);
    assert_eq!(
        actions_for(&logs, sibling),
        vec![LogAction::Created, LogAction::Started, LogAction::Failed]
    );
    assert!(logs
        .iter()
        .all(|e| e.action != LogAction::Completed && e.action != LogAction::TaskCompleted));
    assert_eq!(logs.last().unwrap().action, LogAction::TaskFailed);
}

#[tokio::test]
async fn test_continue_on_failure_runs_unaffected_siblings() {
    let a = SubtaskDraft::new(CapabilityType::WebResearch, "a");
    let b = SubtaskDraft::new(CapabilityType::DataAnalysis, "b");
    let c = SubtaskDraft::new(CapabilityType::ContentCreation, "c").with_dependency(a.id);
    let reg = registry(vec![
        ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::FailAfter(Duration::from_millis(5), "boom".to_string()),
        ),
        ScriptedExecutor::new(
            CapabilityType::DataAnalysis,
            Behavior::SucceedAfter(Duration::from_millis(50), "numbers".to_string()),
        ),
        ScriptedExecutor::new(
            CapabilityType::ContentCreation,
            Behavior::Succeed("never".to_string()),
        ),
    ]);
    let orch = fixed(reg, vec![a, b, c], FailurePolicy::FailFast);

    let submitted = orch
        .submit("go", TaskContext::new(), Some(FailurePolicy::ContinueOnFailure))
        .await
        .unwrap();
    assert_eq!(submitted.failure_policy(), FailurePolicy::ContinueOnFailure);
    let task = wait_terminal(&orch, submitted.id()).await;

    assert_eq!(task.status(), TaskStatus::Failed);
    let [a, b, c] = task.subtasks() else {
        panic!("expected three subtasks");
    };
    assert_eq!(a.error_kind(), Some(FailureKind::Execution));
    assert_eq!(b.status(), TaskStatus::Completed);
    assert_eq!(b.result(), Some("numbers"));
    assert_eq!(c.error_kind(), Some(FailureKind::DependencyFailed));
    assert_eq!(c.error(), Some("Dependency failed"));
    assert!(task.error().unwrap().contains("boom"));

    // One of three completed before the task failed.
    assert!((task.progress() - 1.0 / 3.0).abs() < 1e-9);
    let logs = orch.get_logs(task.id()).await.unwrap();
    assert_log_well_formed(&logs);
    assert_eq!(actions_for(&logs, c), vec![LogAction::Created]);
}

#[tokio::test(start_paused = true)]
async fn test_executor_timeout_fails_subtask() {
    let orch = orchestrator_with(
        Arc::new(InMemoryTaskStore::default()),
        Arc::new(KeywordPlanner::default()),
        registry(vec![ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::Hang,
        )]),
        Duration::from_secs(2),
        OrchestratorConfig::default(),
    );

    let submitted = orch
        .submit("search the archives", TaskContext::new(), None)
        .await
        .unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;

    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.subtasks()[0].error_kind(), Some(FailureKind::Timeout));
    assert!(task.error().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_progress_reports_are_logged_monotonically() {
    let orch = orchestrator(registry(vec![ScriptedExecutor::new(
        CapabilityType::CodeGeneration,
        Behavior::Stepped {
            steps: 4,
            step: Duration::from_millis(2),
        },
    )]));

    // "write" also plans content creation, which is unregistered here.
    let submitted = orch
        .submit("write a script", TaskContext::new(), None)
        .await
        .unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;
    let logs = orch.get_logs(task.id()).await.unwrap();
    assert_log_well_formed(&logs);

    let code = &task.subtasks()[0];
    assert_eq!(code.status(), TaskStatus::Completed);
    let progress_entries = logs
        .iter()
        .filter(|e| e.subtask_id == Some(code.id()) && e.action == LogAction::Progress)
        .count();
    assert!(progress_entries >= 1);
}

#[tokio::test]
async fn test_empty_plan_policies() {
    let orch = orchestrator(ExecutorRegistry::new());
    let task = orch
        .submit("Hello there", TaskContext::new(), None)
        .await
        .unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.progress(), 1.0);
    assert!(task.result().unwrap().contains("No subtasks"));

    let strict = orchestrator_with(
        Arc::new(InMemoryTaskStore::default()),
        Arc::new(KeywordPlanner::default()),
        ExecutorRegistry::new(),
        Duration::from_secs(5),
        OrchestratorConfig {
            empty_plan_policy: EmptyPlanPolicy::Fail,
            ..OrchestratorConfig::default()
        },
    );
    let task = strict
        .submit("Hello there", TaskContext::new(), None)
        .await
        .unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.error(), Some("Planner produced no subtasks"));
}

#[tokio::test]
async fn test_oversized_plan_is_rejected() {
    let orch = orchestrator_with(
        Arc::new(InMemoryTaskStore::default()),
        Arc::new(KeywordPlanner::default()),
        ExecutorRegistry::new(),
        Duration::from_secs(5),
        OrchestratorConfig {
            max_subtasks: 1,
            ..OrchestratorConfig::default()
        },
    );
    let task = orch
        .submit("Research and write", TaskContext::new(), None)
        .await
        .unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("maximum of 1"));
}

#[tokio::test]
async fn test_invalid_descriptions_are_rejected() {
    let orch = orchestrator(ExecutorRegistry::new());
    assert!(matches!(
        orch.submit("   ", TaskContext::new(), None).await,
        Err(OrchestratorError::Validation(_))
    ));
    let long = "x".repeat(10_001);
    assert!(matches!(
        orch.submit(&long, TaskContext::new(), None).await,
        Err(OrchestratorError::Validation(_))
    ));
    assert!(orch.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_storage_outage_is_surfaced_without_corruption() {
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator_with(
        store.clone(),
        Arc::new(KeywordPlanner::default()),
        registry(vec![ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::Succeed("found".to_string()),
        )]),
        Duration::from_secs(5),
        OrchestratorConfig::default(),
    );

    let first = orch
        .submit("search for papers", TaskContext::new(), None)
        .await
        .unwrap();
    let before = wait_terminal(&orch, first.id()).await;
    assert_eq!(before.status(), TaskStatus::Completed);

    store.down.store(true, Ordering::SeqCst);
    assert!(matches!(
        orch.submit("search again", TaskContext::new(), None).await,
        Err(OrchestratorError::StorageUnavailable(_))
    ));
    assert!(matches!(
        orch.get_task(first.id()).await,
        Err(OrchestratorError::StorageUnavailable(_))
    ));

    store.down.store(false, Ordering::SeqCst);
    let after = orch.get_task(first.id()).await.unwrap();
    assert_eq!(after.status(), TaskStatus::Completed);
    assert_eq!(after.result(), before.result());
    assert_eq!(orch.list_tasks().await.unwrap(), vec![first.id()]);
}

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let store = Arc::new(FlakyStore::default());
    store.failing_updates.store(3, Ordering::SeqCst);
    let orch = orchestrator_with(
        store.clone(),
        Arc::new(KeywordPlanner::default()),
        registry(vec![ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::Succeed("found".to_string()),
        )]),
        Duration::from_secs(5),
        OrchestratorConfig::default(),
    );

    let submitted = orch
        .submit("search for papers", TaskContext::new(), None)
        .await
        .unwrap();
    let task = wait_terminal(&orch, submitted.id()).await;
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_delete_cancels_and_removes_everything() {
    let orch = orchestrator(registry(vec![ScriptedExecutor::new(
        CapabilityType::WebResearch,
        Behavior::Hang,
    )]));
    let submitted = orch
        .submit("search forever", TaskContext::new(), None)
        .await
        .unwrap();
    let id = submitted.id();

    tokio::time::timeout(Duration::from_secs(5), async {
        while orch.get_task(id).await.unwrap().status() != TaskStatus::InProgress {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    orch.delete_task(id).await.unwrap();
    assert_eq!(orch.running_count().await, 0);
    assert_eq!(
        orch.get_task(id).await.unwrap_err(),
        OrchestratorError::NotFound(id)
    );
    assert_eq!(
        orch.get_logs(id).await.unwrap_err(),
        OrchestratorError::NotFound(id)
    );
    assert_eq!(
        orch.delete_task(id).await.unwrap_err(),
        OrchestratorError::NotFound(id)
    );
}

#[tokio::test]
async fn test_subscribers_see_terminal_snapshot_then_end() {
    let orch = orchestrator(registry(vec![ScriptedExecutor::new(
        CapabilityType::WebResearch,
        Behavior::SucceedAfter(Duration::from_millis(20), "found".to_string()),
    )]));
    let submitted = orch
        .submit("search for papers", TaskContext::new(), None)
        .await
        .unwrap();

    let (initial, mut updates) = orch.subscribe(submitted.id()).await.unwrap();
    let mut last = initial;
    while let Some(snapshot) = updates.recv().await {
        assert!(snapshot.progress() >= last.progress());
        last = snapshot;
    }
    assert_eq!(last.status(), TaskStatus::Completed);

    // Subscribing after the fact ends immediately.
    let (snapshot, mut late) = orch.subscribe(submitted.id()).await.unwrap();
    assert!(snapshot.is_terminal());
    assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn test_failed_subscribe_leaves_other_subscribers_alone() {
    let gate = Arc::new(Barrier::new(2));
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator_with(
        store.clone(),
        Arc::new(FixedPlanner(vec![SubtaskDraft::new(
            CapabilityType::WebResearch,
            "search",
        )])),
        registry(vec![ScriptedExecutor::new(
            CapabilityType::WebResearch,
            Behavior::Rendezvous(gate.clone(), "found".to_string()),
        )]),
        Duration::from_secs(5),
        OrchestratorConfig::default(),
    );
    let submitted = orch.submit("search", TaskContext::new(), None).await.unwrap();
    let (_, mut first) = orch.subscribe(submitted.id()).await.unwrap();

    store.down.store(true, Ordering::SeqCst);
    assert!(matches!(
        orch.subscribe(submitted.id()).await,
        Err(OrchestratorError::StorageUnavailable(_))
    ));
    store.down.store(false, Ordering::SeqCst);
    gate.wait().await;

    let mut last = None;
    while let Some(snapshot) = first.recv().await {
        last = Some(snapshot);
    }
    assert_eq!(last.map(|t| t.status()), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let orch = orchestrator(ExecutorRegistry::new());
    let id = TaskId::new();
    assert_eq!(
        orch.get_task(id).await.unwrap_err(),
        OrchestratorError::NotFound(id)
    );
    assert!(matches!(
        orch.subscribe(id).await,
        Err(OrchestratorError::NotFound(_))
    ));
}
