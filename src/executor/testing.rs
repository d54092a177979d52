//! Scripted executors for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use super::{ExecutionContext, Executor, ExecutorError};
use crate::task::{CapabilityType, Subtask};

#[derive(Clone)]
pub(crate) enum Behavior {
    Succeed(String),
    /// Sleeps, then succeeds; ignores cancellation
    SucceedAfter(Duration, String),
    Fail(String),
    FailAfter(Duration, String),
    /// Never finishes on its own; stops when cancelled
    Hang,
    /// Waits until every party reaches the barrier, then succeeds
    Rendezvous(Arc<Barrier>, String),
    /// Returns the upstream results joined by `|`
    EchoUpstream,
    /// Reports `steps` progress values, sleeping `step` between them
    Stepped { steps: u32, step: Duration },
}

pub(crate) struct ScriptedExecutor {
    capability: CapabilityType,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub(crate) fn new(capability: CapabilityType, behavior: Behavior) -> Self {
        Self {
            capability,
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn capability(&self) -> CapabilityType {
        self.capability.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        _subtask: &Subtask,
        ctx: ExecutionContext,
    ) -> Result<String, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed(result) => Ok(result.clone()),
            Behavior::SucceedAfter(delay, result) => {
                tokio::time::sleep(*delay).await;
                Ok(result.clone())
            }
            Behavior::Fail(message) => Err(ExecutorError::Failed(message.clone())),
            Behavior::FailAfter(delay, message) => {
                tokio::time::sleep(*delay).await;
                Err(ExecutorError::Failed(message.clone()))
            }
            Behavior::Hang => {
                ctx.cancel.cancelled().await;
                Err(ExecutorError::Cancelled)
            }
            Behavior::Rendezvous(barrier, result) => {
                barrier.wait().await;
                Ok(result.clone())
            }
            Behavior::EchoUpstream => Ok(ctx
                .upstream
                .iter()
                .map(|u| u.result.as_str())
                .collect::<Vec<_>>()
                .join("|")),
            Behavior::Stepped { steps, step } => {
                for i in 1..=*steps {
                    tokio::time::sleep(*step).await;
                    ctx.progress.report(i as f64 / *steps as f64);
                }
                Ok(format!("{} steps", steps))
            }
        }
    }
}
