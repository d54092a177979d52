//! Simulated executors.
//!
//! Stand-ins for real capability workers: each walks through a fixed list
//! of named steps, sleeping between them and reporting progress, then
//! returns a markdown result built from the task and upstream results.

use std::time::Duration;

use async_trait::async_trait;

use super::{ExecutionContext, Executor, ExecutorError};
use crate::task::{CapabilityType, Subtask};

pub struct SimulatedExecutor {
    capability: CapabilityType,
    name: String,
    step: Duration,
}

impl SimulatedExecutor {
    pub fn new(capability: CapabilityType, step: Duration) -> Self {
        let name = format!("simulated-{}", capability.as_str().replace('_', "-"));
        Self {
            capability,
            name,
            step,
        }
    }

    fn steps(&self) -> &'static [&'static str] {
        match self.capability {
            CapabilityType::WebResearch => &[
                "Searching for relevant sources",
                "Analyzing top results",
                "Extracting key information",
                "Compiling research findings",
            ],
            CapabilityType::DataAnalysis => &[
                "Loading data",
                "Cleaning and normalizing",
                "Computing statistics",
                "Summarizing insights",
            ],
            CapabilityType::CodeGeneration => &[
                "Reading requirements",
                "Drafting implementation",
                "Reviewing generated code",
            ],
            CapabilityType::ContentCreation => &[
                "Outlining",
                "Drafting content",
                "Editing and polishing",
            ],
            CapabilityType::Custom(_) => &["Working"],
        }
    }

    fn render(&self, subtask: &Subtask, ctx: &ExecutionContext) -> String {
        let mut out = format!("## {} Results\n\n", self.capability.label());
        out.push_str(&format!("Task: {}\n\n", ctx.task_description));
        out.push_str(&format!("{}.\n", subtask.description()));

        if !ctx.upstream.is_empty() {
            out.push_str("\n### Inputs\n\n");
            for upstream in &ctx.upstream {
                let first_line = upstream.result.lines().next().unwrap_or_default();
                out.push_str(&format!("- {}: {}\n", upstream.capability.label(), first_line));
            }
        }

        out.push_str("\n### Steps\n\n");
        for (i, step) in self.steps().iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
        out
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    fn capability(&self) -> CapabilityType {
        self.capability.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        subtask: &Subtask,
        ctx: ExecutionContext,
    ) -> Result<String, ExecutorError> {
        let steps = self.steps();
        let total = steps.len() as f64;

        for (i, step) in steps.iter().enumerate() {
            ctx.progress.report((i as f64 + 0.5) / total);
            tracing::trace!("{} on subtask {}: {}", self.name, subtask.id(), step);
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = tokio::time::sleep(self.step) => {}
            }
        }

        Ok(self.render(subtask, &ctx))
    }
}
