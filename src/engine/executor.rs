//! Step dispatch and the top-level workflow run loop

use crate::abstractions::{AgentExecutor, AgentStore, ToolExecutor};
use crate::engine::{
    step_map, StepConfig, StepExecutionResult, StepMap, WorkflowContext, WorkflowResult,
    WorkflowStep,
};
use crate::expression::ExpressionEvaluator;
use crate::interpolation::TemplateResolver;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default bound on in-flight children of a parallel step
const DEFAULT_MAX_PARALLEL: usize = 10;

/// The workflow interpreter
///
/// Owns the external capabilities and the pure evaluators, and exposes the
/// engine's two entry points: [`StepExecutor::execute_step`] and
/// [`StepExecutor::execute_workflow`]. Neither returns an error: failures
/// become data in the returned results.
pub struct StepExecutor {
    pub(crate) tools: Arc<dyn ToolExecutor>,
    pub(crate) agents: Arc<dyn AgentExecutor>,
    pub(crate) agent_store: Arc<dyn AgentStore>,
    pub(crate) templates: TemplateResolver,
    pub(crate) evaluator: ExpressionEvaluator,
    pub(crate) max_parallel: usize,
}

impl StepExecutor {
    pub fn new(
        tools: Arc<dyn ToolExecutor>,
        agents: Arc<dyn AgentExecutor>,
        agent_store: Arc<dyn AgentStore>,
    ) -> Self {
        Self {
            tools,
            agents,
            agent_store,
            templates: TemplateResolver::new(),
            evaluator: ExpressionEvaluator::new(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Bound the number of children of any one parallel step executing at
    /// once. The bound is per parallel step (nested groups each get their
    /// own), and does not change settle-all semantics.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Execute a single step, dispatching on its config variant.
    ///
    /// Returns a boxed future because parallel steps recurse into the
    /// dispatcher for their children.
    pub fn execute_step<'a>(
        &'a self,
        step: &'a WorkflowStep,
        context: &'a WorkflowContext,
        steps: &'a StepMap,
    ) -> BoxFuture<'a, StepExecutionResult> {
        Box::pin(async move {
            debug!(step_id = %step.id, step_type = %step.step_type(), "executing step");
            let result = match &step.config {
                StepConfig::Tool(config) => self.execute_tool_step(step, config, context).await,
                StepConfig::Agent(config) => self.execute_agent_step(step, config, context).await,
                StepConfig::Condition(config) => {
                    self.execute_condition_step(step, config, context).await
                }
                StepConfig::Transform(config) => {
                    self.execute_transform_step(step, config, context).await
                }
                StepConfig::Parallel(config) => {
                    self.execute_parallel_step(step, config, context, steps).await
                }
            };
            if result.success {
                debug!(
                    step_id = %step.id,
                    elapsed_ms = result.execution_time_ms,
                    "step succeeded"
                );
            } else {
                warn!(
                    step_id = %step.id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "step failed"
                );
            }
            result
        })
    }

    /// Execute a workflow run from `start_step_id` (or the first step) to a
    /// terminal point.
    ///
    /// The walk is strictly sequential step-to-step. There is no cycle
    /// detection: a graph whose links always lead back into a cycle runs
    /// until the caller drops the future.
    pub async fn execute_workflow(
        &self,
        steps: &[WorkflowStep],
        context: &WorkflowContext,
        start_step_id: Option<&str>,
    ) -> WorkflowResult {
        let started_at = Utc::now();
        let run_start = Instant::now();
        info!(
            run_id = %context.run_id,
            workflow_id = %context.workflow_id,
            step_count = steps.len(),
            "starting workflow run"
        );

        let map = step_map(steps);
        let mut results: Vec<StepExecutionResult> = Vec::new();
        let mut current = start_step_id
            .map(str::to_string)
            .or_else(|| steps.first().map(|s| s.id.clone()));

        while let Some(step_id) = current {
            let Some(step) = map.get(&step_id) else {
                warn!(step_id = %step_id, "referenced step missing from workflow, halting");
                let synthetic = StepExecutionResult::step_not_found(&step_id, 0);
                context.record_step_result(synthetic.clone()).await;
                results.push(synthetic);
                break;
            };

            let mut authoritative = self.execute_step(step, context, &map).await;
            context.record_step_result(authoritative.clone()).await;
            results.push(authoritative.clone());

            if !authoritative.success {
                if let Some(retry) = &step.retry_config {
                    for attempt in 0..retry.max_retries {
                        let delay = backoff_delay(retry.backoff_ms, attempt);
                        debug!(
                            step_id = %step.id,
                            attempt = attempt + 1,
                            delay_ms = delay,
                            "retrying step after backoff"
                        );
                        sleep(Duration::from_millis(delay)).await;

                        let retry_result = self
                            .execute_step(step, context, &map)
                            .await
                            .with_metadata("retry_attempt", json!(attempt + 1));
                        context.record_step_result(retry_result.clone()).await;
                        results.push(retry_result.clone());

                        if retry_result.success {
                            authoritative = retry_result;
                            break;
                        }
                    }
                }
            }

            current = authoritative.next_step_id.clone();
        }

        let success = results.iter().all(|r| r.success);
        let resources_created = results
            .iter()
            .flat_map(|r| r.resources_created.iter().cloned())
            .collect();
        let total_execution_time_ms = run_start.elapsed().as_millis() as u64;
        info!(
            run_id = %context.run_id,
            success,
            step_results = results.len(),
            elapsed_ms = total_execution_time_ms,
            "workflow run finished"
        );

        WorkflowResult {
            run_id: context.run_id.clone(),
            success,
            results,
            total_execution_time_ms,
            resources_created,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Exponential backoff: `backoff_ms * 2^attempt`, saturating
fn backoff_delay(backoff_ms: u64, attempt: u32) -> u64 {
    backoff_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
}
