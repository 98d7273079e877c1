//! Conditional branch step handler

use crate::engine::{ConditionStepConfig, StepExecutionResult, StepExecutor, WorkflowContext, WorkflowStep};
use serde_json::json;
use std::time::Instant;
use tracing::debug;

impl StepExecutor {
    pub(crate) async fn execute_condition_step(
        &self,
        step: &WorkflowStep,
        config: &ConditionStepConfig,
        context: &WorkflowContext,
    ) -> StepExecutionResult {
        let start = Instant::now();
        let variables = context.variables.snapshot().await;

        match self.evaluator.evaluate(&config.expression, &variables) {
            Ok(outcome) => {
                debug!(
                    step_id = %step.id,
                    expression = %config.expression,
                    outcome,
                    "condition evaluated"
                );
                let next_step_id = if outcome {
                    config.true_step.clone()
                } else {
                    config.false_step.clone()
                };
                StepExecutionResult {
                    step_id: step.id.clone(),
                    step_type: Some(step.step_type()),
                    success: true,
                    data: Some(json!({
                        "condition": config.expression,
                        "result": outcome,
                    })),
                    error: None,
                    next_step_id,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    resources_created: Vec::new(),
                    metadata: Default::default(),
                }
            }
            Err(err) => StepExecutionResult::failed(
                step,
                format!("condition evaluation failed: {err}"),
                start.elapsed().as_millis() as u64,
            ),
        }
    }
}
