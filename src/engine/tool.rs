//! Tool invocation step handler

use crate::engine::{StepExecutionResult, StepExecutor, ToolStepConfig, WorkflowContext, WorkflowStep};
use crate::interpolation::lookup_in_value;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

impl StepExecutor {
    pub(crate) async fn execute_tool_step(
        &self,
        step: &WorkflowStep,
        config: &ToolStepConfig,
        context: &WorkflowContext,
    ) -> StepExecutionResult {
        let start = Instant::now();
        match self.run_tool_step(step, config, context).await {
            Ok(result) => result,
            Err(err) => StepExecutionResult::failed(
                step,
                err.to_string(),
                start.elapsed().as_millis() as u64,
            )
            .with_metadata("tool_name", json!(config.tool_name)),
        }
    }

    async fn run_tool_step(
        &self,
        step: &WorkflowStep,
        config: &ToolStepConfig,
        context: &WorkflowContext,
    ) -> anyhow::Result<StepExecutionResult> {
        let start = Instant::now();

        let variables = context.variables.snapshot().await;
        let parameters = self.templates.resolve(&config.parameters, &variables);
        let tool_context = context.tool_call_context();

        let outcome = self
            .tools
            .execute_tool(&config.tool_name, parameters, &tool_context)
            .await?;

        if outcome.success {
            for (source_path, variable_name) in &config.output_mapping {
                let extracted = outcome
                    .data
                    .as_ref()
                    .and_then(|data| lookup_in_value(data, source_path));
                match extracted {
                    Some(value) => {
                        context
                            .variables
                            .set_from(&step.id, variable_name.clone(), value)
                            .await;
                    }
                    // a missing source path skips the mapping, never fails
                    // the step
                    None => debug!(
                        step_id = %step.id,
                        source_path = %source_path,
                        "output mapping path absent from tool result, skipping"
                    ),
                }
            }
        }

        // The full payload is stored under the step id whether the call
        // succeeded or not; an absent payload stores an explicit null.
        context
            .variables
            .set_from(
                &step.id,
                step.id.clone(),
                outcome.data.clone().unwrap_or(Value::Null),
            )
            .await;

        let elapsed = start.elapsed().as_millis() as u64;
        let next_step_id = if outcome.success {
            step.on_success.clone()
        } else {
            step.on_error.clone()
        };
        Ok(StepExecutionResult {
            step_id: step.id.clone(),
            step_type: Some(step.step_type()),
            success: outcome.success,
            data: outcome.data,
            error: outcome.error,
            next_step_id,
            execution_time_ms: elapsed,
            resources_created: outcome.metadata.resources_created,
            metadata: [("tool_name".to_string(), json!(config.tool_name))]
                .into_iter()
                .collect(),
        })
    }
}
