//! Agent invocation step handler

use crate::abstractions::{AgentRequest, AgentToolRequest};
use crate::engine::{AgentStepConfig, StepExecutionResult, StepExecutor, WorkflowContext, WorkflowStep};
use crate::interpolation::value_display;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;

impl StepExecutor {
    pub(crate) async fn execute_agent_step(
        &self,
        step: &WorkflowStep,
        config: &AgentStepConfig,
        context: &WorkflowContext,
    ) -> StepExecutionResult {
        let start = Instant::now();
        match self.run_agent_step(step, config, context).await {
            Ok(result) => result,
            Err(err) => StepExecutionResult::failed(
                step,
                err.to_string(),
                start.elapsed().as_millis() as u64,
            )
            .with_metadata("agent_id", json!(config.agent_id)),
        }
    }

    async fn run_agent_step(
        &self,
        step: &WorkflowStep,
        config: &AgentStepConfig,
        context: &WorkflowContext,
    ) -> anyhow::Result<StepExecutionResult> {
        let start = Instant::now();

        let variables = context.variables.snapshot().await;
        let resolved = self.templates.resolve(&config.input, &variables);
        let user_input = agent_input_message(&resolved);

        let agent = self
            .agent_store
            .get_agent(&config.agent_id, &context.org_id)
            .await?;

        let summary = if config.enable_tools {
            let response = self
                .agents
                .execute_with_tools(AgentToolRequest {
                    agent_type: agent.agent_type.clone(),
                    agent_name: agent.name.clone(),
                    user_input,
                    system_prompt: agent.configuration.system_prompt.clone(),
                    tool_context: context.tool_call_context(),
                    enabled_tools: config.allowed_tools.clone(),
                    config: agent.configuration.clone(),
                })
                .await?;
            AgentStepSummary {
                response: response.response,
                tokens_used: response.tokens_used,
                tool_calls: Some(response.tool_calls),
                resources_created: response.resources_created,
            }
        } else {
            let response = self
                .agents
                .execute(AgentRequest {
                    agent_type: agent.agent_type.clone(),
                    agent_name: agent.name.clone(),
                    user_input,
                    system_prompt: agent.configuration.system_prompt.clone(),
                    config: agent.configuration.clone(),
                })
                .await?;
            AgentStepSummary {
                response: response.response,
                tokens_used: response.tokens_used,
                tool_calls: None,
                resources_created: Vec::new(),
            }
        };

        let data = summary.to_json();
        context
            .variables
            .set_from(&step.id, step.id.clone(), data.clone())
            .await;

        let metadata: HashMap<String, Value> = [
            ("agent_id".to_string(), json!(config.agent_id)),
            ("agent_type".to_string(), json!(agent.agent_type)),
            ("enable_tools".to_string(), json!(config.enable_tools)),
        ]
        .into_iter()
        .collect();

        Ok(StepExecutionResult {
            step_id: step.id.clone(),
            step_type: Some(step.step_type()),
            success: true,
            data: Some(data),
            error: None,
            next_step_id: step.on_success.clone(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            resources_created: summary.resources_created,
            metadata,
        })
    }
}

struct AgentStepSummary {
    response: String,
    tokens_used: u64,
    tool_calls: Option<u32>,
    resources_created: Vec<Value>,
}

impl AgentStepSummary {
    fn to_json(&self) -> Value {
        let mut summary = json!({
            "response": self.response,
            "tokens_used": self.tokens_used,
        });
        if let Some(tool_calls) = self.tool_calls {
            summary["tool_calls"] = json!(tool_calls);
        }
        summary
    }
}

/// Derive the textual input message from a resolved input template: an
/// object's `prompt` field wins, other composites are compact JSON, scalars
/// coerce to their display form
fn agent_input_message(resolved: &Value) -> String {
    if let Some(prompt) = resolved.get("prompt") {
        return value_display(prompt);
    }
    match resolved {
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(resolved).unwrap_or_default()
        }
        other => value_display(other),
    }
}
