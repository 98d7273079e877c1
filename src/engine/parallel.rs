//! Parallel fan-out/fan-in step handler
//!
//! Children are launched together and the handler suspends until every
//! child has settled (structured concurrency, no detached work). Completion
//! order is non-deterministic, so the merged `resources_created` sequence
//! and the order of same-key variable writes from siblings are too.

use crate::engine::{ParallelStepConfig, StepExecutionResult, StepExecutor, StepMap, WorkflowContext, WorkflowStep};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::warn;

impl StepExecutor {
    pub(crate) async fn execute_parallel_step(
        &self,
        step: &WorkflowStep,
        config: &ParallelStepConfig,
        context: &WorkflowContext,
        steps: &StepMap,
    ) -> StepExecutionResult {
        let start = Instant::now();

        let mut children = Vec::new();
        let mut missing = Vec::new();
        for child_id in &config.steps {
            match steps.get(child_id) {
                Some(child) => children.push(child),
                None => {
                    warn!(
                        step_id = %step.id,
                        child_id = %child_id,
                        "parallel child missing from workflow, reporting as failed"
                    );
                    missing.push(child_id.clone());
                }
            }
        }

        // One semaphore per group: nested parallel steps bound their own
        // children independently, so a parent holding a slot cannot starve
        // the children it is waiting on.
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let futures = children.into_iter().map(|child| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("parallel semaphore closed");
                self.execute_step(child, context, steps).await
            }
        });
        let mut child_results: Vec<StepExecutionResult> = join_all(futures).await;

        // Dangling child ids participate in aggregation as failures rather
        // than being silently dropped.
        child_results.extend(
            missing
                .iter()
                .map(|child_id| StepExecutionResult::step_not_found(child_id, 0)),
        );

        for child_result in &child_results {
            context.record_step_result(child_result.clone()).await;
        }

        let all_succeeded = child_results.iter().all(|r| r.success);
        let any_succeeded = child_results.iter().any(|r| r.success);
        let success = if config.wait_for_all {
            all_succeeded
        } else {
            any_succeeded
        };

        let summary: Vec<_> = child_results
            .iter()
            .map(|r| json!({"step_id": r.step_id, "success": r.success}))
            .collect();
        let resources_created = child_results
            .iter()
            .flat_map(|r| r.resources_created.iter().cloned())
            .collect();

        // Branch selection follows the step's own computed success, so the
        // reported flag and the branch taken can never disagree.
        let next_step_id = if success {
            step.on_success.clone()
        } else {
            step.on_error.clone()
        };
        let error = if success {
            None
        } else {
            let failed: Vec<_> = child_results
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.step_id.as_str())
                .collect();
            Some(format!("parallel children failed: {}", failed.join(", ")))
        };

        StepExecutionResult {
            step_id: step.id.clone(),
            step_type: Some(step.step_type()),
            success,
            data: Some(json!({"steps": summary})),
            error,
            next_step_id,
            execution_time_ms: start.elapsed().as_millis() as u64,
            resources_created,
            metadata: [
                ("wait_for_all".to_string(), json!(config.wait_for_all)),
                ("all_succeeded".to_string(), json!(all_succeeded)),
                ("child_count".to_string(), json!(child_results.len())),
            ]
            .into_iter()
            .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::ToolExecutionResult;
    use crate::engine::{step_map, StepConfig, ToolStepConfig};
    use crate::testing::{StubAgentExecutor, StubAgentStore, StubToolExecutor};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn tool_step(id: &str, tool: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            config: StepConfig::Tool(ToolStepConfig {
                tool_name: tool.to_string(),
                parameters: Value::Null,
                output_mapping: HashMap::new(),
            }),
            on_success: None,
            on_error: None,
            retry_config: None,
        }
    }

    fn parallel_step(child_ids: &[&str], wait_for_all: bool) -> (WorkflowStep, ParallelStepConfig) {
        let config = ParallelStepConfig {
            steps: child_ids.iter().map(|s| s.to_string()).collect(),
            wait_for_all,
        };
        let step = WorkflowStep {
            id: "fan".to_string(),
            config: StepConfig::Parallel(config.clone()),
            on_success: Some("after".to_string()),
            on_error: Some("recover".to_string()),
            retry_config: None,
        };
        (step, config)
    }

    fn executor(tools: StubToolExecutor) -> StepExecutor {
        StepExecutor::new(
            Arc::new(tools),
            Arc::new(StubAgentExecutor::default()),
            Arc::new(StubAgentStore::default()),
        )
    }

    #[tokio::test]
    async fn test_wait_for_all_with_one_failure() {
        let tools = StubToolExecutor::new();
        tools.push_result("ok_a", ToolExecutionResult::ok(json!(1)));
        tools.push_result("ok_b", ToolExecutionResult::ok(json!(2)));
        tools.push_result("bad", ToolExecutionResult::failed("boom"));
        let executor = executor(tools);

        let (step, config) = parallel_step(&["a", "b", "c"], true);
        let all = vec![
            step.clone(),
            tool_step("a", "ok_a"),
            tool_step("b", "ok_b"),
            tool_step("c", "bad"),
        ];
        let map = step_map(&all);
        let context = WorkflowContext::new("wf", "org", "user");

        let result = executor.execute_parallel_step(&step, &config, &context, &map).await;

        assert!(!result.success);
        assert_eq!(result.next_step_id.as_deref(), Some("recover"));
        let summary = result.data.as_ref().unwrap()["steps"].as_array().unwrap();
        assert_eq!(summary.len(), 3);
        let failures: Vec<_> = summary.iter().filter(|s| s["success"] == false).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["step_id"], "c");
    }

    #[tokio::test]
    async fn test_any_success_with_wait_for_all_false() {
        let tools = StubToolExecutor::new();
        tools.push_result("ok_a", ToolExecutionResult::ok(json!(1)));
        tools.push_result("bad", ToolExecutionResult::failed("boom"));
        let executor = executor(tools);

        let (step, config) = parallel_step(&["a", "c"], false);
        let all = vec![step.clone(), tool_step("a", "ok_a"), tool_step("c", "bad")];
        let map = step_map(&all);
        let context = WorkflowContext::new("wf", "org", "user");

        let result = executor.execute_parallel_step(&step, &config, &context, &map).await;

        assert!(result.success);
        assert_eq!(result.next_step_id.as_deref(), Some("after"));
        assert_eq!(result.metadata["all_succeeded"], json!(false));
    }

    #[tokio::test]
    async fn test_missing_child_reported_as_failure() {
        let tools = StubToolExecutor::new();
        tools.push_result("ok_a", ToolExecutionResult::ok(json!(1)));
        let executor = executor(tools);

        let (step, config) = parallel_step(&["a", "ghost"], true);
        let all = vec![step.clone(), tool_step("a", "ok_a")];
        let map = step_map(&all);
        let context = WorkflowContext::new("wf", "org", "user");

        let result = executor.execute_parallel_step(&step, &config, &context, &map).await;

        assert!(!result.success);
        let summary = result.data.as_ref().unwrap()["steps"].as_array().unwrap();
        assert_eq!(summary.len(), 2);
        assert!(summary.iter().any(|s| s["step_id"] == "ghost" && s["success"] == false));
        let ghost = context.step_result("ghost").await.unwrap();
        assert!(ghost.error.as_deref().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_nested_parallel_recursion() {
        let tools = StubToolExecutor::new();
        tools.push_result("ok_a", ToolExecutionResult::ok(json!(1)));
        tools.push_result("ok_b", ToolExecutionResult::ok(json!(2)));
        let executor = executor(tools);

        let inner_config = ParallelStepConfig {
            steps: vec!["a".to_string(), "b".to_string()],
            wait_for_all: true,
        };
        let inner = WorkflowStep {
            id: "inner".to_string(),
            config: StepConfig::Parallel(inner_config),
            on_success: None,
            on_error: None,
            retry_config: None,
        };
        let (outer, outer_config) = parallel_step(&["inner"], true);
        let all = vec![
            outer.clone(),
            inner,
            tool_step("a", "ok_a"),
            tool_step("b", "ok_b"),
        ];
        let map = step_map(&all);
        let context = WorkflowContext::new("wf", "org", "user");

        let result = executor
            .execute_parallel_step(&outer, &outer_config, &context, &map)
            .await;

        assert!(result.success);
        assert!(context.step_result("a").await.unwrap().success);
        assert!(context.step_result("b").await.unwrap().success);
        assert!(context.step_result("inner").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_resources_merged_from_children() {
        let tools = StubToolExecutor::new();
        tools.push_result(
            "ok_a",
            ToolExecutionResult::ok(json!(1)).with_resources(vec![json!({"id": "r1"})]),
        );
        tools.push_result(
            "ok_b",
            ToolExecutionResult::ok(json!(2)).with_resources(vec![json!({"id": "r2"})]),
        );
        let executor = executor(tools);

        let (step, config) = parallel_step(&["a", "b"], true);
        let all = vec![step.clone(), tool_step("a", "ok_a"), tool_step("b", "ok_b")];
        let map = step_map(&all);
        let context = WorkflowContext::new("wf", "org", "user");

        let result = executor.execute_parallel_step(&step, &config, &context, &map).await;
        assert_eq!(result.resources_created.len(), 2);
    }
}
