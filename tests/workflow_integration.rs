//! End-to-end tests for the workflow run loop against stub collaborators

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use stepflow::abstractions::ToolExecutionResult;
use stepflow::engine::{
    ConditionStepConfig, ParallelStepConfig, RetryConfig, StepConfig, StepExecutor,
    ToolStepConfig, WorkflowContext, WorkflowStep,
};
use stepflow::testing::{StubAgentExecutor, StubAgentStore, StubToolExecutor};

fn executor(tools: &StubToolExecutor) -> StepExecutor {
    StepExecutor::new(
        Arc::new(tools.clone()),
        Arc::new(StubAgentExecutor::default()),
        Arc::new(StubAgentStore::default()),
    )
}

fn step(id: &str, config: StepConfig) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        config,
        on_success: None,
        on_error: None,
        retry_config: None,
    }
}

fn tool_config(tool_name: &str) -> StepConfig {
    StepConfig::Tool(ToolStepConfig {
        tool_name: tool_name.to_string(),
        parameters: Value::Null,
        output_mapping: HashMap::new(),
    })
}

#[tokio::test]
async fn linear_chain_executes_in_order() {
    let tools = StubToolExecutor::new();
    for tool in ["t_a", "t_b", "t_c"] {
        tools.push_result(tool, ToolExecutionResult::ok(json!({"from": tool})));
    }
    let executor = executor(&tools);

    let mut a = step("a", tool_config("t_a"));
    a.on_success = Some("b".to_string());
    let mut b = step("b", tool_config("t_b"));
    b.on_success = Some("c".to_string());
    let c = step("c", tool_config("t_c"));
    let steps = vec![a, b, c];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    assert!(result.success);
    let order: Vec<_> = result.results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn failure_follows_on_error_and_skips_on_success() {
    let tools = StubToolExecutor::new();
    tools.push_result("t_a", ToolExecutionResult::failed("upstream 500"));
    tools.push_result("t_b", ToolExecutionResult::ok(json!(1)));
    tools.push_result("t_c", ToolExecutionResult::ok(json!(2)));
    let executor = executor(&tools);

    let mut a = step("a", tool_config("t_a"));
    a.on_success = Some("b".to_string());
    a.on_error = Some("c".to_string());
    let b = step("b", tool_config("t_b"));
    let c = step("c", tool_config("t_c"));
    let steps = vec![a, b, c];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    let order: Vec<_> = result.results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(order, vec!["a", "c"]);
    assert!(!result.success);
    // b's tool was never invoked
    assert!(tools.calls().iter().all(|call| call.tool_name != "t_b"));
}

#[tokio::test]
async fn retry_then_succeed_keeps_both_attempts_visible() {
    let tools = StubToolExecutor::new();
    tools.push_result("flaky", ToolExecutionResult::failed("transient"));
    tools.push_result("flaky", ToolExecutionResult::ok(json!({"ok": true})));
    tools.push_result("t_b", ToolExecutionResult::ok(json!(1)));
    let executor = executor(&tools);

    let mut a = step("a", tool_config("flaky"));
    a.on_success = Some("b".to_string());
    a.retry_config = Some(RetryConfig {
        max_retries: 2,
        backoff_ms: 10,
    });
    let b = step("b", tool_config("t_b"));
    let steps = vec![a, b];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    let attempts: Vec<_> = result.results.iter().filter(|r| r.step_id == "a").collect();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert!(attempts[1].success);
    assert_eq!(attempts[1].metadata["retry_attempt"], json!(1));

    // the authoritative result transitioned to on_success
    assert_eq!(result.results.last().unwrap().step_id, "b");
    // the recorded result for the step reflects the successful attempt
    assert!(context.step_result("a").await.unwrap().success);
    // overall success covers every attempt, failed first try included
    assert!(!result.success);
}

#[tokio::test]
async fn retry_exhaustion_follows_on_error() {
    let tools = StubToolExecutor::new();
    tools.push_result("always_bad", ToolExecutionResult::failed("permanent"));
    tools.push_result("t_c", ToolExecutionResult::ok(json!(1)));
    let executor = executor(&tools);

    let mut a = step("a", tool_config("always_bad"));
    a.on_success = Some("b".to_string());
    a.on_error = Some("c".to_string());
    a.retry_config = Some(RetryConfig {
        max_retries: 1,
        backoff_ms: 5,
    });
    let b = step("b", tool_config("t_b"));
    let c = step("c", tool_config("t_c"));
    let steps = vec![a, b, c];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    let attempts: Vec<_> = result.results.iter().filter(|r| r.step_id == "a").collect();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|r| !r.success));
    assert_eq!(result.results.last().unwrap().step_id, "c");
    assert!(!result.success);
}

#[tokio::test]
async fn retry_backoff_is_exponential() {
    let tools = StubToolExecutor::new();
    tools.push_result("always_bad", ToolExecutionResult::failed("permanent"));
    let executor = executor(&tools);

    let mut a = step("a", tool_config("always_bad"));
    a.retry_config = Some(RetryConfig {
        max_retries: 2,
        backoff_ms: 10,
    });
    let steps = vec![a];

    let context = WorkflowContext::new("wf", "org", "user");
    let start = Instant::now();
    let result = executor.execute_workflow(&steps, &context, None).await;

    // sleeps 10ms then 20ms before the two retries
    assert!(start.elapsed().as_millis() >= 30);
    assert_eq!(result.results.len(), 3);
}

#[tokio::test]
async fn parallel_wait_for_all_fails_on_one_failure() {
    let tools = StubToolExecutor::new();
    tools.push_result("t_a", ToolExecutionResult::ok(json!(1)));
    tools.push_result("t_b", ToolExecutionResult::ok(json!(2)));
    tools.push_result("bad", ToolExecutionResult::failed("boom"));
    tools.push_result("t_r", ToolExecutionResult::ok(json!("recovered")));
    let executor = executor(&tools);

    let mut fan = step(
        "fan",
        StepConfig::Parallel(ParallelStepConfig {
            steps: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            wait_for_all: true,
        }),
    );
    fan.on_success = Some("after".to_string());
    fan.on_error = Some("recover".to_string());
    let steps = vec![
        fan,
        step("a", tool_config("t_a")),
        step("b", tool_config("t_b")),
        step("c", tool_config("bad")),
        step("recover", tool_config("t_r")),
        step("after", tool_config("t_after")),
    ];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    let fan_result = &result.results[0];
    assert!(!fan_result.success);
    assert_eq!(fan_result.next_step_id.as_deref(), Some("recover"));
    let summary = fan_result.data.as_ref().unwrap()["steps"].as_array().unwrap();
    assert_eq!(summary.len(), 3);
    let by_id: HashMap<_, _> = summary
        .iter()
        .map(|s| (s["step_id"].as_str().unwrap(), s["success"].as_bool().unwrap()))
        .collect();
    assert!(by_id["a"]);
    assert!(by_id["b"]);
    assert!(!by_id["c"]);
    assert_eq!(result.results.last().unwrap().step_id, "recover");
}

#[tokio::test]
async fn parallel_any_success_succeeds_without_wait_for_all() {
    let tools = StubToolExecutor::new();
    tools.push_result("t_a", ToolExecutionResult::ok(json!(1)));
    tools.push_result("bad", ToolExecutionResult::failed("boom"));
    tools.push_result("bad2", ToolExecutionResult::failed("boom2"));
    let executor = executor(&tools);

    let fan = step(
        "fan",
        StepConfig::Parallel(ParallelStepConfig {
            steps: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            wait_for_all: false,
        }),
    );
    let steps = vec![
        fan,
        step("a", tool_config("t_a")),
        step("b", tool_config("bad")),
        step("c", tool_config("bad2")),
    ];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    assert!(result.results[0].success);
}

#[tokio::test]
async fn output_mapping_propagates_variables() {
    let tools = StubToolExecutor::new();
    tools.push_result(
        "counter",
        ToolExecutionResult::ok(json!({"result": {"count": 5}})),
    );
    let executor = executor(&tools);

    let a = step(
        "a",
        StepConfig::Tool(ToolStepConfig {
            tool_name: "counter".to_string(),
            parameters: Value::Null,
            output_mapping: [("result.count".to_string(), "totalCount".to_string())]
                .into_iter()
                .collect(),
        }),
    );
    let steps = vec![a];

    let context = WorkflowContext::new("wf", "org", "user");
    executor.execute_workflow(&steps, &context, None).await;

    assert_eq!(context.variables.get("totalCount").await, Some(json!(5)));
}

#[tokio::test]
async fn missing_output_path_skips_only_that_mapping() {
    let tools = StubToolExecutor::new();
    tools.push_result("counter", ToolExecutionResult::ok(json!({"count": 7})));
    let executor = executor(&tools);

    let a = step(
        "a",
        StepConfig::Tool(ToolStepConfig {
            tool_name: "counter".to_string(),
            parameters: Value::Null,
            output_mapping: [
                ("count".to_string(), "total".to_string()),
                ("absent.path".to_string(), "never".to_string()),
            ]
            .into_iter()
            .collect(),
        }),
    );
    let steps = vec![a];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    assert!(result.success);
    assert_eq!(context.variables.get("total").await, Some(json!(7)));
    assert_eq!(context.variables.get("never").await, None);
}

#[tokio::test]
async fn dangling_next_step_halts_with_reported_failure() {
    let tools = StubToolExecutor::new();
    tools.push_result("t_a", ToolExecutionResult::ok(json!(1)));
    let executor = executor(&tools);

    let mut a = step("a", tool_config("t_a"));
    a.on_success = Some("missing".to_string());
    let steps = vec![a];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    assert!(!result.success);
    assert_eq!(result.results.len(), 2);
    let last = result.results.last().unwrap();
    assert!(!last.success);
    assert!(last.error.as_deref().unwrap().contains("missing"));
    assert!(last.next_step_id.is_none());
}

#[tokio::test]
async fn audience_check_scenario_end_to_end() {
    let tools = StubToolExecutor::new();
    tools.push_result("lookup_audience", ToolExecutionResult::ok(json!({"size": 5000})));
    let executor = executor(&tools);

    let mut fetch = step(
        "fetch",
        StepConfig::Tool(ToolStepConfig {
            tool_name: "lookup_audience".to_string(),
            parameters: json!({"marketId": "{{market}}"}),
            output_mapping: [("size".to_string(), "audienceSize".to_string())]
                .into_iter()
                .collect(),
        }),
    );
    fetch.on_success = Some("check".to_string());
    let check = step(
        "check",
        StepConfig::Condition(ConditionStepConfig {
            expression: "audienceSize > 1000".to_string(),
            true_step: Some("notify".to_string()),
            false_step: None,
        }),
    );
    let steps = vec![fetch, check];

    let context = WorkflowContext::new("wf", "org", "user");
    context.variables.set("market", json!("US")).await;
    let result = executor.execute_workflow(&steps, &context, None).await;

    // the tool saw the resolved market id
    assert_eq!(tools.calls()[0].parameters, json!({"marketId": "US"}));
    assert_eq!(context.variables.get("audienceSize").await, Some(json!(5000)));

    // fetch succeeded, check evaluated true, notify does not exist
    let order: Vec<_> = result.results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(order, vec!["fetch", "check", "notify"]);
    assert_eq!(result.results[1].data.as_ref().unwrap()["result"], true);
    assert_eq!(
        result.results[1].next_step_id.as_deref(),
        Some("notify")
    );
    let last = result.results.last().unwrap();
    assert!(!last.success);
    assert!(last.error.as_deref().unwrap().contains("notify"));
    assert!(!result.success);
}

#[tokio::test]
async fn start_step_id_overrides_first_step() {
    let tools = StubToolExecutor::new();
    tools.push_result("t_b", ToolExecutionResult::ok(json!(1)));
    let executor = executor(&tools);

    let a = step("a", tool_config("t_a"));
    let b = step("b", tool_config("t_b"));
    let steps = vec![a, b];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, Some("b")).await;

    assert!(result.success);
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].step_id, "b");
}

#[tokio::test]
async fn empty_workflow_is_a_successful_no_op() {
    let tools = StubToolExecutor::new();
    let executor = executor(&tools);

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&[], &context, None).await;

    assert!(result.success);
    assert!(result.results.is_empty());
    assert!(result.started_at <= result.finished_at);
}

#[tokio::test]
async fn run_resources_concatenate_in_completion_order() {
    let tools = StubToolExecutor::new();
    tools.push_result(
        "t_a",
        ToolExecutionResult::ok(json!(1)).with_resources(vec![json!({"id": "r1"})]),
    );
    tools.push_result(
        "t_b",
        ToolExecutionResult::ok(json!(2)).with_resources(vec![json!({"id": "r2"})]),
    );
    let executor = executor(&tools);

    let mut a = step("a", tool_config("t_a"));
    a.on_success = Some("b".to_string());
    let b = step("b", tool_config("t_b"));
    let steps = vec![a, b];

    let context = WorkflowContext::new("wf", "org", "user");
    let result = executor.execute_workflow(&steps, &context, None).await;

    assert_eq!(
        result.resources_created,
        vec![json!({"id": "r1"}), json!({"id": "r2"})]
    );
}

#[tokio::test]
async fn sibling_writes_to_same_variable_are_flagged_when_tracked() {
    let tools = StubToolExecutor::new();
    tools.push_result("t_a", ToolExecutionResult::ok(json!({"n": 1})));
    tools.push_result("t_b", ToolExecutionResult::ok(json!({"n": 2})));
    let executor = executor(&tools);

    let shared_mapping: HashMap<String, String> =
        [("n".to_string(), "shared".to_string())].into_iter().collect();
    let fan = step(
        "fan",
        StepConfig::Parallel(ParallelStepConfig {
            steps: vec!["a".to_string(), "b".to_string()],
            wait_for_all: true,
        }),
    );
    let a = step(
        "a",
        StepConfig::Tool(ToolStepConfig {
            tool_name: "t_a".to_string(),
            parameters: Value::Null,
            output_mapping: shared_mapping.clone(),
        }),
    );
    let b = step(
        "b",
        StepConfig::Tool(ToolStepConfig {
            tool_name: "t_b".to_string(),
            parameters: Value::Null,
            output_mapping: shared_mapping,
        }),
    );
    let steps = vec![fan, a, b];

    let context = WorkflowContext::new("wf", "org", "user");
    context.variables.enable_write_tracking();
    let result = executor.execute_workflow(&steps, &context, None).await;

    assert!(result.success);
    let conflicts = context.variables.conflicts().await;
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].contains("shared"));
    // last-write-wins either way
    let shared = context.variables.get("shared").await.unwrap();
    assert!(shared == json!(1) || shared == json!(2));
}
