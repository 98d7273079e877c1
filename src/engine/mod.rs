//! Step data model, execution context, and the step-execution engine
//!
//! A workflow is a directed graph of [`WorkflowStep`]s linked by
//! `on_success`/`on_error` step ids. The engine walks the graph one step at
//! a time, dispatching each step to a type-specific handler and threading
//! outputs through the run's shared [`VariableStore`]. Concurrency exists
//! only inside a parallel step.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub mod agent;
pub mod condition;
pub mod context;
pub mod executor;
pub mod parallel;
pub mod result;
pub mod tool;
pub mod transform;

pub use context::{VariableStore, WorkflowContext};
pub use executor::StepExecutor;
pub use result::{StepExecutionResult, WorkflowResult};
pub use transform::{AggregateOp, SortOrder, TransformOp};

/// Discriminator for the closed set of step types, echoed into results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Tool,
    Agent,
    Condition,
    Transform,
    Parallel,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepType::Tool => "tool",
            StepType::Agent => "agent",
            StepType::Condition => "condition",
            StepType::Transform => "transform",
            StepType::Parallel => "parallel",
        };
        write!(f, "{name}")
    }
}

/// A node in a workflow's execution graph
///
/// Constructed once per workflow definition and never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique id within the workflow
    pub id: String,
    /// Type-specific configuration payload
    #[serde(flatten)]
    pub config: StepConfig,
    /// Next step when this one succeeds; absence halts the walk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Next step when this one fails; absence halts the walk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
}

impl WorkflowStep {
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }
}

/// Closed tagged union of per-type step configuration
///
/// Dispatch is an exhaustive `match`; adding a step type is a compile-time
/// change, not a registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum StepConfig {
    Tool(ToolStepConfig),
    Agent(AgentStepConfig),
    Condition(ConditionStepConfig),
    Transform(TransformStepConfig),
    Parallel(ParallelStepConfig),
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::Tool(_) => StepType::Tool,
            StepConfig::Agent(_) => StepType::Agent,
            StepConfig::Condition(_) => StepType::Condition,
            StepConfig::Transform(_) => StepType::Transform,
            StepConfig::Parallel(_) => StepType::Parallel,
        }
    }
}

/// Per-step retry policy: up to `max_retries` further attempts, sleeping
/// `backoff_ms * 2^attempt` before each (attempt index from 0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

/// Configuration for a tool invocation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStepConfig {
    pub tool_name: String,
    /// Template structure resolved against the variable store before the call
    #[serde(default)]
    pub parameters: Value,
    /// `source path in the tool result -> variable name` extraction pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output_mapping: HashMap<String, String>,
}

/// Configuration for an agent invocation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStepConfig {
    pub agent_id: String,
    /// Template structure; an object with a `prompt` field supplies the
    /// input message directly, anything else is stringified
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub enable_tools: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
}

/// Configuration for a conditional branch step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionStepConfig {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_step: Option<String>,
}

/// Configuration for a data transform step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformStepConfig {
    /// `local key -> variable path` pairs building the pipeline input object
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_mapping: HashMap<String, String>,
    /// Operations applied strictly in order
    #[serde(default)]
    pub transformations: Vec<TransformOp>,
    pub output_variable: String,
}

/// Configuration for a parallel fan-out step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStepConfig {
    /// Child step ids, resolved against the same full step map as the
    /// top-level walk (children may themselves be parallel steps)
    pub steps: Vec<String>,
    /// true: succeed only if every child succeeded; false: succeed if at
    /// least one child succeeded. All children are awaited either way.
    #[serde(default = "default_wait_for_all")]
    pub wait_for_all: bool,
}

fn default_wait_for_all() -> bool {
    true
}

/// Step lookup map used by the run loop and parallel fan-out
pub type StepMap = HashMap<String, WorkflowStep>;

/// Build the id-keyed lookup map for a step slice
pub fn step_map(steps: &[WorkflowStep]) -> StepMap {
    steps.iter().map(|s| (s.id.clone(), s.clone())).collect()
}
