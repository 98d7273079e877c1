//! Trait-based abstractions for the engine's external collaborators
//!
//! The engine consumes three capabilities it does not implement: tool
//! execution, agent execution (with and without tool access), and agent
//! definition lookup. Each is a trait object held behind `Arc<dyn _>`,
//! enabling testing with in-process doubles (see `crate::testing`) and
//! keeping transport, persistence, and LLM plumbing out of scope.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribution identifiers threaded into every tool call made on behalf of a
/// run. The engine passes these through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContext {
    pub org_id: String,
    pub user_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

/// Side-band information returned by a tool call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResultMetadata {
    /// Opaque references to records the tool created, in creation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_created: Vec<Value>,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ToolResultMetadata,
}

impl ToolExecutionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ToolResultMetadata::default(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: ToolResultMetadata::default(),
        }
    }

    pub fn with_resources(mut self, resources: Vec<Value>) -> Self {
        self.metadata.resources_created = resources;
        self
    }
}

/// Executes named tools against already-resolved parameters
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Invoke `tool_name` with `parameters`. Tool-level failures are reported
    /// through `ToolExecutionResult::success`; `Err` is reserved for faults in
    /// the execution machinery itself.
    async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: Value,
        context: &ToolCallContext,
    ) -> Result<ToolExecutionResult>;
}

/// Stored model configuration of an agent definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// An agent definition as stored by the surrounding platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub agent_type: String,
    pub name: String,
    #[serde(default)]
    pub configuration: AgentConfiguration,
}

/// Looks up agent definitions scoped to an org
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, agent_id: &str, org_id: &str) -> Result<AgentDefinition>;
}

/// Request for a plain (tool-less) agent turn
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent_type: String,
    pub agent_name: String,
    pub user_input: String,
    pub system_prompt: Option<String>,
    pub config: AgentConfiguration,
}

/// Response from a plain agent turn
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub response: String,
    pub tokens_used: u64,
}

/// Request for a tool-augmented agent turn
#[derive(Debug, Clone)]
pub struct AgentToolRequest {
    pub agent_type: String,
    pub agent_name: String,
    pub user_input: String,
    pub system_prompt: Option<String>,
    pub tool_context: ToolCallContext,
    /// Restriction on which tools the agent may call; `None` means all
    pub enabled_tools: Option<Vec<String>>,
    pub config: AgentConfiguration,
}

/// Response from a tool-augmented agent turn
#[derive(Debug, Clone)]
pub struct AgentToolResponse {
    pub response: String,
    pub tool_calls: u32,
    pub tokens_used: u64,
    pub resources_created: Vec<Value>,
}

/// Executes agent turns
///
/// Failures surface as `Err`, not as a typed failure payload; the engine
/// converts them into failed step results at the handler boundary.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse>;

    async fn execute_with_tools(&self, request: AgentToolRequest) -> Result<AgentToolResponse>;
}
