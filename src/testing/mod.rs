//! Test doubles for the collaborator traits
//!
//! Scriptable in-process stand-ins for the tool registry, agent runtime, and
//! agent store, used by the crate's own tests and available to downstream
//! test suites.

use crate::abstractions::{
    AgentDefinition, AgentExecutor, AgentRequest, AgentResponse, AgentStore, AgentToolRequest,
    AgentToolResponse, ToolCallContext, ToolExecutionResult, ToolExecutor,
};
use crate::error::EngineError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One recorded tool invocation
#[derive(Debug, Clone)]
pub struct RecordedToolCall {
    pub tool_name: String,
    pub parameters: Value,
    pub context: ToolCallContext,
}

#[derive(Debug, Default)]
struct StubToolState {
    results: HashMap<String, VecDeque<ToolExecutionResult>>,
    faults: HashMap<String, String>,
    calls: Vec<RecordedToolCall>,
}

/// Scriptable tool executor
///
/// Results are queued per tool name and consumed in order; the last queued
/// result repeats once the queue is down to one entry, so a
/// fail-then-succeed script works naturally with retries.
#[derive(Debug, Clone, Default)]
pub struct StubToolExecutor {
    state: Arc<Mutex<StubToolState>>,
}

impl StubToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next result for `tool_name`
    pub fn push_result(&self, tool_name: &str, result: ToolExecutionResult) {
        self.state
            .lock()
            .unwrap()
            .results
            .entry(tool_name.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make every call to `tool_name` fail at the machinery level (an `Err`,
    /// not a tool-level failure result)
    pub fn fail_call(&self, tool_name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(tool_name.to_string(), message.to_string());
    }

    /// Every invocation recorded so far, in call order
    pub fn calls(&self) -> Vec<RecordedToolCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ToolExecutor for StubToolExecutor {
    async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: Value,
        context: &ToolCallContext,
    ) -> Result<ToolExecutionResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedToolCall {
            tool_name: tool_name.to_string(),
            parameters,
            context: context.clone(),
        });

        if let Some(message) = state.faults.get(tool_name) {
            return Err(anyhow!("{message}"));
        }

        let queue = state
            .results
            .get_mut(tool_name)
            .ok_or_else(|| anyhow!("no scripted result for tool '{tool_name}'"))?;
        let result = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| anyhow!("no scripted result for tool '{tool_name}'"))?
        };
        Ok(result)
    }
}

#[derive(Debug, Default)]
struct StubAgentState {
    plain_requests: Vec<AgentRequest>,
    tool_requests: Vec<AgentToolRequest>,
}

/// Scriptable agent executor
#[derive(Debug, Clone, Default)]
pub struct StubAgentExecutor {
    response: String,
    tokens_used: u64,
    tool_calls: u32,
    resources_created: Vec<Value>,
    failure: Option<String>,
    state: Arc<Mutex<StubAgentState>>,
}

impl StubAgentExecutor {
    /// Respond to every turn with the given text and token count
    pub fn with_response(response: &str, tokens_used: u64) -> Self {
        Self {
            response: response.to_string(),
            tokens_used,
            ..Self::default()
        }
    }

    /// Report tool activity on tool-augmented turns
    pub fn with_tool_activity(mut self, tool_calls: u32, resources_created: Vec<Value>) -> Self {
        self.tool_calls = tool_calls;
        self.resources_created = resources_created;
        self
    }

    /// Make every turn fail
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn plain_requests(&self) -> Vec<AgentRequest> {
        self.state.lock().unwrap().plain_requests.clone()
    }

    pub fn tool_requests(&self) -> Vec<AgentToolRequest> {
        self.state.lock().unwrap().tool_requests.clone()
    }
}

#[async_trait]
impl AgentExecutor for StubAgentExecutor {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse> {
        self.state.lock().unwrap().plain_requests.push(request);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{message}"));
        }
        Ok(AgentResponse {
            response: self.response.clone(),
            tokens_used: self.tokens_used,
        })
    }

    async fn execute_with_tools(&self, request: AgentToolRequest) -> Result<AgentToolResponse> {
        self.state.lock().unwrap().tool_requests.push(request);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{message}"));
        }
        Ok(AgentToolResponse {
            response: self.response.clone(),
            tool_calls: self.tool_calls,
            tokens_used: self.tokens_used,
            resources_created: self.resources_created.clone(),
        })
    }
}

/// In-memory agent store keyed by `(org_id, agent_id)`
#[derive(Debug, Clone, Default)]
pub struct StubAgentStore {
    agents: Arc<Mutex<HashMap<(String, String), AgentDefinition>>>,
}

impl StubAgentStore {
    pub fn insert(&self, org_id: &str, agent_id: &str, definition: AgentDefinition) {
        self.agents
            .lock()
            .unwrap()
            .insert((org_id.to_string(), agent_id.to_string()), definition);
    }
}

#[async_trait]
impl AgentStore for StubAgentStore {
    async fn get_agent(&self, agent_id: &str, org_id: &str) -> Result<AgentDefinition> {
        self.agents
            .lock()
            .unwrap()
            .get(&(org_id.to_string(), agent_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::AgentNotFound {
                    agent_id: agent_id.to_string(),
                }
                .into()
            })
    }
}
