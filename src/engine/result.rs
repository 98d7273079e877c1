//! Step and run result types

use crate::engine::{StepType, WorkflowStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The outcome of one step attempt
///
/// A fresh result is created per attempt, retries included; the run loop
/// keeps every attempt in its history list and selects the authoritative one
/// for transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub step_id: String,
    /// `None` only on synthetic step-not-found results, where the step's
    /// type is unknowable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<StepType>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the run loop should jump next; `None` ends the walk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    /// Wall-clock duration of this attempt
    pub execution_time_ms: u64,
    /// Opaque resource references in completion order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_created: Vec<Value>,
    /// Free-form step-type-specific diagnostics
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl StepExecutionResult {
    /// Successful result for a step, branching to its `on_success` target
    pub fn succeeded(step: &WorkflowStep, execution_time_ms: u64) -> Self {
        Self {
            step_id: step.id.clone(),
            step_type: Some(step.step_type()),
            success: true,
            data: None,
            error: None,
            next_step_id: step.on_success.clone(),
            execution_time_ms,
            resources_created: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Failed result for a step, branching to its `on_error` target
    pub fn failed(step: &WorkflowStep, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            step_id: step.id.clone(),
            step_type: Some(step.step_type()),
            success: false,
            data: None,
            error: Some(error.into()),
            next_step_id: step.on_error.clone(),
            execution_time_ms,
            resources_created: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Synthetic terminal failure for a dangling step reference
    pub fn step_not_found(step_id: &str, execution_time_ms: u64) -> Self {
        Self {
            step_id: step_id.to_string(),
            step_type: None,
            success: false,
            data: None,
            error: Some(crate::error::EngineError::StepNotFound(step_id.to_string()).to_string()),
            next_step_id: None,
            execution_time_ms,
            resources_created: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The outcome of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: String,
    /// True iff every entry in `results` succeeded, retry attempts included
    pub success: bool,
    /// Every attempt in execution order; retries are visible as separate
    /// entries for the same step id
    pub results: Vec<StepExecutionResult>,
    pub total_execution_time_ms: u64,
    /// Concatenated across all steps in completion order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_created: Vec<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
