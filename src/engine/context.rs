//! Per-run execution context and the shared variable store
//!
//! One `WorkflowContext` is created per run by the caller, passed by
//! reference into every step handler, and discarded when the run completes.
//! The engine has no persistence responsibility; a caller may persist
//! `step_results` or the variable snapshot externally.

use crate::abstractions::ToolCallContext;
use crate::engine::result::StepExecutionResult;
use crate::interpolation::lookup_path;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// The mutable state of one workflow run
#[derive(Debug)]
pub struct WorkflowContext {
    /// Opaque attribution identifiers, passed through to tool/agent calls
    pub workflow_id: String,
    pub run_id: String,
    pub org_id: String,
    pub user_id: String,
    /// The only inter-step data channel
    pub variables: VariableStore,
    step_results: RwLock<HashMap<String, StepExecutionResult>>,
}

impl WorkflowContext {
    /// Create a context with a generated run id
    pub fn new(
        workflow_id: impl Into<String>,
        org_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::with_run_id(workflow_id, Uuid::new_v4().to_string(), org_id, user_id)
    }

    pub fn with_run_id(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        org_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            org_id: org_id.into(),
            user_id: user_id.into(),
            variables: VariableStore::new(),
            step_results: RwLock::new(HashMap::new()),
        }
    }

    /// Attribution context for tool calls made on behalf of this run
    pub fn tool_call_context(&self) -> ToolCallContext {
        ToolCallContext {
            org_id: self.org_id.clone(),
            user_id: self.user_id.clone(),
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
        }
    }

    /// Record the latest result for a step id (audit only, not control flow)
    pub async fn record_step_result(&self, result: StepExecutionResult) {
        self.step_results
            .write()
            .await
            .insert(result.step_id.clone(), result);
    }

    pub async fn step_result(&self, step_id: &str) -> Option<StepExecutionResult> {
        self.step_results.read().await.get(step_id).cloned()
    }

    pub async fn step_results(&self) -> HashMap<String, StepExecutionResult> {
        self.step_results.read().await.clone()
    }
}

/// Shared key-value store threading data between steps
///
/// Keys are step ids (each step's primary output) or explicit
/// output-mapping/transform names. Writes are append-and-overwrite only:
/// later writes to the same key silently shadow earlier ones
/// (last-write-wins, no versioning), and the store is never cleared
/// mid-run. Sibling steps inside one parallel group share the store, so
/// two siblings assigning the same output variable race; callers must not
/// do that, and the write tracker exists to surface it in tests.
#[derive(Debug, Default)]
pub struct VariableStore {
    values: RwLock<HashMap<String, Value>>,
    track_writes: AtomicBool,
    writers: RwLock<HashMap<String, String>>,
    conflicts: RwLock<Vec<String>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
            ..Self::default()
        }
    }

    /// Set a variable (last-write-wins)
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().await.insert(key.into(), value);
    }

    /// Set a variable, attributing the write to a step for conflict tracking
    pub async fn set_from(&self, writer: &str, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.track_writes.load(Ordering::Relaxed) {
            let mut writers = self.writers.write().await;
            if let Some(previous) = writers.get(&key) {
                if previous != writer {
                    let conflict = format!(
                        "variable '{key}' written by '{writer}' after '{previous}'"
                    );
                    warn!("{conflict}");
                    self.conflicts.write().await.push(conflict);
                }
            }
            writers.insert(key.clone(), writer.to_string());
        }
        self.values.write().await.insert(key, value);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    /// Nested lookup (`fetch.items[0].name`) against the current contents
    pub async fn lookup(&self, path: &str) -> Option<Value> {
        lookup_path(&*self.values.read().await, path)
    }

    /// Clone the current contents, e.g. for template or expression evaluation
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.values.read().await.clone()
    }

    /// Bulk-seed variables, e.g. the caller's run inputs
    pub async fn insert_all(&self, values: HashMap<String, Value>) {
        self.values.write().await.extend(values);
    }

    /// Enable the debug write tracker: same-key writes from different steps
    /// are logged and recorded. Intended for tests; off by default.
    pub fn enable_write_tracking(&self) {
        self.track_writes.store(true, Ordering::Relaxed);
    }

    /// Conflicts recorded since tracking was enabled
    pub async fn conflicts(&self) -> Vec<String> {
        self.conflicts.read().await.clone()
    }
}
