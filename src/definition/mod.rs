//! Workflow definition loading and reference validation
//!
//! Definitions arrive as JSON or YAML. Validation is an advisory pre-flight
//! pass that reports every structural problem at once — duplicate ids,
//! dangling references, empty parallel groups. The run loop still handles
//! dangling references at runtime, so executing an unvalidated graph is
//! allowed, just not recommended.

use crate::engine::{step_map, StepConfig, StepMap, WorkflowStep};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// A workflow definition as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<WorkflowStep>,
    /// Entry point; defaults to the first step in `steps`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_step_id: Option<String>,
}

impl WorkflowDefinition {
    pub fn from_steps(steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: None,
            steps,
            start_step_id: None,
        }
    }

    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        serde_json::from_str(content).map_err(|e| EngineError::Parse(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(content).map_err(|e| EngineError::Parse(e.to_string()))
    }

    /// Load a definition file, dispatching on its extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn step_map(&self) -> StepMap {
        step_map(&self.steps)
    }

    /// Report every structural problem in the definition
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.steps.is_empty() {
            issues.push(ValidationIssue::workflow("workflow has no steps"));
            return issues;
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                issues.push(ValidationIssue::step(
                    &step.id,
                    format!("duplicate step id '{}'", step.id),
                ));
            }
        }

        if let Some(start) = &self.start_step_id {
            if !ids.contains(start.as_str()) {
                issues.push(ValidationIssue::workflow(format!(
                    "start step '{start}' does not exist"
                )));
            }
        }

        for step in &self.steps {
            check_reference(&mut issues, &ids, &step.id, "on_success", &step.on_success);
            check_reference(&mut issues, &ids, &step.id, "on_error", &step.on_error);

            match &step.config {
                StepConfig::Condition(config) => {
                    check_reference(&mut issues, &ids, &step.id, "true_step", &config.true_step);
                    check_reference(&mut issues, &ids, &step.id, "false_step", &config.false_step);
                }
                StepConfig::Parallel(config) => {
                    if config.steps.is_empty() {
                        issues.push(ValidationIssue::step(
                            &step.id,
                            "parallel step has no children",
                        ));
                    }
                    for child in &config.steps {
                        if !ids.contains(child.as_str()) {
                            issues.push(ValidationIssue::step(
                                &step.id,
                                format!("parallel child references missing step '{child}'"),
                            ));
                        }
                    }
                }
                StepConfig::Transform(config) => {
                    if config.output_variable.is_empty() {
                        issues.push(ValidationIssue::step(
                            &step.id,
                            "transform step has an empty output_variable",
                        ));
                    }
                }
                StepConfig::Tool(_) | StepConfig::Agent(_) => {}
            }
        }

        issues
    }

    /// Convenience wrapper: error iff validation found any issue
    pub fn ensure_valid(&self) -> Result<(), EngineError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            let summary: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
            Err(EngineError::Definition(summary.join("; ")))
        }
    }
}

fn check_reference(
    issues: &mut Vec<ValidationIssue>,
    ids: &HashSet<&str>,
    step_id: &str,
    label: &str,
    target: &Option<String>,
) {
    if let Some(target) = target {
        if !ids.contains(target.as_str()) {
            issues.push(ValidationIssue::step(
                step_id,
                format!("{label} references missing step '{target}'"),
            ));
        }
    }
}

/// One structural problem found by validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Offending step, when the problem is step-scoped
    pub step_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn workflow(message: impl Into<String>) -> Self {
        Self {
            step_id: None,
            message: message.into(),
        }
    }

    fn step(step_id: &str, message: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step_id) => write!(f, "step '{}': {}", step_id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION_JSON: &str = r#"{
        "name": "audience-check",
        "steps": [
            {
                "id": "fetch",
                "type": "tool",
                "config": {
                    "tool_name": "lookup_audience",
                    "parameters": {"marketId": "{{market}}"},
                    "output_mapping": {"size": "audienceSize"}
                },
                "on_success": "check"
            },
            {
                "id": "check",
                "type": "condition",
                "config": {"expression": "audienceSize > 1000"}
            }
        ]
    }"#;

    #[test]
    fn test_parse_json_definition() {
        let definition = WorkflowDefinition::from_json(DEFINITION_JSON).unwrap();
        assert_eq!(definition.name.as_deref(), Some("audience-check"));
        assert_eq!(definition.steps.len(), 2);
        assert!(definition.validate().is_empty());
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
name: fan-out
steps:
  - id: fan
    type: parallel
    config:
      steps: [a, b]
      wait_for_all: false
  - id: a
    type: tool
    config:
      tool_name: t_a
  - id: b
    type: tool
    config:
      tool_name: t_b
"#;
        let definition = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(definition.steps.len(), 3);
        assert!(definition.validate().is_empty());
    }

    #[test]
    fn test_dangling_references_reported() {
        let json = r#"{
            "steps": [
                {
                    "id": "check",
                    "type": "condition",
                    "config": {"expression": "x > 1", "true_step": "notify"},
                    "on_error": "recover"
                }
            ]
        }"#;
        let definition = WorkflowDefinition::from_json(json).unwrap();
        let issues = definition.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.message.contains("notify")));
        assert!(issues.iter().any(|i| i.message.contains("recover")));
        assert!(definition.ensure_valid().is_err());
    }

    #[test]
    fn test_duplicate_ids_and_empty_parallel_reported() {
        let json = r#"{
            "steps": [
                {"id": "x", "type": "tool", "config": {"tool_name": "t"}},
                {"id": "x", "type": "tool", "config": {"tool_name": "t"}},
                {"id": "fan", "type": "parallel", "config": {"steps": []}}
            ]
        }"#;
        let definition = WorkflowDefinition::from_json(json).unwrap();
        let issues = definition.validate();
        assert!(issues.iter().any(|i| i.message.contains("duplicate")));
        assert!(issues.iter().any(|i| i.message.contains("no children")));
    }

    #[test]
    fn test_empty_workflow_reported() {
        let definition = WorkflowDefinition::from_steps(Vec::new());
        let issues = definition.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("no steps"));
    }

    #[test]
    fn test_from_path_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("wf.json");
        std::fs::write(&json_path, DEFINITION_JSON).unwrap();
        let definition = WorkflowDefinition::from_path(&json_path).unwrap();
        assert_eq!(definition.steps.len(), 2);

        let missing = WorkflowDefinition::from_path(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(EngineError::Io(_))));
    }
}
