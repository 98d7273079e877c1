//! The typed error enum for the stepflow engine
//!
//! Step handlers never let errors escape: failures are caught at the handler
//! boundary and become failed `StepExecutionResult`s. The variants here cover
//! the places where a typed error crosses a module seam — definition loading,
//! missing graph references, and agent lookup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A step id referenced by the graph does not exist in the step map.
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// Agent lookup failed for the given id within the caller's org scope.
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// A workflow definition is structurally invalid.
    #[error("invalid workflow definition: {0}")]
    Definition(String),

    /// A workflow definition file could not be read.
    #[error("failed to read workflow definition: {0}")]
    Io(#[from] std::io::Error),

    /// A workflow definition could not be deserialized.
    #[error("failed to parse workflow definition: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_not_found_message_mentions_id() {
        let err = EngineError::StepNotFound("notify".to_string());
        assert_eq!(err.to_string(), "Step not found: notify");
    }

    #[test]
    fn test_agent_not_found_message() {
        let err = EngineError::AgentNotFound {
            agent_id: "summarizer".to_string(),
        };
        assert!(err.to_string().contains("summarizer"));
    }
}
