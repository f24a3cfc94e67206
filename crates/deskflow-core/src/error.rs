use crate::domain::workflow::ValidationIssue;
use thiserror::Error;

/// Core error type for the Deskflow workflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow definition not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Static validation failed; carries every fatal issue so authors see
    /// all problems at once
    #[error("workflow validation failed with {} fatal issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    /// A branch-typed node has no connection for the branch the executor
    /// must follow
    #[error("missing '{branch}' branch on node: {node}")]
    MissingBranch {
        /// Node whose branch connection is absent
        node: String,
        /// The branch label that could not be followed
        branch: String,
    },

    /// A `$variable` reference did not resolve against the run context
    #[error("unresolved variable reference: {0}")]
    UnresolvedVariable(String),

    /// The external action dispatcher reported a failure
    #[error("action dispatch failed: {0}")]
    Dispatch(String),

    /// A condition-based delay exceeded its maximum wait duration
    #[error("condition wait exceeded its maximum duration at node: {0}")]
    DelayTimeout(String),

    /// Invalid workflow or run state transition
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// State store error
    #[error("state store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Run execution error
    #[error("execution error: {0}")]
    Execution(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{issue_codes, ValidationSeverity};

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                EngineError::WorkflowNotFound("wf-1".to_string()),
                "workflow not found: wf-1",
            ),
            (
                EngineError::RunNotFound("run-1".to_string()),
                "run not found: run-1",
            ),
            (
                EngineError::MissingBranch {
                    node: "cond-1".to_string(),
                    branch: "conditional_true".to_string(),
                },
                "missing 'conditional_true' branch on node: cond-1",
            ),
            (
                EngineError::UnresolvedVariable("$ticket.priority".to_string()),
                "unresolved variable reference: $ticket.priority",
            ),
            (
                EngineError::Dispatch("connection refused".to_string()),
                "action dispatch failed: connection refused",
            ),
            (
                EngineError::DelayTimeout("delay-1".to_string()),
                "condition wait exceeded its maximum duration at node: delay-1",
            ),
            (
                EngineError::InvalidTransition("already terminal".to_string()),
                "invalid state transition: already terminal",
            ),
            (
                EngineError::StateStore("lock poisoned".to_string()),
                "state store error: lock poisoned",
            ),
            (
                EngineError::Execution("node vanished".to_string()),
                "execution error: node vanished",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_validation_error_counts_issues() {
        let error = EngineError::Validation(vec![ValidationIssue {
            code: issue_codes::MISSING_TRIGGER,
            severity: ValidationSeverity::Fatal,
            message: "workflow has no trigger node".to_string(),
            node: None,
        }]);

        assert_eq!(
            error.to_string(),
            "workflow validation failed with 1 fatal issue(s)"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: EngineError = json_error.into();

        match error {
            EngineError::Serialization(msg) => assert!(msg.contains("expected")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
