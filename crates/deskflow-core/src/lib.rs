//!
//! Deskflow Core - workflow automation engine for the Deskflow platform
//!
//! This crate defines the workflow graph model, its validation rules, and
//! the execution engine that drives runs from trigger to terminal state:
//! condition evaluation, the per-node step executor, the run scheduler,
//! and the append-only execution log consumed by history and replay views.
//! Persistence and concrete side effects live behind collaborator traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use std::collections::HashMap;

/// Run-scoped variable store
pub mod context;

/// Domain layer - graph model, runs, logs, repositories
pub mod domain;

/// Application services - step executor and run scheduler
pub mod application;

/// Core shared types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use application::run_scheduler::RunScheduler;
pub use application::step_executor::{StepExecutor, StepOutcome};
pub use application::SchedulerConfig;
pub use context::ExecutionContext;
pub use domain::condition::{
    evaluate_groups, ComparisonOperator, Condition, ConditionGroup, LogicalOperator,
};
pub use domain::log::{LogRecord, LogStatus, ReplaySnapshot};
pub use domain::repository::{RunRepository, WakeTimerRepository, WorkflowRepository};
pub use domain::run::{Run, RunId, RunStatus, WakeToken};
pub use domain::workflow::{
    BranchLabel, Connection, ConnectionId, Node, NodeId, NodeKind, TenantId, ValidationIssue,
    ValidationSeverity, WorkflowDefinition, WorkflowId, WorkflowStatus,
};
pub use error::EngineError;
pub use types::{Module, TriggerEvent, VariableType};

/// Named outputs returned by a dispatched action
pub type ActionOutputs = HashMap<String, serde_json::Value>;

/// The engine-opaque side-effect seam
///
/// The engine resolves `$variable` tokens in the action's parameters and
/// blocks the step on the dispatcher's response; returned outputs merge
/// back into the run context. What an action type actually does is an
/// external, versioned contract.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Perform an action and return its named outputs
    async fn invoke(
        &self,
        action_type: &str,
        params: &serde_json::Value,
        context: &ExecutionContext,
    ) -> Result<ActionOutputs, EngineError>;
}
