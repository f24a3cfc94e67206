//! Collaborator traits for the Deskflow engine
//!
//! The engine owns no persistence: workflow definitions, runs, logs, and
//! wake timers all live behind these seams. External crates implement
//! them to provide concrete storage; tenant scoping and authorization are
//! delegated entirely to the implementor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::log::LogRecord;
use super::run::{Run, RunId, RunStatus, WakeToken};
use super::workflow::{WorkflowDefinition, WorkflowId, WorkflowStatus};
use crate::error::EngineError;
use crate::types::Module;

/// Repository for workflow definitions
///
/// `save` assigns the next version on update; runs in progress keep the
/// version they pinned at start.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Find the latest version of a workflow by ID
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError>;

    /// Find a specific pinned version of a workflow
    async fn find_version(
        &self,
        id: &WorkflowId,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, EngineError>;

    /// List latest versions, optionally filtered by module and status
    async fn list(
        &self,
        module: Option<Module>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowDefinition>, EngineError>;

    /// Create or update a definition, returning the stored copy with its
    /// assigned version
    async fn save(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowDefinition, EngineError>;

    /// Delete a workflow and all of its versions
    async fn delete(&self, id: &WorkflowId) -> Result<(), EngineError>;
}

/// Repository for runs and their append-only logs
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Persist a newly created run
    async fn create(&self, run: &Run) -> Result<(), EngineError>;

    /// Persist the current state of a run
    async fn save(&self, run: &Run) -> Result<(), EngineError>;

    /// Find a run by ID
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, EngineError>;

    /// Update only a run's status (and error), leaving the rest untouched
    async fn update_status(
        &self,
        id: &RunId,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), EngineError>;

    /// Append one log record; records are never mutated after write
    async fn append_log(&self, record: &LogRecord) -> Result<(), EngineError>;

    /// List a workflow's runs, newest first, one page at a time
    async fn list_runs(
        &self,
        workflow_id: &WorkflowId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Run>, EngineError>;

    /// Fetch a run together with its full log
    async fn get_run_with_logs(
        &self,
        id: &RunId,
    ) -> Result<Option<(Run, Vec<LogRecord>)>, EngineError>;
}

/// Manages wake timers for suspended runs
///
/// The firing side is expected to call `RunScheduler::resume` with the
/// run ID when a scheduled wake comes due.
#[async_trait]
pub trait WakeTimerRepository: Send + Sync {
    /// Schedule a wake for a suspended run, returning its token
    async fn schedule(&self, run_id: &RunId, at: DateTime<Utc>) -> Result<WakeToken, EngineError>;

    /// Cancel a previously scheduled wake
    async fn cancel(&self, token: &WakeToken) -> Result<(), EngineError>;
}
