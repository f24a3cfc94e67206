//! In-memory workflow and run repositories
//!
//! Concurrent maps keep lock contention low so many runs can be driven in
//! parallel. The workflow store keeps every version of a definition;
//! `save` assigns the next version, and runs resolve the version they
//! pinned at start.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use deskflow_core::domain::log::LogRecord;
use deskflow_core::domain::run::{Run, RunId, RunStatus};
use deskflow_core::domain::workflow::{WorkflowDefinition, WorkflowId, WorkflowStatus};
use deskflow_core::{EngineError, Module, RunRepository, WorkflowRepository};

/// In-memory, versioned workflow definition store
///
/// Tenant scoping and authorization are the caller's concern; this store
/// holds whatever it is given.
pub struct InMemoryWorkflowRepository {
    versions: DashMap<String, Vec<WorkflowDefinition>>,
}

impl InMemoryWorkflowRepository {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            versions: DashMap::with_capacity(16),
        }
    }
}

impl Default for InMemoryWorkflowRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(self
            .versions
            .get(&id.0)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn find_version(
        &self,
        id: &WorkflowId,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(self.versions.get(&id.0).and_then(|versions| {
            versions
                .iter()
                .find(|definition| definition.version == version)
                .cloned()
        }))
    }

    async fn list(
        &self,
        module: Option<Module>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowDefinition>, EngineError> {
        let mut result = Vec::new();
        for entry in self.versions.iter() {
            let Some(latest) = entry.value().last() else {
                continue;
            };
            if module.is_some_and(|module| latest.module != module) {
                continue;
            }
            if status.is_some_and(|status| latest.status != status) {
                continue;
            }
            result.push(latest.clone());
        }
        Ok(result)
    }

    async fn save(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowDefinition, EngineError> {
        let mut stored = definition.clone();
        let mut versions = self.versions.entry(definition.id.0.clone()).or_default();
        stored.version = versions
            .last()
            .map(|latest| latest.version + 1)
            .unwrap_or(1);
        versions.push(stored.clone());
        tracing::debug!(workflow = %stored.id.0, version = stored.version, "workflow saved");
        Ok(stored)
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), EngineError> {
        self.versions.remove(&id.0);
        Ok(())
    }
}

/// In-memory run store with per-run append-only log vectors
pub struct InMemoryRunRepository {
    runs: DashMap<String, Run>,
    logs: DashMap<String, Vec<LogRecord>>,
}

impl InMemoryRunRepository {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            runs: DashMap::with_capacity(64),
            logs: DashMap::with_capacity(64),
        }
    }
}

impl Default for InMemoryRunRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.insert(run.id.0.clone(), run.clone());
        self.logs.entry(run.id.0.clone()).or_default();
        Ok(())
    }

    async fn save(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.insert(run.id.0.clone(), run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, EngineError> {
        Ok(self.runs.get(&id.0).map(|run| run.clone()))
    }

    async fn update_status(
        &self,
        id: &RunId,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let mut run = self
            .runs
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::RunNotFound(id.0.clone()))?;
        run.status = status;
        if error.is_some() {
            run.error = error;
        }
        if run.is_terminal() && run.completed_at.is_none() {
            run.completed_at = Some(Utc::now());
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn append_log(&self, record: &LogRecord) -> Result<(), EngineError> {
        self.logs
            .entry(record.run_id.0.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_runs(
        &self,
        workflow_id: &WorkflowId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Run>, EngineError> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|entry| entry.workflow_id == *workflow_id)
            .map(|entry| entry.clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect())
    }

    async fn get_run_with_logs(
        &self,
        id: &RunId,
    ) -> Result<Option<(Run, Vec<LogRecord>)>, EngineError> {
        let Some(run) = self.runs.get(&id.0).map(|run| run.clone()) else {
            return Ok(None);
        };
        let logs = self
            .logs
            .get(&id.0)
            .map(|logs| logs.clone())
            .unwrap_or_default();
        Ok(Some((run, logs)))
    }
}
