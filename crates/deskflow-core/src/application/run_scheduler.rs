//! The run scheduler
//!
//! Owns the run lifecycle: starting runs from trigger events, driving the
//! step executor node-by-node with one log record per visit, suspending on
//! delays and resuming from wake timers, and honoring cancellation at step
//! boundaries. A run pins its workflow version at start; definition
//! updates never affect runs already in flight.

use crate::application::step_executor::{StepExecutor, StepOutcome};
use crate::application::SchedulerConfig;
use crate::context::ExecutionContext;
use crate::domain::log::{LogRecord, LogStatus};
use crate::domain::repository::{RunRepository, WakeTimerRepository, WorkflowRepository};
use crate::domain::run::{CursorStatus, Run, RunId, RunStatus, WakeKind};
use crate::domain::workflow::{NodeId, WorkflowDefinition, WorkflowId, WorkflowStatus};
use crate::error::EngineError;
use crate::types::TriggerEvent;
use crate::ActionDispatcher;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives workflow runs from trigger to terminal state
pub struct RunScheduler {
    workflows: Arc<dyn WorkflowRepository>,
    runs: Arc<dyn RunRepository>,
    timers: Arc<dyn WakeTimerRepository>,
    executor: StepExecutor,
}

impl RunScheduler {
    /// Create a scheduler with default configuration
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        timers: Arc<dyn WakeTimerRepository>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        Self::with_config(workflows, runs, timers, dispatcher, SchedulerConfig::default())
    }

    /// Create a scheduler with explicit configuration
    pub fn with_config(
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        timers: Arc<dyn WakeTimerRepository>,
        dispatcher: Arc<dyn ActionDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            workflows,
            runs,
            timers,
            executor: StepExecutor::new(dispatcher, config),
        }
    }

    /// Start a new run for a trigger event
    ///
    /// Creates the run, seeds its context from the trigger payload and the
    /// workflow's variable defaults, and drives it until it completes,
    /// fails, or suspends on a delay. The run as returned reflects its
    /// state when driving stopped.
    pub async fn start(
        &self,
        workflow_id: &WorkflowId,
        trigger: TriggerEvent,
    ) -> Result<Run, EngineError> {
        let definition = self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.0.clone()))?;

        if definition.status != WorkflowStatus::Active {
            return Err(EngineError::InvalidTransition(format!(
                "workflow '{}' is not active ({:?})",
                workflow_id.0, definition.status
            )));
        }

        let trigger_node = definition
            .trigger_node()
            .ok_or_else(|| {
                EngineError::Execution(format!("workflow '{}' has no trigger node", workflow_id.0))
            })?;

        let context = ExecutionContext::seeded(&definition.variables, &trigger.payload);
        let mut run = Run::new(&definition, trigger_node.id.clone(), context);
        self.runs.create(&run).await?;

        run.start()?;
        info!(run = %run.id.0, workflow = %workflow_id.0, version = definition.version, "run started");
        self.append(
            &mut run,
            None,
            LogStatus::Info,
            format!(
                "run started for workflow '{}' v{}",
                definition.name, definition.version
            ),
            None,
        )
        .await?;

        self.drive(&definition, &mut run).await?;
        Ok(run)
    }

    /// Resume a suspended run after its wake timer fired
    ///
    /// Loads the definition version the run pinned at start, releases due
    /// cursors, and continues driving exactly where the run left off.
    pub async fn resume(&self, run_id: &RunId) -> Result<Run, EngineError> {
        let mut run = self
            .runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.0.clone()))?;

        if run.status != RunStatus::Suspended {
            return Err(EngineError::InvalidTransition(format!(
                "cannot resume run '{}' in status {:?}",
                run_id.0, run.status
            )));
        }

        let definition = self
            .workflows
            .find_version(&run.workflow_id, run.workflow_version)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(run.workflow_id.0.clone()))?;

        run.resume()?;
        info!(run = %run.id.0, "run resumed");
        self.append(&mut run, None, LogStatus::Info, "run resumed".to_string(), None)
            .await?;

        self.release_due_cursors(&definition, &mut run).await?;
        self.drive(&definition, &mut run).await?;
        Ok(run)
    }

    /// Request cancellation of a run
    ///
    /// Suspended runs cancel immediately (their wake timer is dropped).
    /// Pending/running runs are flagged in the store; the driving loop
    /// honors the flag at its next step boundary, so in-flight action
    /// dispatches finish but their results are discarded.
    pub async fn cancel(&self, run_id: &RunId) -> Result<(), EngineError> {
        let mut run = self
            .runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.0.clone()))?;

        match run.status {
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => {
                Err(EngineError::InvalidTransition(format!(
                    "run '{}' is already terminal ({:?})",
                    run_id.0, run.status
                )))
            }
            RunStatus::Suspended => {
                if let Some(token) = run.wake_token.clone() {
                    self.timers.cancel(&token).await?;
                }
                run.cancel()?;
                self.append(
                    &mut run,
                    None,
                    LogStatus::Info,
                    "run cancelled".to_string(),
                    None,
                )
                .await?;
                self.runs.save(&run).await?;
                info!(run = %run_id.0, "suspended run cancelled");
                Ok(())
            }
            RunStatus::Pending | RunStatus::Running => {
                self.runs
                    .update_status(run_id, RunStatus::Cancelled, None)
                    .await?;
                info!(run = %run_id.0, "cancellation requested");
                Ok(())
            }
        }
    }

    /// Drive every ready cursor until the run suspends or terminates
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
    ) -> Result<(), EngineError> {
        let mut rotation = 0usize;

        loop {
            // Cancellation is cooperative: honored here, between steps
            if let Some(stored) = self.runs.find_by_id(&run.id).await? {
                if stored.status == RunStatus::Cancelled && !run.is_terminal() {
                    run.cancel()?;
                    self.append(
                        run,
                        None,
                        LogStatus::Info,
                        "run cancelled".to_string(),
                        None,
                    )
                    .await?;
                    self.runs.save(run).await?;
                    return Ok(());
                }
            }

            let Some(cursor_index) = run.next_ready_cursor(rotation) else {
                if run.has_waiting_cursors() {
                    return self.suspend_run(run).await;
                }
                return self.finish_run(run).await;
            };
            rotation = cursor_index + 1;

            let node_id = run.cursors[cursor_index].node.clone();
            let label = definition
                .node(&node_id)
                .map(|node| node.label.clone())
                .unwrap_or_else(|| node_id.0.clone());
            run.record_visit(&node_id);

            match self.executor.execute(definition, run, cursor_index).await {
                Ok(StepOutcome::Advance {
                    connections,
                    best_effort_error,
                }) => {
                    self.append(
                        run,
                        Some(&node_id),
                        LogStatus::Success,
                        format!("executed '{label}'"),
                        None,
                    )
                    .await?;
                    if let Some(message) = best_effort_error {
                        self.append(
                            run,
                            Some(&node_id),
                            LogStatus::Error,
                            format!("best-effort action failed: {message}"),
                            None,
                        )
                        .await?;
                    }

                    let mut targets = connections.into_iter();
                    match targets.next() {
                        Some(first) => {
                            let cursor = &mut run.cursors[cursor_index];
                            cursor.via = Some(first.id.clone());
                            cursor.node = first.target.clone();
                        }
                        None => {
                            run.cursors[cursor_index].status = CursorStatus::Done;
                            debug!(run = %run.id.0, node = %node_id.0, "branch ended");
                        }
                    }
                    // Remaining connections fan out into sibling cursors
                    for connection in targets {
                        let context = run.cursors[cursor_index].context.clone();
                        run.spawn_cursor(
                            connection.target.clone(),
                            Some(connection.id.clone()),
                            context,
                        );
                    }
                }
                Ok(StepOutcome::Suspend { wake }) => {
                    self.append(
                        run,
                        Some(&node_id),
                        LogStatus::Info,
                        format!("'{label}' waiting until {}", wake.at.to_rfc3339()),
                        None,
                    )
                    .await?;
                    let cursor = &mut run.cursors[cursor_index];
                    cursor.status = CursorStatus::Waiting;
                    cursor.wake = Some(wake);
                }
                Ok(StepOutcome::Waiting) => {
                    self.append(
                        run,
                        Some(&node_id),
                        LogStatus::Info,
                        format!("'{label}' waiting for concurrent branches"),
                        None,
                    )
                    .await?;
                    run.cursors[cursor_index].status = CursorStatus::Done;
                }
                Ok(StepOutcome::SkippedArrival) => {
                    self.append(
                        run,
                        Some(&node_id),
                        LogStatus::Skipped,
                        format!("'{label}' already fired; arrival skipped"),
                        None,
                    )
                    .await?;
                    run.cursors[cursor_index].status = CursorStatus::Done;
                }
                Err(error) => {
                    warn!(run = %run.id.0, node = %node_id.0, %error, "step failed");
                    self.append(
                        run,
                        Some(&node_id),
                        LogStatus::Error,
                        format!("step failed: {error}"),
                        None,
                    )
                    .await?;
                    // Only this branch ends; sibling branches continue
                    run.cursors[cursor_index].status = CursorStatus::Done;
                    run.note_branch_failure(error.to_string());
                }
            }

            self.runs.save(run).await?;
        }
    }

    async fn suspend_run(&self, run: &mut Run) -> Result<(), EngineError> {
        let wake_at = run.earliest_wake().unwrap_or_else(Utc::now);
        let token = self.timers.schedule(&run.id, wake_at).await?;
        run.suspend(token)?;
        self.append(
            run,
            None,
            LogStatus::Info,
            format!("run suspended until {}", wake_at.to_rfc3339()),
            None,
        )
        .await?;
        self.runs.save(run).await?;
        debug!(run = %run.id.0, wake = %wake_at.to_rfc3339(), "run suspended");
        Ok(())
    }

    async fn finish_run(&self, run: &mut Run) -> Result<(), EngineError> {
        match run.error.clone() {
            Some(error) => {
                run.fail(error.clone())?;
                self.append(
                    run,
                    None,
                    LogStatus::Error,
                    format!("run failed: {error}"),
                    None,
                )
                .await?;
                info!(run = %run.id.0, %error, "run failed");
            }
            None => {
                run.complete()?;
                self.append(
                    run,
                    None,
                    LogStatus::Info,
                    "run completed".to_string(),
                    None,
                )
                .await?;
                info!(run = %run.id.0, "run completed");
            }
        }
        self.runs.save(run).await
    }

    /// Release waiting cursors whose wake time has come
    ///
    /// Timer waits step past their delay node; condition polls re-enter
    /// it so the executor re-checks the condition. If nothing is due yet
    /// the drive loop simply re-suspends with a fresh wake.
    async fn release_due_cursors(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        for cursor_index in 0..run.cursors.len() {
            if run.cursors[cursor_index].status != CursorStatus::Waiting {
                continue;
            }
            let Some(wake) = run.cursors[cursor_index].wake.clone() else {
                continue;
            };
            if wake.at > now {
                continue;
            }

            match wake.kind {
                WakeKind::Timer => {
                    let connections = self.executor.release_delay(
                        definition,
                        &run.cursors[cursor_index].context,
                        &wake.node,
                    );
                    let cursor = &mut run.cursors[cursor_index];
                    cursor.wake = None;
                    match connections.first() {
                        Some(connection) => {
                            cursor.via = Some(connection.id.clone());
                            cursor.node = connection.target.clone();
                            cursor.status = CursorStatus::Ready;
                        }
                        None => {
                            cursor.status = CursorStatus::Done;
                        }
                    }
                    self.append(
                        run,
                        Some(&wake.node),
                        LogStatus::Info,
                        "delay elapsed".to_string(),
                        None,
                    )
                    .await?;
                }
                WakeKind::ConditionPoll { .. } => {
                    let cursor = &mut run.cursors[cursor_index];
                    cursor.wake = None;
                    cursor.status = CursorStatus::Ready;
                }
            }
        }
        Ok(())
    }

    async fn append(
        &self,
        run: &mut Run,
        node: Option<&NodeId>,
        status: LogStatus,
        message: String,
        detail: Option<Value>,
    ) -> Result<(), EngineError> {
        let record = LogRecord {
            run_id: run.id.clone(),
            sequence: run.next_sequence(),
            timestamp: Utc::now(),
            node_id: node.cloned(),
            status,
            message,
            execution_path: run.path.clone(),
            detail,
        };
        self.runs.append_log(&record).await
    }
}
