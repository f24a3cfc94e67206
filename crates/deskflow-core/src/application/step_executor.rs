//! The per-node step executor
//!
//! Given the pinned definition, the run's bookkeeping, and one branch
//! cursor, the executor advances a single node visit and reports what the
//! scheduler should do next. Node configuration is matched exhaustively;
//! there is no unknown-kind fallback.

use crate::context::ExecutionContext;
use crate::domain::condition::evaluate_groups;
use crate::domain::run::{Run, WakeKind, WakeSpec};
use crate::domain::workflow::{
    ActionConfig, BranchLabel, Connection, DelayKind, JunctionKind, LoopConfig, LoopKind, NodeId,
    NodeKind, WorkflowDefinition, MAX_LOOP_ITERATIONS,
};
use crate::error::EngineError;
use crate::{ActionDispatcher, SchedulerConfig};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What the scheduler should do after one node visit
#[derive(Debug)]
pub enum StepOutcome {
    /// Follow these connections; an empty list ends the branch.
    /// `best_effort_error` carries a downgraded action failure to log.
    Advance {
        /// Eligible outgoing connections, one normally, N for a split
        connections: Vec<Connection>,
        /// A best-effort action failure to record without failing the run
        best_effort_error: Option<String>,
    },
    /// A delay was reached; park the branch until the wake fires
    Suspend {
        /// Computed wake time and kind
        wake: WakeSpec,
    },
    /// An All junction is still waiting for sibling arrivals
    Waiting,
    /// A late arrival at an Any junction that already fired
    SkippedArrival,
}

/// Per-loop iteration state, kept in the context under a reserved key
#[derive(Debug, Default, Serialize, Deserialize)]
struct LoopState {
    iteration: u32,
    #[serde(default)]
    items: Option<Vec<Value>>,
}

fn loop_key(node: &NodeId) -> String {
    format!("$__loop:{}", node.0)
}

fn delay_key(node: &NodeId) -> String {
    format!("$__delay:{}", node.0)
}

/// Whether a connection's inline guard permits following it
fn eligible(connection: &Connection, context: &ExecutionContext) -> bool {
    connection
        .condition
        .as_deref()
        .map(|groups| evaluate_groups(groups, context))
        .unwrap_or(true)
}

/// Advances runs one node visit at a time
pub struct StepExecutor {
    dispatcher: Arc<dyn ActionDispatcher>,
    config: SchedulerConfig,
}

impl StepExecutor {
    /// Create an executor over an action dispatcher
    pub fn new(dispatcher: Arc<dyn ActionDispatcher>, config: SchedulerConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Execute the node the cursor points at
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
        cursor_index: usize,
    ) -> Result<StepOutcome, EngineError> {
        let node_id = run.cursors[cursor_index].node.clone();
        let node = definition
            .node(&node_id)
            .ok_or_else(|| EngineError::Execution(format!("node not found: {}", node_id.0)))?;

        debug!(node = %node_id.0, label = %node.label, "executing node");

        match &node.kind {
            NodeKind::Trigger(_) => {
                // Payload binding happened when the context was seeded
                Ok(self.advance(definition, run, cursor_index, &node_id, BranchLabel::Standard))
            }
            NodeKind::Condition { groups } => {
                let context = &run.cursors[cursor_index].context;
                let branch = if evaluate_groups(groups, context) {
                    BranchLabel::ConditionalTrue
                } else {
                    BranchLabel::ConditionalFalse
                };
                let connection = definition.outgoing(&node_id, &branch).ok_or_else(|| {
                    EngineError::MissingBranch {
                        node: node_id.0.clone(),
                        branch: branch.to_string(),
                    }
                })?;
                let connections = if eligible(connection, context) {
                    vec![connection.clone()]
                } else {
                    Vec::new()
                };
                Ok(StepOutcome::Advance {
                    connections,
                    best_effort_error: None,
                })
            }
            NodeKind::Action(config) => {
                self.execute_action(definition, run, cursor_index, &node_id, config)
                    .await
            }
            NodeKind::Delay(kind) => self.enter_delay(definition, run, cursor_index, &node_id, kind),
            NodeKind::Loop(config) => self.enter_loop(definition, run, cursor_index, &node_id, config),
            NodeKind::Junction(kind) => self.enter_junction(definition, run, cursor_index, &node_id, kind),
        }
    }

    /// Connections to follow when a timer-kind delay wakes
    pub fn release_delay(
        &self,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
        node: &NodeId,
    ) -> Vec<Connection> {
        self.follow(definition, context, node, BranchLabel::Standard)
    }

    async fn execute_action(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
        cursor_index: usize,
        node_id: &NodeId,
        config: &ActionConfig,
    ) -> Result<StepOutcome, EngineError> {
        let params = run.cursors[cursor_index].context.resolve_params(&config.params)?;

        match self
            .dispatcher
            .invoke(&config.action_type, &params, &run.cursors[cursor_index].context)
            .await
        {
            Ok(outputs) => {
                let context = &mut run.cursors[cursor_index].context;
                for (name, value) in outputs {
                    let key = match &config.output_prefix {
                        Some(prefix) => format!("{prefix}.{name}"),
                        None => name,
                    };
                    context.set(&key, value);
                }
                Ok(self.advance(definition, run, cursor_index, node_id, BranchLabel::Standard))
            }
            Err(error) if config.best_effort => {
                debug!(node = %node_id.0, %error, "best-effort action failed");
                match self.advance(definition, run, cursor_index, node_id, BranchLabel::Standard) {
                    StepOutcome::Advance { connections, .. } => Ok(StepOutcome::Advance {
                        connections,
                        best_effort_error: Some(error.to_string()),
                    }),
                    other => Ok(other),
                }
            }
            Err(error) => Err(error),
        }
    }

    fn enter_delay(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
        cursor_index: usize,
        node_id: &NodeId,
        kind: &DelayKind,
    ) -> Result<StepOutcome, EngineError> {
        let now = Utc::now();
        let wake_at = match kind {
            DelayKind::Duration { seconds } => now + Duration::seconds(*seconds as i64),
            DelayKind::Until { at } => *at,
            DelayKind::FromVariable { variable } => {
                let value = run.cursors[cursor_index]
                    .context
                    .get(variable)
                    .ok_or_else(|| EngineError::UnresolvedVariable(variable.clone()))?;
                match value {
                    Value::Number(seconds) => {
                        let seconds = seconds.as_f64().unwrap_or(0.0).max(0.0) as i64;
                        now + Duration::seconds(seconds)
                    }
                    Value::String(text) => DateTime::parse_from_rfc3339(&text)
                        .map(|at| at.with_timezone(&Utc))
                        .map_err(|_| EngineError::UnresolvedVariable(variable.clone()))?,
                    _ => return Err(EngineError::UnresolvedVariable(variable.clone())),
                }
            }
            DelayKind::UntilCondition {
                groups,
                poll_interval_seconds,
                max_wait_seconds,
            } => {
                return self.poll_condition_delay(
                    definition,
                    run,
                    cursor_index,
                    node_id,
                    groups,
                    *poll_interval_seconds,
                    *max_wait_seconds,
                );
            }
        };

        Ok(StepOutcome::Suspend {
            wake: WakeSpec {
                at: wake_at,
                node: node_id.clone(),
                kind: WakeKind::Timer,
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn poll_condition_delay(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
        cursor_index: usize,
        node_id: &NodeId,
        groups: &[crate::domain::condition::ConditionGroup],
        poll_interval_seconds: Option<u64>,
        max_wait_seconds: Option<u64>,
    ) -> Result<StepOutcome, EngineError> {
        let now = Utc::now();
        let key = delay_key(node_id);

        if evaluate_groups(groups, &run.cursors[cursor_index].context) {
            run.cursors[cursor_index].context.remove_global(&key);
            return Ok(self.advance(definition, run, cursor_index, node_id, BranchLabel::Standard));
        }

        // The first visit fixes the deadline; polls re-read it
        let deadline = run.cursors[cursor_index]
            .context
            .get_raw(&key)
            .and_then(|value| value.as_str())
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|at| at.with_timezone(&Utc));
        let deadline = match deadline {
            Some(deadline) => deadline,
            None => {
                let max_wait =
                    max_wait_seconds.unwrap_or(self.config.default_max_condition_wait_seconds);
                let deadline = now + Duration::seconds(max_wait as i64);
                run.cursors[cursor_index]
                    .context
                    .set_global(&key, Value::String(deadline.to_rfc3339()));
                deadline
            }
        };

        if now >= deadline {
            return Err(EngineError::DelayTimeout(node_id.0.clone()));
        }

        let poll =
            poll_interval_seconds.unwrap_or(self.config.default_poll_interval_seconds) as i64;
        Ok(StepOutcome::Suspend {
            wake: WakeSpec {
                at: deadline.min(now + Duration::seconds(poll)),
                node: node_id.clone(),
                kind: WakeKind::ConditionPoll { deadline },
            },
        })
    }

    fn enter_loop(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
        cursor_index: usize,
        node_id: &NodeId,
        config: &LoopConfig,
    ) -> Result<StepOutcome, EngineError> {
        let key = loop_key(node_id);
        let mut state: LoopState = run.cursors[cursor_index]
            .context
            .get_raw(&key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()?
            .unwrap_or_default();

        // Snapshot the collection once, on first entry
        if let LoopKind::ForEach { variable } = &config.kind {
            if state.items.is_none() {
                let items = run.cursors[cursor_index]
                    .context
                    .get(variable)
                    .and_then(|value| value.as_array().cloned())
                    .unwrap_or_default();
                state.items = Some(items);
            }
        }

        let guard = config.max_iterations.clamp(1, MAX_LOOP_ITERATIONS);
        let continues = state.iteration < guard
            && match &config.kind {
                LoopKind::Count { count } => state.iteration < *count,
                LoopKind::ForEach { .. } => {
                    (state.iteration as usize)
                        < state.items.as_ref().map(Vec::len).unwrap_or(0)
                }
                LoopKind::While { groups } => {
                    evaluate_groups(groups, &run.cursors[cursor_index].context)
                }
            };

        if continues {
            let index = state.iteration;
            let mut bindings = HashMap::from([("index".to_string(), Value::from(index))]);
            if let Some(items) = &state.items {
                bindings.insert("item".to_string(), items[index as usize].clone());
            }
            state.iteration += 1;

            let cursor = &mut run.cursors[cursor_index];
            // Drop the previous iteration's scope before opening the next
            cursor.context.exit_scope(node_id);
            cursor
                .context
                .set_global(&key, serde_json::to_value(&state)?);
            cursor.context = cursor.context.fork(node_id, bindings);

            let connection = definition
                .outgoing(node_id, &BranchLabel::LoopComplete)
                .ok_or_else(|| EngineError::MissingBranch {
                    node: node_id.0.clone(),
                    branch: BranchLabel::LoopComplete.to_string(),
                })?;
            let connections = if eligible(connection, &run.cursors[cursor_index].context) {
                vec![connection.clone()]
            } else {
                Vec::new()
            };
            Ok(StepOutcome::Advance {
                connections,
                best_effort_error: None,
            })
        } else {
            let cursor = &mut run.cursors[cursor_index];
            cursor.context.exit_scope(node_id);
            cursor.context.remove_global(&key);

            let connection = definition
                .outgoing(node_id, &BranchLabel::LoopExit)
                .ok_or_else(|| EngineError::MissingBranch {
                    node: node_id.0.clone(),
                    branch: BranchLabel::LoopExit.to_string(),
                })?;
            let connections = if eligible(connection, &run.cursors[cursor_index].context) {
                vec![connection.clone()]
            } else {
                Vec::new()
            };
            Ok(StepOutcome::Advance {
                connections,
                best_effort_error: None,
            })
        }
    }

    fn enter_junction(
        &self,
        definition: &WorkflowDefinition,
        run: &mut Run,
        cursor_index: usize,
        node_id: &NodeId,
        kind: &JunctionKind,
    ) -> Result<StepOutcome, EngineError> {
        match kind {
            JunctionKind::All => {
                let expected = definition.incoming(node_id).len().max(1);
                let via = run.cursors[cursor_index]
                    .via
                    .as_ref()
                    .map(|connection| connection.0.clone())
                    .unwrap_or_else(|| format!("cursor:{}", run.cursors[cursor_index].id));
                let arrived = run.record_arrival(node_id, &via);
                if arrived < expected {
                    debug!(node = %node_id.0, arrived, expected, "junction waiting");
                    Ok(StepOutcome::Waiting)
                } else {
                    Ok(self.advance(definition, run, cursor_index, node_id, BranchLabel::Standard))
                }
            }
            JunctionKind::Any => {
                if run.mark_fired(node_id) {
                    Ok(self.advance(definition, run, cursor_index, node_id, BranchLabel::Standard))
                } else {
                    Ok(StepOutcome::SkippedArrival)
                }
            }
            JunctionKind::Split { .. } => {
                let context = &run.cursors[cursor_index].context;
                let mut connections: Vec<Connection> = definition
                    .outgoing_all(node_id)
                    .into_iter()
                    .filter(|connection| matches!(connection.branch, BranchLabel::Split(_)))
                    .filter(|connection| eligible(connection, context))
                    .cloned()
                    .collect();
                connections.sort_by_key(|connection| match connection.branch {
                    BranchLabel::Split(index) => index,
                    _ => 0,
                });
                Ok(StepOutcome::Advance {
                    connections,
                    best_effort_error: None,
                })
            }
            JunctionKind::Merge => {
                Ok(self.advance(definition, run, cursor_index, node_id, BranchLabel::Standard))
            }
        }
    }

    fn advance(
        &self,
        definition: &WorkflowDefinition,
        run: &Run,
        cursor_index: usize,
        node_id: &NodeId,
        branch: BranchLabel,
    ) -> StepOutcome {
        let connections = self.follow(
            definition,
            &run.cursors[cursor_index].context,
            node_id,
            branch,
        );
        StepOutcome::Advance {
            connections,
            best_effort_error: None,
        }
    }

    fn follow(
        &self,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
        node: &NodeId,
        branch: BranchLabel,
    ) -> Vec<Connection> {
        definition
            .outgoing(node, &branch)
            .filter(|connection| eligible(connection, context))
            .map(|connection| vec![connection.clone()])
            .unwrap_or_default()
    }
}
