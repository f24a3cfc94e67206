//! The run aggregate
//!
//! One run is one execution instance of a workflow definition, pinned to
//! the version it started against. Runs are mutated only by the scheduler;
//! branch cursors, junction arrival sets, and the cumulative execution
//! path all live here so a suspended run can be persisted and resumed
//! exactly where it left off.

use crate::context::ExecutionContext;
use crate::domain::workflow::{ConnectionId, NodeId, WorkflowDefinition, WorkflowId};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Value object: run ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

/// Handle for a scheduled wake timer held by a suspended run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WakeToken(pub String);

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet driven
    Pending,
    /// Being driven by the scheduler
    Running,
    /// Waiting for a wake timer
    Suspended,
    /// Reached a terminal node on every branch
    Completed,
    /// A branch failed and the run is over
    Failed,
    /// Cancelled by request
    Cancelled,
}

/// State of one branch cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    /// May advance on the next drive step
    Ready,
    /// Parked at a delay node until its wake fires
    Waiting,
    /// This branch is finished
    Done,
}

/// Why a waiting cursor wakes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WakeKind {
    /// Plain timer: proceed past the delay on wake
    Timer,
    /// Condition poll: re-check the delay condition on wake
    ConditionPoll {
        /// Hard deadline after which the run fails with `DelayTimeout`
        deadline: DateTime<Utc>,
    },
}

/// A computed wake time for a suspended branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeSpec {
    /// When to wake
    pub at: DateTime<Utc>,
    /// The delay node the branch is parked at
    pub node: NodeId,
    /// Timer or condition poll
    pub kind: WakeKind,
}

/// One active branch of a run
///
/// A run starts with a single cursor at the trigger node; split junctions
/// spawn sibling cursors that are accounted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCursor {
    /// Cursor id, unique within the run
    pub id: u32,
    /// The node this cursor will execute next
    pub node: NodeId,
    /// The connection the cursor arrived through
    #[serde(default)]
    pub via: Option<ConnectionId>,
    /// Ready, waiting, or done
    pub status: CursorStatus,
    /// This branch's view of the run variables
    pub context: ExecutionContext,
    /// Wake bookkeeping while `Waiting`
    #[serde(default)]
    pub wake: Option<WakeSpec>,
}

/// Aggregate: one execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier
    pub id: RunId,

    /// The workflow this run executes
    pub workflow_id: WorkflowId,

    /// Definition version pinned at start; later updates never affect
    /// this run
    pub workflow_version: u32,

    /// Current status
    pub status: RunStatus,

    /// The trigger node that started the run
    pub trigger_id: NodeId,

    /// Creation timestamp
    pub started_at: DateTime<Utc>,

    /// Set when the run reaches a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// First branch failure, if any
    pub error: Option<String>,

    /// Branch cursors, including finished ones
    pub cursors: Vec<BranchCursor>,

    /// Arrived incoming connections per All-junction node
    pub junction_arrivals: HashMap<String, HashSet<String>>,

    /// Any-junction nodes that have already fired
    pub junctions_fired: HashSet<String>,

    /// Cumulative ordered node visits across all branches
    pub path: Vec<NodeId>,

    /// Next log record sequence number
    pub next_sequence: u64,

    /// Wake token held while suspended
    pub wake_token: Option<WakeToken>,

    next_cursor_id: u32,
}

impl Run {
    /// Create a new pending run with a single cursor at the trigger node
    pub fn new(
        definition: &WorkflowDefinition,
        trigger_id: NodeId,
        context: ExecutionContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId(Uuid::new_v4().to_string()),
            workflow_id: definition.id.clone(),
            workflow_version: definition.version,
            status: RunStatus::Pending,
            trigger_id: trigger_id.clone(),
            started_at: now,
            completed_at: None,
            updated_at: now,
            error: None,
            cursors: vec![BranchCursor {
                id: 0,
                node: trigger_id,
                via: None,
                status: CursorStatus::Ready,
                context,
                wake: None,
            }],
            junction_arrivals: HashMap::new(),
            junctions_fired: HashSet::new(),
            path: Vec::new(),
            next_sequence: 0,
            wake_token: None,
            next_cursor_id: 1,
        }
    }

    /// Begin driving the run
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Pending {
            return Err(EngineError::InvalidTransition(format!(
                "cannot start run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Running;
        self.touch();
        Ok(())
    }

    /// Park the run until its wake timer fires
    pub fn suspend(&mut self, token: WakeToken) -> Result<(), EngineError> {
        if self.status != RunStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "cannot suspend run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Suspended;
        self.wake_token = Some(token);
        self.touch();
        Ok(())
    }

    /// Continue a suspended run
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Suspended {
            return Err(EngineError::InvalidTransition(format!(
                "cannot resume run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Running;
        self.wake_token = None;
        self.touch();
        Ok(())
    }

    /// Mark the run completed
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "cannot complete run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Mark the run failed
    pub fn fail(&mut self, error: String) -> Result<(), EngineError> {
        if self.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot fail run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Mark the run cancelled
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if self.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot cancel run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Whether the run has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Record a node visit on the cumulative execution path
    pub fn record_visit(&mut self, node: &NodeId) {
        self.path.push(node.clone());
        self.touch();
    }

    /// Claim the next log sequence number
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Spawn a sibling cursor, returning its id
    pub fn spawn_cursor(
        &mut self,
        node: NodeId,
        via: Option<ConnectionId>,
        context: ExecutionContext,
    ) -> u32 {
        let id = self.next_cursor_id;
        self.next_cursor_id += 1;
        self.cursors.push(BranchCursor {
            id,
            node,
            via,
            status: CursorStatus::Ready,
            context,
            wake: None,
        });
        id
    }

    /// Record an arrival at an All junction, returning the distinct count
    pub fn record_arrival(&mut self, node: &NodeId, via: &str) -> usize {
        let arrivals = self
            .junction_arrivals
            .entry(node.0.clone())
            .or_default();
        arrivals.insert(via.to_string());
        arrivals.len()
    }

    /// Mark an Any junction fired; true when this arrival fired it
    pub fn mark_fired(&mut self, node: &NodeId) -> bool {
        self.junctions_fired.insert(node.0.clone())
    }

    /// Note that one branch failed without ending the others
    pub fn note_branch_failure(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
        self.touch();
    }

    /// Index of the next ready cursor at or after `start`, wrapping around
    pub fn next_ready_cursor(&self, start: usize) -> Option<usize> {
        let n = self.cursors.len();
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| self.cursors[i].status == CursorStatus::Ready)
    }

    /// Whether any cursor is parked on a wake timer
    pub fn has_waiting_cursors(&self) -> bool {
        self.cursors
            .iter()
            .any(|cursor| cursor.status == CursorStatus::Waiting)
    }

    /// Earliest wake time across waiting cursors
    pub fn earliest_wake(&self) -> Option<DateTime<Utc>> {
        self.cursors
            .iter()
            .filter_map(|cursor| cursor.wake.as_ref())
            .map(|wake| wake.at)
            .min()
    }

    /// Snapshot of the run's variables, taken from the primary cursor
    pub fn context_snapshot(&self) -> serde_json::Value {
        self.cursors
            .first()
            .map(|cursor| cursor.context.snapshot())
            .unwrap_or(serde_json::Value::Null)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
