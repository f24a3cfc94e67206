//! Execution log and replay projection
//!
//! Every node visit (and run-level event) appends one record. Records are
//! never mutated; history and replay views are pure projections over the
//! per-run sequence.

use crate::domain::run::RunId;
use crate::domain::workflow::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome class of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// The step executed normally
    Success,
    /// The step (or the run) failed
    Error,
    /// The step was bypassed, e.g. a late Any-junction arrival
    Skipped,
    /// Run-level or informational event
    Info,
}

/// One append-only record of a run's execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// The run this record belongs to
    pub run_id: RunId,
    /// Strictly increasing per-run sequence; orders ties on `timestamp`
    pub sequence: u64,
    /// When the record was written
    pub timestamp: DateTime<Utc>,
    /// The visited node; `None` for run-level events
    #[serde(default)]
    pub node_id: Option<NodeId>,
    /// Outcome class
    pub status: LogStatus,
    /// Human-readable message
    pub message: String,
    /// Cumulative ordered node visits up to and including this record
    pub execution_path: Vec<NodeId>,
    /// Optional structured detail
    #[serde(default)]
    pub detail: Option<Value>,
}

/// Read-side projection of a run's log for history and replay views
///
/// Consumers highlight the traversed subgraph and the active node without
/// recomputing traversal from the graph; projecting never mutates the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    /// The traversed path, in visit order
    pub path: Vec<NodeId>,
    /// Last observed status per node id
    pub node_status: HashMap<String, LogStatus>,
    /// The node the run is currently at, per the latest node-scoped record
    pub active_node: Option<NodeId>,
    /// Number of records projected
    pub record_count: usize,
}

impl ReplaySnapshot {
    /// Project a snapshot from a run's log records
    ///
    /// Records are ordered by sequence; the input order breaks ties, so
    /// passing records in insertion order reproduces the write order.
    pub fn project(records: &[LogRecord]) -> Self {
        let mut ordered: Vec<&LogRecord> = records.iter().collect();
        ordered.sort_by_key(|record| record.sequence);

        let mut node_status = HashMap::new();
        let mut active_node = None;
        for record in &ordered {
            if let Some(node) = &record.node_id {
                node_status.insert(node.0.clone(), record.status);
                active_node = Some(node.clone());
            }
        }

        Self {
            path: ordered
                .last()
                .map(|record| record.execution_path.clone())
                .unwrap_or_default(),
            node_status,
            active_node,
            record_count: ordered.len(),
        }
    }
}
