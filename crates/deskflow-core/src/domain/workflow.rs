//! Workflow definitions: the directed-graph model
//!
//! A workflow is a set of typed nodes joined by labelled connections,
//! plus an ordered list of variable declarations. Node configuration is a
//! closed tagged variant per kind, matched exhaustively by the executor;
//! there is no untyped configuration shape. Validation collects every
//! issue rather than failing on the first, so authors see all problems
//! at once.

use crate::domain::condition::ConditionGroup;
use crate::error::EngineError;
use crate::types::{Module, VariableType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Value object: workflow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// Value object: tenant ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

/// Value object: node ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Value object: connection ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Editable, never run
    Draft,
    /// Live: triggers start runs
    Active,
    /// Temporarily switched off
    Inactive,
    /// Retired; kept for history
    Archived,
}

/// A declared workflow variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    /// Variable name, unique within the workflow
    pub name: String,
    /// Declared type, applied as read coercion
    #[serde(rename = "type")]
    pub var_type: VariableType,
    /// Default value seeded into new run contexts
    #[serde(default)]
    pub default: Option<Value>,
    /// Author-facing description
    #[serde(default)]
    pub description: Option<String>,
}

/// What fires a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// A record of the workflow's module was created
    RecordCreated,
    /// A record was updated
    RecordUpdated,
    /// A specific field changed
    FieldChanged {
        /// The watched field name
        field: String,
    },
    /// The record status changed
    StatusChanged,
    /// The record assignment changed
    AssignmentChanged,
    /// A comment was added
    CommentAdded,
    /// A cron schedule tick
    Scheduled {
        /// Cron expression; 5-field expressions get a seconds column
        /// prepended at validation time
        schedule: String,
    },
    /// A form submission
    FormSubmitted,
    /// An inbound webhook call
    Webhook,
}

/// Configuration for an action node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Action type name, interpreted by the external dispatcher
    pub action_type: String,
    /// Opaque parameter payload; `$variable` tokens are substituted from
    /// the run context before dispatch
    #[serde(default)]
    pub params: Value,
    /// Prefix under which dispatcher outputs merge back into the context
    /// (`prefix.name`); unset merges them under their own names
    #[serde(default)]
    pub output_prefix: Option<String>,
    /// A failing dispatch logs an error but does not fail the run
    #[serde(default)]
    pub best_effort: bool,
}

/// How a delay node computes its wake time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelayKind {
    /// Fixed offset from the moment the node is entered
    Duration {
        /// Seconds to wait
        seconds: u64,
    },
    /// Until an absolute instant
    Until {
        /// Wake time
        at: DateTime<Utc>,
    },
    /// Until a variable-resolved duration (numeric seconds) or RFC 3339
    /// date string
    FromVariable {
        /// Context variable holding the duration or date
        variable: String,
    },
    /// Until a condition becomes true, re-checked on a poll interval up
    /// to a maximum wait
    UntilCondition {
        /// Condition re-checked on every poll
        #[serde(default)]
        groups: Vec<ConditionGroup>,
        /// Seconds between polls; scheduler default when unset
        #[serde(default)]
        poll_interval_seconds: Option<u64>,
        /// Maximum seconds to wait before the run fails with
        /// `DelayTimeout`; scheduler default when unset
        #[serde(default)]
        max_wait_seconds: Option<u64>,
    },
}

/// Hard ceiling on any loop's iteration guard
pub const MAX_LOOP_ITERATIONS: u32 = 1000;

fn default_max_iterations() -> u32 {
    MAX_LOOP_ITERATIONS
}

/// What a loop node iterates over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopKind {
    /// A fixed number of passes
    Count {
        /// Number of body passes
        count: u32,
    },
    /// One pass per element of a collection variable
    ForEach {
        /// Context variable holding the collection
        variable: String,
    },
    /// Re-enter while the condition holds
    While {
        /// Condition checked before every pass
        groups: Vec<ConditionGroup>,
    },
}

/// Loop node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Iteration strategy
    #[serde(flatten)]
    pub kind: LoopKind,
    /// Mandatory iteration guard, 1–1000; exceeding it exits normally
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

/// How a junction node synchronizes or fans out paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JunctionKind {
    /// Wait for every incoming path before continuing
    All,
    /// Continue on the first arrival; later arrivals are skipped
    Any,
    /// Fan out into parallel branches
    Split {
        /// Declared branch count
        branches: u32,
    },
    /// Combine branches without waiting; every arrival passes through
    Merge,
}

/// Kind-specific node configuration, closed over the supported kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// The workflow's entry point
    Trigger(TriggerKind),
    /// Two-way branch on a condition-group list
    Condition {
        /// DNF condition: groups combine under OR
        groups: Vec<ConditionGroup>,
    },
    /// Side effect requested from the external dispatcher
    Action(ActionConfig),
    /// Suspension point with a computed wake time
    Delay(DelayKind),
    /// Guarded iteration over a body subgraph
    Loop(LoopConfig),
    /// Synchronization or fan-out of concurrent paths
    Junction(JunctionKind),
}

/// One node of the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the workflow
    pub id: NodeId,
    /// Display label
    pub label: String,
    /// Author-facing description
    #[serde(default)]
    pub description: Option<String>,
    /// The module-scoped record field this node operates on, if any
    #[serde(default)]
    pub field_context: Option<String>,
    /// Kind-specific configuration
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Named outgoing path of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchLabel {
    /// The single ordinary continuation
    #[default]
    Standard,
    /// Condition evaluated true
    ConditionalTrue,
    /// Condition evaluated false
    ConditionalFalse,
    /// Loop continues: re-enter the body
    LoopComplete,
    /// Loop terminated: leave the body
    LoopExit,
    /// One fan-out branch of a split junction, by index
    Split(u32),
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchLabel::Standard => write!(f, "standard"),
            BranchLabel::ConditionalTrue => write!(f, "conditional_true"),
            BranchLabel::ConditionalFalse => write!(f, "conditional_false"),
            BranchLabel::LoopComplete => write!(f, "loop_complete"),
            BranchLabel::LoopExit => write!(f, "loop_exit"),
            BranchLabel::Split(index) => write!(f, "split:{index}"),
        }
    }
}

/// A directed, labelled edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique id within the workflow
    pub id: ConnectionId,
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Which outgoing branch of the source this edge carries
    #[serde(default)]
    pub branch: BranchLabel,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Inline guard: the edge is only followed when this evaluates true;
    /// absent or empty passes through
    #[serde(default)]
    pub condition: Option<Vec<ConditionGroup>>,
}

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Blocks activation
    Fatal,
    /// Reported, but the workflow may still activate
    Warning,
}

/// One problem found while validating a workflow definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Issue code (a constant identifier)
    pub code: &'static str,
    /// Fatal or warning
    pub severity: ValidationSeverity,
    /// Human-readable message
    pub message: String,
    /// Offending node, when the issue is node-scoped
    pub node: Option<NodeId>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}: {} (at node '{}')", self.code, self.message, node.0),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Validation issue codes
pub mod issue_codes {
    /// The workflow has no trigger node
    pub const MISSING_TRIGGER: &str = "ERR_WORKFLOW_MISSING_TRIGGER";

    /// More than one trigger node
    pub const MULTIPLE_TRIGGERS: &str = "ERR_WORKFLOW_MULTIPLE_TRIGGERS";

    /// A connection targets the trigger node
    pub const TRIGGER_HAS_INBOUND: &str = "ERR_WORKFLOW_TRIGGER_HAS_INBOUND";

    /// Two nodes share an id
    pub const DUPLICATE_NODE_ID: &str = "ERR_WORKFLOW_DUPLICATE_NODE_ID";

    /// A connection endpoint names no existing node
    pub const DANGLING_CONNECTION: &str = "ERR_WORKFLOW_DANGLING_CONNECTION";

    /// A branch-typed node is missing a required branch connection
    pub const MISSING_BRANCH: &str = "ERR_WORKFLOW_MISSING_BRANCH";

    /// A node has more than one connection for the same branch label
    pub const DUPLICATE_BRANCH: &str = "ERR_WORKFLOW_DUPLICATE_BRANCH";

    /// A condition node references no fields
    pub const EMPTY_CONDITION: &str = "ERR_WORKFLOW_EMPTY_CONDITION";

    /// An action node has an empty action type
    pub const EMPTY_ACTION_TYPE: &str = "ERR_WORKFLOW_EMPTY_ACTION_TYPE";

    /// A scheduled trigger's cron expression does not parse
    pub const INVALID_SCHEDULE: &str = "ERR_WORKFLOW_INVALID_SCHEDULE";

    /// A loop's iteration guard is outside 1–1000
    pub const INVALID_LOOP_GUARD: &str = "ERR_WORKFLOW_INVALID_LOOP_GUARD";

    /// A node is unreachable from the trigger (warning)
    pub const UNREACHABLE_NODE: &str = "ERR_WORKFLOW_UNREACHABLE_NODE";
}

/// A parsed workflow definition, immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// ID of the workflow
    pub id: WorkflowId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Human-readable name
    pub name: String,
    /// Description of the workflow
    #[serde(default)]
    pub description: Option<String>,
    /// The business-object type this workflow operates on
    pub module: Module,
    /// Lifecycle status
    pub status: WorkflowStatus,
    /// Monotonically incremented on every update by the definition store
    pub version: u32,
    /// The nodes of the graph
    pub nodes: Vec<Node>,
    /// The labelled edges of the graph
    pub connections: Vec<Connection>,
    /// Ordered variable declarations; names unique within the workflow
    #[serde(default)]
    pub variables: Vec<VariableDeclaration>,
}

impl WorkflowDefinition {
    /// Look up a node by id
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// The workflow's trigger node, if present
    pub fn trigger_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| matches!(node.kind, NodeKind::Trigger(_)))
    }

    /// The outgoing connection of a node for a branch label, if any
    pub fn outgoing(&self, node: &NodeId, branch: &BranchLabel) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|connection| &connection.source == node && &connection.branch == branch)
    }

    /// All outgoing connections of a node, in declaration order
    pub fn outgoing_all(&self, node: &NodeId) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|connection| &connection.source == node)
            .collect()
    }

    /// All incoming connections of a node
    pub fn incoming(&self, node: &NodeId) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|connection| &connection.target == node)
            .collect()
    }

    /// Validate the definition, collecting every issue
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        self.check_trigger(&mut issues);
        self.check_node_ids(&mut issues);
        self.check_connections(&mut issues);
        self.check_node_configs(&mut issues);
        self.check_reachability(&mut issues);

        issues
    }

    /// Transition to `Active`
    ///
    /// Allowed from `Draft` and `Inactive`, and only when validation
    /// reports no fatal issue. The full fatal list is returned otherwise.
    pub fn activate(&mut self) -> Result<(), EngineError> {
        if !matches!(self.status, WorkflowStatus::Draft | WorkflowStatus::Inactive) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot activate workflow in status {:?}",
                self.status
            )));
        }

        let fatal: Vec<ValidationIssue> = self
            .validate()
            .into_iter()
            .filter(|issue| issue.severity == ValidationSeverity::Fatal)
            .collect();
        if !fatal.is_empty() {
            return Err(EngineError::Validation(fatal));
        }

        self.status = WorkflowStatus::Active;
        Ok(())
    }

    /// Transition to `Inactive`; only an active workflow can deactivate
    pub fn deactivate(&mut self) -> Result<(), EngineError> {
        if self.status != WorkflowStatus::Active {
            return Err(EngineError::InvalidTransition(format!(
                "cannot deactivate workflow in status {:?}",
                self.status
            )));
        }
        self.status = WorkflowStatus::Inactive;
        Ok(())
    }

    /// Transition to `Archived` from any non-archived status
    pub fn archive(&mut self) -> Result<(), EngineError> {
        if self.status == WorkflowStatus::Archived {
            return Err(EngineError::InvalidTransition(
                "workflow is already archived".to_string(),
            ));
        }
        self.status = WorkflowStatus::Archived;
        Ok(())
    }

    fn check_trigger(&self, issues: &mut Vec<ValidationIssue>) {
        let triggers: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::Trigger(_)))
            .collect();

        match triggers.len() {
            0 => issues.push(ValidationIssue {
                code: issue_codes::MISSING_TRIGGER,
                severity: ValidationSeverity::Fatal,
                message: "workflow has no trigger node".to_string(),
                node: None,
            }),
            1 => {
                let trigger = triggers[0];
                if !self.incoming(&trigger.id).is_empty() {
                    issues.push(ValidationIssue {
                        code: issue_codes::TRIGGER_HAS_INBOUND,
                        severity: ValidationSeverity::Fatal,
                        message: format!(
                            "trigger node '{}' must not have incoming connections",
                            trigger.id.0
                        ),
                        node: Some(trigger.id.clone()),
                    });
                }
            }
            n => issues.push(ValidationIssue {
                code: issue_codes::MULTIPLE_TRIGGERS,
                severity: ValidationSeverity::Fatal,
                message: format!("workflow has {n} trigger nodes, expected exactly one"),
                node: None,
            }),
        }
    }

    fn check_node_ids(&self, issues: &mut Vec<ValidationIssue>) {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) && reported.insert(&node.id) {
                issues.push(ValidationIssue {
                    code: issue_codes::DUPLICATE_NODE_ID,
                    severity: ValidationSeverity::Fatal,
                    message: format!("duplicate node id: '{}'", node.id.0),
                    node: Some(node.id.clone()),
                });
            }
        }
    }

    fn check_connections(&self, issues: &mut Vec<ValidationIssue>) {
        let node_ids: HashSet<&NodeId> = self.nodes.iter().map(|node| &node.id).collect();
        let mut branches: HashMap<(&NodeId, &BranchLabel), u32> = HashMap::new();

        for connection in &self.connections {
            for endpoint in [&connection.source, &connection.target] {
                if !node_ids.contains(endpoint) {
                    issues.push(ValidationIssue {
                        code: issue_codes::DANGLING_CONNECTION,
                        severity: ValidationSeverity::Fatal,
                        message: format!(
                            "connection '{}' references non-existent node '{}'",
                            connection.id.0, endpoint.0
                        ),
                        node: None,
                    });
                }
            }
            *branches
                .entry((&connection.source, &connection.branch))
                .or_insert(0) += 1;
        }

        for ((source, branch), count) in branches {
            let duplicated = count > 1
                && matches!(
                    branch,
                    BranchLabel::ConditionalTrue
                        | BranchLabel::ConditionalFalse
                        | BranchLabel::LoopComplete
                        | BranchLabel::LoopExit
                        | BranchLabel::Split(_)
                );
            if duplicated {
                issues.push(ValidationIssue {
                    code: issue_codes::DUPLICATE_BRANCH,
                    severity: ValidationSeverity::Fatal,
                    message: format!(
                        "node '{}' has {count} connections for branch '{branch}'",
                        source.0
                    ),
                    node: Some(source.clone()),
                });
            }
        }
    }

    fn check_node_configs(&self, issues: &mut Vec<ValidationIssue>) {
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Trigger(TriggerKind::Scheduled { schedule }) => {
                    if !schedule_parses(schedule) {
                        issues.push(ValidationIssue {
                            code: issue_codes::INVALID_SCHEDULE,
                            severity: ValidationSeverity::Fatal,
                            message: format!(
                                "node '{}' has a malformed cron expression: '{schedule}'",
                                node.id.0
                            ),
                            node: Some(node.id.clone()),
                        });
                    }
                }
                NodeKind::Trigger(_) => {}
                NodeKind::Condition { groups } => {
                    let no_fields =
                        groups.is_empty() || groups.iter().all(|g| g.conditions.is_empty());
                    if no_fields {
                        issues.push(ValidationIssue {
                            code: issue_codes::EMPTY_CONDITION,
                            severity: ValidationSeverity::Fatal,
                            message: format!(
                                "condition node '{}' references no fields",
                                node.id.0
                            ),
                            node: Some(node.id.clone()),
                        });
                    }
                    self.require_branch(node, BranchLabel::ConditionalTrue, issues);
                    self.require_branch(node, BranchLabel::ConditionalFalse, issues);
                }
                NodeKind::Action(config) => {
                    if config.action_type.trim().is_empty() {
                        issues.push(ValidationIssue {
                            code: issue_codes::EMPTY_ACTION_TYPE,
                            severity: ValidationSeverity::Fatal,
                            message: format!("action node '{}' has no action type", node.id.0),
                            node: Some(node.id.clone()),
                        });
                    }
                }
                NodeKind::Delay(_) => {}
                NodeKind::Loop(config) => {
                    if config.max_iterations == 0 || config.max_iterations > MAX_LOOP_ITERATIONS {
                        issues.push(ValidationIssue {
                            code: issue_codes::INVALID_LOOP_GUARD,
                            severity: ValidationSeverity::Fatal,
                            message: format!(
                                "loop node '{}' guard must be 1-{MAX_LOOP_ITERATIONS}, got {}",
                                node.id.0, config.max_iterations
                            ),
                            node: Some(node.id.clone()),
                        });
                    }
                    self.require_branch(node, BranchLabel::LoopComplete, issues);
                    self.require_branch(node, BranchLabel::LoopExit, issues);
                }
                NodeKind::Junction(JunctionKind::Split { .. }) => {
                    let fan_out = self
                        .outgoing_all(&node.id)
                        .iter()
                        .filter(|connection| matches!(connection.branch, BranchLabel::Split(_)))
                        .count();
                    if fan_out == 0 {
                        issues.push(ValidationIssue {
                            code: issue_codes::MISSING_BRANCH,
                            severity: ValidationSeverity::Fatal,
                            message: format!(
                                "split junction '{}' has no split branch connections",
                                node.id.0
                            ),
                            node: Some(node.id.clone()),
                        });
                    }
                }
                NodeKind::Junction(_) => {}
            }
        }
    }

    fn require_branch(
        &self,
        node: &Node,
        branch: BranchLabel,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if self.outgoing(&node.id, &branch).is_none() {
            issues.push(ValidationIssue {
                code: issue_codes::MISSING_BRANCH,
                severity: ValidationSeverity::Fatal,
                message: format!("node '{}' is missing its '{branch}' branch", node.id.0),
                node: Some(node.id.clone()),
            });
        }
    }

    fn check_reachability(&self, issues: &mut Vec<ValidationIssue>) {
        let Some(trigger) = self.trigger_node() else {
            return;
        };

        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut queue = VecDeque::from([&trigger.id]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for connection in self.outgoing_all(current) {
                queue.push_back(&connection.target);
            }
        }

        for node in &self.nodes {
            if !visited.contains(&node.id) {
                issues.push(ValidationIssue {
                    code: issue_codes::UNREACHABLE_NODE,
                    severity: ValidationSeverity::Warning,
                    message: format!(
                        "node '{}' is not reachable from the trigger",
                        node.id.0
                    ),
                    node: Some(node.id.clone()),
                });
            }
        }
    }
}

/// Parse check for scheduled-trigger cron expressions
///
/// The `cron` crate expects a seconds column; plain 5-field expressions
/// are accepted by prepending one.
fn schedule_parses(expression: &str) -> bool {
    cron::Schedule::from_str(expression).is_ok()
        || cron::Schedule::from_str(&format!("0 {expression}")).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{ComparisonOperator, Condition, LogicalOperator};
    use serde_json::json;

    fn node_id(id: &str) -> NodeId {
        NodeId(id.to_string())
    }

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: node_id(id),
            label: id.to_string(),
            description: None,
            field_context: None,
            kind,
        }
    }

    fn connect(id: &str, source: &str, target: &str, branch: BranchLabel) -> Connection {
        Connection {
            id: ConnectionId(id.to_string()),
            source: node_id(source),
            target: node_id(target),
            branch,
            label: None,
            condition: None,
        }
    }

    fn priority_groups() -> Vec<ConditionGroup> {
        vec![ConditionGroup {
            operator: LogicalOperator::And,
            conditions: vec![Condition {
                field: "$ticket.priority".to_string(),
                operator: ComparisonOperator::Equals,
                value: json!("high"),
            }],
        }]
    }

    fn definition(nodes: Vec<Node>, connections: Vec<Connection>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("wf-1".to_string()),
            tenant_id: TenantId("tenant-1".to_string()),
            name: "Escalation".to_string(),
            description: None,
            module: Module::Ticket,
            status: WorkflowStatus::Draft,
            version: 1,
            nodes,
            connections,
            variables: Vec::new(),
        }
    }

    fn valid_definition() -> WorkflowDefinition {
        definition(
            vec![
                node("trigger", NodeKind::Trigger(TriggerKind::RecordCreated)),
                node(
                    "check",
                    NodeKind::Condition {
                        groups: priority_groups(),
                    },
                ),
                node(
                    "notify",
                    NodeKind::Action(ActionConfig {
                        action_type: "notify".to_string(),
                        params: json!({}),
                        output_prefix: None,
                        best_effort: false,
                    }),
                ),
                node(
                    "log_only",
                    NodeKind::Action(ActionConfig {
                        action_type: "log_only".to_string(),
                        params: json!({}),
                        output_prefix: None,
                        best_effort: false,
                    }),
                ),
            ],
            vec![
                connect("c1", "trigger", "check", BranchLabel::Standard),
                connect("c2", "check", "notify", BranchLabel::ConditionalTrue),
                connect("c3", "check", "log_only", BranchLabel::ConditionalFalse),
            ],
        )
    }

    #[test]
    fn test_valid_definition_has_no_issues() {
        assert!(valid_definition().validate().is_empty());
    }

    #[test]
    fn test_missing_trigger_is_fatal() {
        let mut definition = valid_definition();
        definition.nodes.retain(|n| n.id.0 != "trigger");
        definition.connections.retain(|c| c.source.0 != "trigger");

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::MISSING_TRIGGER
                && i.severity == ValidationSeverity::Fatal));
    }

    #[test]
    fn test_duplicate_node_ids_reported_once() {
        let mut definition = valid_definition();
        definition
            .nodes
            .push(node("notify", NodeKind::Trigger(TriggerKind::Webhook)));

        let issues = definition.validate();
        let duplicates: Vec<_> = issues
            .iter()
            .filter(|i| i.code == issue_codes::DUPLICATE_NODE_ID)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].node, Some(node_id("notify")));
    }

    #[test]
    fn test_dangling_connection_is_fatal() {
        let mut definition = valid_definition();
        definition
            .connections
            .push(connect("c4", "notify", "ghost", BranchLabel::Standard));

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::DANGLING_CONNECTION
                && i.message.contains("ghost")));
    }

    #[test]
    fn test_condition_missing_branch() {
        let mut definition = valid_definition();
        definition.connections.retain(|c| c.id.0 != "c3");

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::MISSING_BRANCH
                && i.message.contains("conditional_false")));
    }

    #[test]
    fn test_duplicate_branch_connection() {
        let mut definition = valid_definition();
        definition
            .connections
            .push(connect("c4", "check", "log_only", BranchLabel::ConditionalTrue));

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::DUPLICATE_BRANCH));
    }

    #[test]
    fn test_empty_condition_node() {
        let mut definition = valid_definition();
        if let Some(n) = definition.nodes.iter_mut().find(|n| n.id.0 == "check") {
            n.kind = NodeKind::Condition { groups: Vec::new() };
        }

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::EMPTY_CONDITION));
    }

    #[test]
    fn test_malformed_schedule() {
        let mut definition = valid_definition();
        if let Some(n) = definition.nodes.iter_mut().find(|n| n.id.0 == "trigger") {
            n.kind = NodeKind::Trigger(TriggerKind::Scheduled {
                schedule: "whenever".to_string(),
            });
        }

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::INVALID_SCHEDULE));
    }

    #[test]
    fn test_five_field_cron_accepted() {
        let mut definition = valid_definition();
        if let Some(n) = definition.nodes.iter_mut().find(|n| n.id.0 == "trigger") {
            n.kind = NodeKind::Trigger(TriggerKind::Scheduled {
                schedule: "0 9 * * 1-5".to_string(),
            });
        }

        assert!(definition.validate().is_empty());
    }

    #[test]
    fn test_loop_guard_bounds() {
        let mut definition = valid_definition();
        definition.nodes.push(node(
            "retry",
            NodeKind::Loop(LoopConfig {
                kind: LoopKind::Count { count: 3 },
                max_iterations: 0,
            }),
        ));
        definition.connections.extend([
            connect("c4", "notify", "retry", BranchLabel::Standard),
            connect("c5", "retry", "notify", BranchLabel::LoopComplete),
            connect("c6", "retry", "log_only", BranchLabel::LoopExit),
        ]);

        let issues = definition.validate();
        assert!(issues
            .iter()
            .any(|i| i.code == issue_codes::INVALID_LOOP_GUARD));
    }

    #[test]
    fn test_unreachable_node_is_warning() {
        let mut definition = valid_definition();
        definition.nodes.push(node(
            "orphan",
            NodeKind::Action(ActionConfig {
                action_type: "noop".to_string(),
                params: json!({}),
                output_prefix: None,
                best_effort: false,
            }),
        ));

        let issues = definition.validate();
        let orphan = issues
            .iter()
            .find(|i| i.code == issue_codes::UNREACHABLE_NODE)
            .expect("expected unreachable warning");
        assert_eq!(orphan.severity, ValidationSeverity::Warning);
        assert_eq!(orphan.node, Some(node_id("orphan")));
    }

    #[test]
    fn test_activate_requires_no_fatal_issues() {
        let mut broken = valid_definition();
        broken.connections.retain(|c| c.id.0 != "c3");

        match broken.activate() {
            Err(EngineError::Validation(issues)) => {
                assert!(!issues.is_empty());
                assert!(issues
                    .iter()
                    .all(|i| i.severity == ValidationSeverity::Fatal));
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
        assert_eq!(broken.status, WorkflowStatus::Draft);
    }

    #[test]
    fn test_activate_with_warnings_succeeds() {
        let mut definition = valid_definition();
        definition.nodes.push(node(
            "orphan",
            NodeKind::Action(ActionConfig {
                action_type: "noop".to_string(),
                params: json!({}),
                output_prefix: None,
                best_effort: false,
            }),
        ));

        assert!(definition.activate().is_ok());
        assert_eq!(definition.status, WorkflowStatus::Active);
    }

    #[test]
    fn test_status_transitions() {
        let mut definition = valid_definition();
        definition.activate().unwrap();

        // Cannot activate an already-active workflow
        assert!(definition.activate().is_err());

        definition.deactivate().unwrap();
        assert_eq!(definition.status, WorkflowStatus::Inactive);

        definition.activate().unwrap();
        definition.archive().unwrap();
        assert_eq!(definition.status, WorkflowStatus::Archived);
        assert!(definition.archive().is_err());
    }

    #[test]
    fn test_graph_lookups() {
        let definition = valid_definition();

        assert_eq!(definition.trigger_node().unwrap().id, node_id("trigger"));
        assert_eq!(
            definition
                .outgoing(&node_id("check"), &BranchLabel::ConditionalTrue)
                .unwrap()
                .target,
            node_id("notify")
        );
        assert!(definition
            .outgoing(&node_id("check"), &BranchLabel::Standard)
            .is_none());
        assert_eq!(definition.outgoing_all(&node_id("check")).len(), 2);
        assert_eq!(definition.incoming(&node_id("notify")).len(), 1);
    }

    #[test]
    fn test_node_kind_serialization() {
        let delay = node(
            "wait",
            NodeKind::Delay(DelayKind::Duration { seconds: 300 }),
        );
        let text = serde_json::to_string(&delay).unwrap();
        assert!(text.contains("\"kind\":\"delay\""));
        assert!(text.contains("\"type\":\"duration\""));

        let parsed: Node = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, delay);
    }

    #[test]
    fn test_branch_label_serialization() {
        assert_eq!(
            serde_json::to_string(&BranchLabel::LoopComplete).unwrap(),
            "\"loop_complete\""
        );
        let split: BranchLabel = serde_json::from_str("{\"split\":1}").unwrap();
        assert_eq!(split, BranchLabel::Split(1));
    }

    #[test]
    fn test_loop_guard_defaults_when_absent() {
        let parsed: LoopConfig =
            serde_json::from_str("{\"type\":\"count\",\"count\":4}").unwrap();
        assert_eq!(parsed.max_iterations, MAX_LOOP_ITERATIONS);
        assert_eq!(parsed.kind, LoopKind::Count { count: 4 });
    }
}
