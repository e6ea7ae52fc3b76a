use crate::node::{NodeSpec, NodeStatus, NodeType};
use crate::workflow::{NodeId, RunId, WorkflowId};
use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

/// Per-node line of a run's analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStat {
    pub node_id: NodeId,
    pub node_name: String,
    pub node_type: NodeType,
    /// `idle` means the node never ran (blocked by a failed dependency).
    pub status: NodeStatus,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl NodeStat {
    pub fn from_node(node: &NodeSpec, duration_ms: Option<u64>) -> Self {
        Self {
            node_id: node.id,
            node_name: node.name.clone(),
            node_type: node.node_type(),
            status: node.run_state.status,
            error: node.run_state.error.clone(),
            duration_ms,
        }
    }
}

/// One execution attempt of a workflow.
///
/// Built while the run is in progress and sealed when it ends; sealed runs
/// are only ever appended to the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_rate: f64,
    pub node_stats: Vec<NodeStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRun {
    pub fn start(id: RunId, workflow_id: WorkflowId) -> Self {
        Self {
            id,
            workflow_id,
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Running,
            error_rate: 0.0,
            node_stats: Vec::new(),
            error: None,
        }
    }

    /// Close the run with its final node statistics.
    pub fn seal(mut self, node_stats: Vec<NodeStat>, error: Option<String>) -> Self {
        let failed = node_stats.iter().any(|s| s.status == NodeStatus::Error);
        self.status = if failed || error.is_some() {
            RunStatus::Error
        } else {
            RunStatus::Success
        };
        self.error_rate = error_rate(&node_stats);
        self.node_stats = node_stats;
        self.error = error;
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some() && self.status != RunStatus::Running
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    pub fn stat(&self, node_id: NodeId) -> Option<&NodeStat> {
        self.node_stats.iter().find(|s| s.node_id == node_id)
    }
}

/// Fraction of nodes that ended in `error`.
pub fn error_rate(stats: &[NodeStat]) -> f64 {
    if stats.is_empty() {
        return 0.0;
    }
    let errored = stats
        .iter()
        .filter(|s| s.status == NodeStatus::Error)
        .count();
    errored as f64 / stats.len() as f64
}

/// What the caller gets back from `execute_workflow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: RunId,
    pub success: bool,
    pub message: String,
    /// Results of the nodes that succeeded.
    pub node_results: BTreeMap<NodeId, Value>,
}
