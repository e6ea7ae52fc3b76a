use crate::permission::{Operation, Role};
use crate::node::NodeType;
use crate::workflow::{EdgeId, NodeId};
use thiserror::Error;

/// Errors surfaced to the caller of the orchestrator.
///
/// Node-level failures never show up here: they are recorded in the node's
/// run-state and in the run analytics instead.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Permission denied: role '{role}' may not {operation}")]
    PermissionDenied { role: Role, operation: Operation },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, FlowError::PermissionDenied { .. })
    }
}

/// Failure of a single node's executor. Contained to that node and its
/// dependants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Sandbox limit exceeded ({limit}): {detail}")]
    SandboxLimitExceeded { limit: SandboxLimit, detail: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
}

/// Which sandbox resource limit was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxLimit {
    Timeout,
    Memory,
}

impl std::fmt::Display for SandboxLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxLimit::Timeout => write!(f, "timeout"),
            SandboxLimit::Memory => write!(f, "memory"),
        }
    }
}

/// Structural problems with a workflow graph. All of them are detected before
/// any node runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Cyclic dependency detected at node {node}")]
    CyclicDependency { node: NodeId },

    #[error("Workflow has no start nodes")]
    NoStartNodes,

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Invalid node configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("No executor registered for node type '{0}'")]
    MissingExecutor(NodeType),

    #[error("Invalid workflow: {0}")]
    Invalid(String),
}
