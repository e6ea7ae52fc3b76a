//! Core abstractions for the flow orchestrator
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the workflow data model, the permission gate, the
//! graph store, execution events and the collaborator interfaces.

mod config;
mod error;
pub mod events;
mod graph;
mod node;
pub mod permission;
mod run;
pub mod services;
mod workflow;

pub use config::{
    ChatConfig, IntegrationConfig, IntegrationKind, NodeConfig, PinnedInputConfig, ReportConfig,
    ReportFormat, SandboxOptions, ScheduleType, SchedulerConfig, TaskConfig,
};
pub use error::{FlowError, NodeError, SandboxLimit, WorkflowError};
pub use events::*;
pub use graph::GraphStore;
pub use node::{
    NodeContext, NodeExecutor, NodeMetadata, NodePatch, NodeRunState, NodeSpec, NodeStatus,
    NodeType, PortDefinition,
};
pub use permission::{Operation, Role};
pub use run::{error_rate, NodeStat, RunStatus, WorkflowResult, WorkflowRun};
pub use workflow::{
    Edge, EdgeId, NodeId, RunId, WorkflowId, WorkflowSnapshot, DEFAULT_TARGET_PORT,
};

/// Results are opaque JSON values.
pub use serde_json::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
