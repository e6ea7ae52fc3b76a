use crate::config::NodeConfig;
use crate::events::EventEmitter;
use crate::workflow::{NodeId, RunId, WorkflowId};
use crate::{NodeError, Value, WorkflowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The six node behaviours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Chat,
    Integration,
    Scheduler,
    Task,
    Report,
    PinnedInput,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Chat,
        NodeType::Integration,
        NodeType::Scheduler,
        NodeType::Task,
        NodeType::Report,
        NodeType::PinnedInput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Chat => "chat",
            NodeType::Integration => "integration",
            NodeType::Scheduler => "scheduler",
            NodeType::Task => "task",
            NodeType::Report => "report",
            NodeType::PinnedInput => "pinned-input",
        }
    }

    /// Label given to new nodes of this type.
    pub fn default_label(&self) -> &'static str {
        match self {
            NodeType::Chat => "Chat Agent",
            NodeType::Integration => "Integration",
            NodeType::Scheduler => "Scheduler",
            NodeType::Task => "Task",
            NodeType::Report => "Report",
            NodeType::PinnedInput => "Pinned Input",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownNodeType(s.to_string()))
    }
}

/// Execution status of a node within the current (or last) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Error)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Running => "running",
            NodeStatus::Success => "success",
            NodeStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Per-node run state. Written only by the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRunState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub progress: u8,
}

impl NodeRunState {
    pub fn running() -> Self {
        Self {
            status: NodeStatus::Running,
            ..Self::default()
        }
    }

    pub fn succeeded(result: Value) -> Self {
        Self {
            status: NodeStatus::Success,
            result: Some(result),
            error: None,
            last_run_at: Some(Utc::now()),
            progress: 100,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Error,
            result: None,
            error: Some(error.into()),
            last_run_at: Some(Utc::now()),
            progress: 0,
        }
    }
}

/// A vertex in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub config: NodeConfig,
    #[serde(default)]
    pub run_state: NodeRunState,
}

impl NodeSpec {
    /// New node of `node_type` with default config and label.
    pub fn new(node_type: NodeType) -> Self {
        Self::from_config(NodeConfig::default_for(node_type))
    }

    pub fn from_config(config: NodeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: config.node_type().default_label().to_string(),
            description: None,
            config,
            run_state: NodeRunState::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }
}

/// Editor-side changes to a node. Run state is deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Merged shallowly onto the current config.
    pub config: Option<Value>,
}

impl NodePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn config(mut self, overrides: Value) -> Self {
        self.config = Some(overrides);
        self
    }
}

/// Behaviour attached to one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The node type this executor runs.
    fn node_type(&self) -> NodeType;

    /// Turn the node's inputs into a result.
    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Optional: describe the executor for listings.
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Execution context passed to each executor.
#[derive(Clone)]
pub struct NodeContext {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub node_id: NodeId,

    /// Upstream results keyed by the edge's source port id.
    pub inputs: BTreeMap<String, Value>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,
}

impl NodeContext {
    pub fn new(workflow_id: WorkflowId, run_id: RunId, node_id: NodeId, events: EventEmitter) -> Self {
        Self {
            workflow_id,
            run_id,
            node_id,
            inputs: BTreeMap::new(),
            events,
        }
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_input(mut self, port: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(port.into(), value);
        self
    }

    /// All inputs as one JSON object keyed by port.
    pub fn inputs_object(&self) -> Value {
        Value::Object(
            self.inputs
                .iter()
                .map(|(port, value)| (port.clone(), value.clone()))
                .collect(),
        )
    }

    /// The single upstream value when there is exactly one input, the inputs
    /// object when there are several, `None` when there are none.
    pub fn combined_input(&self) -> Option<Value> {
        match self.inputs.len() {
            0 => None,
            1 => self.inputs.values().next().cloned(),
            _ => Some(self.inputs_object()),
        }
    }
}

/// Descriptive metadata about an executor.
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
        }
    }
}
