use crate::node::NodeSpec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = Uuid;
pub type EdgeId = Uuid;
pub type RunId = Uuid;

/// Port used on the target side when none is given.
pub const DEFAULT_TARGET_PORT: &str = "input";

/// Directed connection between two node ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_port: String,
    pub target: NodeId,
    pub target_port: String,
}

impl Edge {
    /// Edge with default ports: the source port is the source node's id, so
    /// several upstream nodes never collide in the target's input map.
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self::with_ports(source, source.to_string(), target, DEFAULT_TARGET_PORT)
    }

    pub fn with_ports(
        source: NodeId,
        source_port: impl Into<String>,
        target: NodeId,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            source_port: source_port.into(),
            target,
            target_port: target_port.into(),
        }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.source == node || self.target == node
    }

    /// Same endpoints and ports, ignoring the id.
    pub fn same_connection(&self, other: &Edge) -> bool {
        self.source == other.source
            && self.source_port == other.source_port
            && self.target == other.target
            && self.target_port == other.target_port
    }

    /// Both edges would hand `target` a result under the same input key.
    pub fn shares_input_slot(&self, other: &Edge) -> bool {
        self.target == other.target && self.source_port == other.source_port
    }
}

/// Serializable copy of a whole workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> crate::NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    pub fn connect(
        &mut self,
        source: NodeId,
        source_port: impl Into<String>,
        target: NodeId,
        target_port: impl Into<String>,
    ) -> EdgeId {
        let edge = Edge::with_ports(source, source_port, target, target_port);
        let id = edge.id;
        self.edges.push(edge);
        id
    }

    pub fn find_node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
