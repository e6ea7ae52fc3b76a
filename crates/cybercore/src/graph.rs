//! In-memory graph store for one workflow.
//!
//! The store is the single owner of the node and edge collections. Every
//! mutating operation takes the caller's role and consults the permission gate
//! before touching anything, so a refused call leaves the graph unchanged.

use crate::config::NodeConfig;
use crate::node::{NodePatch, NodeRunState, NodeSpec, NodeType};
use crate::permission::{self, Operation, Role};
use crate::workflow::{Edge, EdgeId, NodeId, WorkflowId, WorkflowSnapshot};
use crate::{FlowError, Result, Value, WorkflowError};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct GraphStore {
    id: WorkflowId,
    name: String,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
}

impl GraphStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Build a store from a snapshot, checking its structure.
    pub fn from_snapshot(snapshot: WorkflowSnapshot) -> std::result::Result<Self, WorkflowError> {
        check_snapshot(&snapshot)?;
        let mut nodes = snapshot.nodes;
        for node in &mut nodes {
            node.run_state = NodeRunState::default();
        }
        Ok(Self {
            id: snapshot.id,
            name: snapshot.name,
            nodes,
            edges: snapshot.edges,
        })
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a node of `node_type` from its defaults merged with `overrides`.
    pub fn create_node(
        &mut self,
        role: Role,
        node_type: NodeType,
        overrides: &Value,
    ) -> Result<NodeSpec> {
        permission::require(role, Operation::CreateNode)?;

        let config = NodeConfig::with_overrides(node_type, overrides)?;
        let node = NodeSpec::from_config(config);
        tracing::debug!("Created {} node {}", node_type, node.id);
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// Insert a fully built node.
    pub fn add_node(&mut self, role: Role, node: NodeSpec) -> Result<NodeId> {
        permission::require(role, Operation::CreateNode)?;

        if self.node(node.id).is_some() {
            return Err(WorkflowError::Invalid(format!("duplicate node id {}", node.id)).into());
        }
        let id = node.id;
        self.nodes.push(NodeSpec {
            run_state: NodeRunState::default(),
            ..node
        });
        Ok(id)
    }

    pub fn update_node(&mut self, role: Role, id: NodeId, patch: NodePatch) -> Result<NodeSpec> {
        permission::require(role, Operation::UpdateNode)?;

        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(WorkflowError::NodeNotFound(id))?;

        // Compute the new config before touching the node so a bad patch
        // changes nothing.
        let config = match &patch.config {
            Some(overrides) => node.config.merge(overrides)?,
            None => node.config.clone(),
        };

        node.config = config;
        if let Some(name) = patch.name {
            node.name = name;
        }
        if let Some(description) = patch.description {
            node.description = Some(description);
        }
        Ok(node.clone())
    }

    /// Delete a node and every edge touching it.
    ///
    /// Returns whether anything was removed.
    pub fn delete_node(&mut self, role: Role, id: NodeId) -> Result<bool> {
        permission::require(role, Operation::DeleteNode)?;

        let before = self.edges.len();
        self.edges.retain(|e| !e.touches(id));
        let removed_edges = before - self.edges.len();

        let node_count = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        let removed_node = self.nodes.len() != node_count;

        if removed_node {
            tracing::debug!("Deleted node {} and {} incident edge(s)", id, removed_edges);
        }
        Ok(removed_node || removed_edges > 0)
    }

    /// Connect two nodes using the default ports.
    pub fn create_edge(&mut self, role: Role, source: NodeId, target: NodeId) -> Result<Edge> {
        permission::require(role, Operation::CreateEdge)?;
        self.insert_edge(Edge::new(source, target))
    }

    /// Connect two nodes on explicit ports.
    pub fn connect(
        &mut self,
        role: Role,
        source: NodeId,
        source_port: impl Into<String>,
        target: NodeId,
        target_port: impl Into<String>,
    ) -> Result<Edge> {
        permission::require(role, Operation::CreateEdge)?;
        self.insert_edge(Edge::with_ports(source, source_port, target, target_port))
    }

    fn insert_edge(&mut self, edge: Edge) -> Result<Edge> {
        if self.node(edge.source).is_none() {
            return Err(WorkflowError::NodeNotFound(edge.source).into());
        }
        if self.node(edge.target).is_none() {
            return Err(WorkflowError::NodeNotFound(edge.target).into());
        }
        if self.edges.iter().any(|e| e.same_connection(&edge)) {
            return Err(WorkflowError::InvalidConnection(format!(
                "{}:{} -> {}:{} already exists",
                edge.source, edge.source_port, edge.target, edge.target_port
            ))
            .into());
        }
        if let Some(existing) = self.edges.iter().find(|e| e.shares_input_slot(&edge)) {
            return Err(WorkflowError::InvalidConnection(format!(
                "{} already receives port '{}' from {}",
                edge.target, edge.source_port, existing.source
            ))
            .into());
        }
        self.edges.push(edge.clone());
        Ok(edge)
    }

    pub fn delete_edge(&mut self, role: Role, id: EdgeId) -> Result<bool> {
        permission::require(role, Operation::DeleteEdge)?;

        let before = self.edges.len();
        self.edges.retain(|e| e.id != id);
        Ok(self.edges.len() != before)
    }

    /// Edges ending at `id`.
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Edges leaving `id`.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Nodes without incoming edges, in insertion order.
    pub fn start_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.incoming(n.id).next().is_none())
            .map(|n| n.id)
            .collect()
    }

    /// Overwrite a node's run state. Reserved for the execution engine while
    /// it owns the store for a run.
    pub fn set_run_state(&mut self, id: NodeId, state: NodeRunState) -> bool {
        match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.run_state = state;
                true
            }
            None => false,
        }
    }

    pub fn reset_run_states(&mut self) {
        for node in &mut self.nodes {
            node.run_state = NodeRunState::default();
        }
    }

    /// Copy of the graph with run state cleared.
    pub fn export(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            id: self.id,
            name: self.name.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeSpec {
                    run_state: NodeRunState::default(),
                    ..n.clone()
                })
                .collect(),
            edges: self.edges.clone(),
        }
    }

    /// Replace the whole graph with `snapshot`.
    ///
    /// Replacing a non-empty graph removes nodes, so it also needs delete
    /// permission.
    pub fn import(&mut self, role: Role, snapshot: WorkflowSnapshot) -> Result<()> {
        permission::require(role, Operation::Import)?;
        if !self.nodes.is_empty() {
            permission::require(role, Operation::DeleteNode)?;
        }

        let imported = GraphStore::from_snapshot(snapshot).map_err(FlowError::from)?;
        tracing::info!(
            "Imported workflow '{}' ({} nodes, {} edges)",
            imported.name,
            imported.nodes.len(),
            imported.edges.len()
        );
        *self = imported;
        Ok(())
    }
}

fn check_snapshot(snapshot: &WorkflowSnapshot) -> std::result::Result<(), WorkflowError> {
    let mut ids = HashSet::new();
    for node in &snapshot.nodes {
        if !ids.insert(node.id) {
            return Err(WorkflowError::Invalid(format!("duplicate node id {}", node.id)));
        }
    }

    let mut edge_ids = HashSet::new();
    for (i, edge) in snapshot.edges.iter().enumerate() {
        if !edge_ids.insert(edge.id) {
            return Err(WorkflowError::Invalid(format!("duplicate edge id {}", edge.id)));
        }
        for endpoint in [edge.source, edge.target] {
            if !ids.contains(&endpoint) {
                return Err(WorkflowError::InvalidConnection(format!(
                    "edge {} references unknown node {}",
                    edge.id, endpoint
                )));
            }
        }
        if snapshot.edges[..i].iter().any(|e| e.same_connection(edge)) {
            return Err(WorkflowError::InvalidConnection(format!(
                "edge {} duplicates an existing connection",
                edge.id
            )));
        }
        if snapshot.edges[..i].iter().any(|e| e.shares_input_slot(edge)) {
            return Err(WorkflowError::InvalidConnection(format!(
                "edge {} reuses port '{}' into {}",
                edge.id, edge.source_port, edge.target
            )));
        }
    }
    Ok(())
}
