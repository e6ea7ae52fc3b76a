use cybercore::{NodeExecutor, NodeMetadata, NodeSpec, NodeType, WorkflowError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of executors, one per node type.
pub struct NodeRegistry {
    executors: BTreeMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: BTreeMap::new(),
        }
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type();
        tracing::info!("Registering executor for node type: {}", node_type);
        self.executors.insert(node_type, executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    /// Executor for `node`, or `MissingExecutor`.
    pub fn executor_for(&self, node: &NodeSpec) -> Result<Arc<dyn NodeExecutor>, WorkflowError> {
        self.get(node.node_type())
            .ok_or(WorkflowError::MissingExecutor(node.node_type()))
    }

    /// Fail if any node has no executor.
    pub fn check_coverage(&self, nodes: &[NodeSpec]) -> Result<(), WorkflowError> {
        for node in nodes {
            self.executor_for(node)?;
        }
        Ok(())
    }

    /// Get all registered node types
    pub fn list_node_types(&self) -> Vec<NodeType> {
        self.executors.keys().copied().collect()
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: NodeType) -> Option<NodeMetadata> {
        self.executors.get(&node_type).map(|e| e.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
