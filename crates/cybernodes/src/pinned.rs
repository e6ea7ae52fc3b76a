use async_trait::async_trait;
use cybercore::{
    NodeConfig, NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeSpec, NodeType,
    PortDefinition, Value,
};

/// Emits its configured value unchanged.
pub struct PinnedInputExecutor;

#[async_trait]
impl NodeExecutor for PinnedInputExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::PinnedInput
    }

    async fn execute(&self, node: &NodeSpec, _ctx: NodeContext) -> Result<Value, NodeError> {
        match &node.config {
            NodeConfig::PinnedInput(config) => Ok(config.value.clone()),
            other => Err(NodeError::Configuration(format!(
                "expected pinned-input config, got {}",
                other.node_type()
            ))),
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Constant value".to_string(),
            category: "input".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("output", "The pinned value", true)],
        }
    }
}
