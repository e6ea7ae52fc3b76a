use async_trait::async_trait;
use cybercore::services::Sandbox;
use cybercore::{
    NodeConfig, NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeSpec, NodeType,
    PortDefinition, Value,
};
use std::sync::Arc;

/// Runs the node's script in a [`Sandbox`] with `input` bound to the
/// upstream results keyed by port.
pub struct TaskExecutor {
    sandbox: Arc<dyn Sandbox>,
}

impl TaskExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl NodeExecutor for TaskExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Task
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError> {
        let NodeConfig::Task(config) = &node.config else {
            return Err(NodeError::Configuration(format!(
                "expected task config, got {}",
                node.node_type()
            )));
        };
        if config.script.trim().is_empty() {
            return Err(NodeError::Configuration("No script configured".to_string()));
        }

        ctx.events.progress(0, Some("Running script".to_string()));
        let result = self
            .sandbox
            .run(&config.script, ctx.inputs_object(), &config.sandbox_options)
            .await;

        match result {
            Ok(value) => {
                ctx.events.progress(100, None);
                Ok(value)
            }
            Err(e) => {
                ctx.events.warn(format!("Script failed: {}", e.detail));
                Err(e.into())
            }
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Run a JavaScript snippet over the inputs".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::new("input", "Upstream results by port", false)],
            outputs: vec![PortDefinition::new("output", "Script return value", true)],
        }
    }
}
