use async_trait::async_trait;
use cybercore::services::{JobId, JobSpec, Scheduler, SchedulerError};
use cybercore::{
    NodeConfig, NodeContext, NodeError, NodeExecutor, NodeId, NodeMetadata, NodeSpec, NodeType,
    PortDefinition, Value,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registers (or refreshes) a recurring job for the node and returns
/// immediately with the next fire time.
pub struct SchedulerTriggerExecutor {
    scheduler: Arc<dyn Scheduler>,
    jobs: Mutex<HashMap<NodeId, JobId>>,
}

impl SchedulerTriggerExecutor {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Job currently owned by `node_id`, if any.
    pub async fn job_for(&self, node_id: NodeId) -> Option<JobId> {
        self.jobs.lock().await.get(&node_id).cloned()
    }
}

#[async_trait]
impl NodeExecutor for SchedulerTriggerExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Scheduler
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError> {
        let NodeConfig::Scheduler(config) = &node.config else {
            return Err(NodeError::Configuration(format!(
                "expected scheduler config, got {}",
                node.node_type()
            )));
        };

        let spec = JobSpec {
            name: format!("Job for {}", node.name),
            workflow_id: Some(ctx.workflow_id),
            schedule_type: config.schedule_type,
            expression: config.expression.clone(),
            timezone: config.timezone.clone(),
            enabled: config.enabled,
        };

        // Held across the call so two runs never create two jobs for one node.
        let mut jobs = self.jobs.lock().await;
        let existing = match jobs.get(&node.id) {
            Some(id) => self.scheduler.get_job(id).await.map(|job| job.id),
            None => None,
        };

        let job = match existing {
            Some(id) => {
                ctx.events.info(format!("Refreshing job {}", id));
                self.scheduler.update_job(&id, spec).await
            }
            None => self.scheduler.schedule_job(spec).await,
        }
        .map_err(scheduler_error)?;

        jobs.insert(node.id, job.id.clone());
        tracing::info!(
            "Node {} scheduled job {} ({} '{}'), next run {:?}",
            node.id,
            job.id,
            job.spec.schedule_type,
            job.spec.expression,
            job.next_run
        );

        Ok(json!({
            "success": true,
            "job_id": job.id,
            "next_run": job.next_run,
        }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Register a recurring trigger for this workflow".to_string(),
            category: "trigger".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("output", "Job id and next run", true)],
        }
    }
}

fn scheduler_error(err: SchedulerError) -> NodeError {
    match err {
        SchedulerError::InvalidExpression { .. } => NodeError::Configuration(err.to_string()),
        SchedulerError::JobNotFound(_) => NodeError::ExecutionFailed(err.to_string()),
    }
}
