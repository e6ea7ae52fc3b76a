use crate::analytics::{AnalyticsSummary, RunRecorder};
use crate::config::RuntimeConfig;
use crate::executor::{rejected_run, WorkflowExecutor};
use crate::persistence::{FileSnapshotStore, JsonlRunLog, MemoryRunLog};
use crate::registry::NodeRegistry;
use cybercore::services::{JobTriggered, SnapshotStore};
use cybercore::{
    Edge, EdgeId, EventBus, ExecutionEvent, FlowError, GraphStore, NodeId, NodePatch, NodeSpec,
    NodeType, Result, Role, Value, WorkflowId, WorkflowResult, WorkflowRun, WorkflowSnapshot,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Caller-facing orchestrator: one graph, its executors and its run history.
///
/// Every mutation goes through the permission gate inside [`GraphStore`].
/// A run holds the graph's write lock from validation until the run is
/// sealed, so edits issued during a run apply to the next one.
pub struct FlowRuntime {
    graph: Arc<RwLock<GraphStore>>,
    registry: Arc<NodeRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    recorder: Arc<RunRecorder>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Runtime over an empty graph with an in-memory run log.
    pub fn new(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(config.max_parallel_nodes));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            graph: Arc::new(RwLock::new(GraphStore::new("Untitled workflow"))),
            registry: Arc::new(registry),
            executor,
            event_bus,
            recorder: Arc::new(RunRecorder::new(Arc::new(MemoryRunLog::new()))),
            snapshots: None,
            config,
        }
    }

    /// Runtime wired to the file-backed stores named in `config`.
    ///
    /// Previously recorded runs are restored and a saved graph, if any, is
    /// loaded.
    pub async fn from_config(registry: NodeRegistry, config: RuntimeConfig) -> Result<Self> {
        let mut runtime = Self::new(registry, config.clone());

        if let Some(path) = &config.run_log_path {
            let recorder = RunRecorder::restore(Arc::new(JsonlRunLog::new(path))).await?;
            runtime = runtime.with_recorder(recorder);
        }
        if let Some(path) = &config.snapshot_path {
            runtime = runtime.with_snapshot_store(Arc::new(FileSnapshotStore::new(path)));
            if runtime.load().await? {
                tracing::info!("Loaded workflow from {}", path.display());
            }
        }
        Ok(runtime)
    }

    pub fn with_graph(self, graph: GraphStore) -> Self {
        Self {
            graph: Arc::new(RwLock::new(graph)),
            ..self
        }
    }

    pub fn with_recorder(self, recorder: RunRecorder) -> Self {
        Self {
            recorder: Arc::new(recorder),
            ..self
        }
    }

    /// Save the graph to `store` after every successful mutation.
    pub fn with_snapshot_store(self, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            snapshots: Some(store),
            ..self
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub async fn workflow_id(&self) -> WorkflowId {
        self.graph.read().await.id()
    }

    pub async fn nodes(&self) -> Vec<NodeSpec> {
        self.graph.read().await.nodes().to_vec()
    }

    pub async fn node(&self, id: NodeId) -> Option<NodeSpec> {
        self.graph.read().await.node(id).cloned()
    }

    pub async fn edges(&self) -> Vec<Edge> {
        self.graph.read().await.edges().to_vec()
    }

    pub async fn create_node(&self, role: Role, node_type: NodeType, overrides: &Value) -> Result<NodeSpec> {
        let mut graph = self.graph.write().await;
        let node = graph.create_node(role, node_type, overrides)?;
        self.persist(&graph).await;
        Ok(node)
    }

    pub async fn update_node(&self, role: Role, id: NodeId, patch: NodePatch) -> Result<NodeSpec> {
        let mut graph = self.graph.write().await;
        let node = graph.update_node(role, id, patch)?;
        self.persist(&graph).await;
        Ok(node)
    }

    /// Returns whether the node existed.
    pub async fn delete_node(&self, role: Role, id: NodeId) -> Result<bool> {
        let mut graph = self.graph.write().await;
        let removed = graph.delete_node(role, id)?;
        if removed {
            self.persist(&graph).await;
        }
        Ok(removed)
    }

    pub async fn create_edge(&self, role: Role, source: NodeId, target: NodeId) -> Result<Edge> {
        let mut graph = self.graph.write().await;
        let edge = graph.create_edge(role, source, target)?;
        self.persist(&graph).await;
        Ok(edge)
    }

    pub async fn connect(
        &self,
        role: Role,
        source: NodeId,
        source_port: impl Into<String>,
        target: NodeId,
        target_port: impl Into<String>,
    ) -> Result<Edge> {
        let mut graph = self.graph.write().await;
        let edge = graph.connect(role, source, source_port.into(), target, target_port.into())?;
        self.persist(&graph).await;
        Ok(edge)
    }

    pub async fn delete_edge(&self, role: Role, id: EdgeId) -> Result<bool> {
        let mut graph = self.graph.write().await;
        let removed = graph.delete_edge(role, id)?;
        if removed {
            self.persist(&graph).await;
        }
        Ok(removed)
    }

    /// Run the whole workflow once.
    ///
    /// Node failures come back as `success == false`; only permission and
    /// structural problems are errors. Every run that reaches validation is
    /// recorded, including rejected ones.
    pub async fn execute_workflow(&self, role: Role) -> Result<WorkflowResult> {
        let mut graph = self.graph.write().await;
        let outcome = self
            .executor
            .execute(role, &mut graph, &self.registry, &self.event_bus)
            .await;

        match outcome {
            Ok(completed) => {
                self.record(completed.run).await;
                Ok(completed.result)
            }
            Err(FlowError::Workflow(e)) => {
                tracing::warn!("Run of workflow {} rejected: {}", graph.id(), e);
                self.record(rejected_run(&graph, &e)).await;
                Err(FlowError::Workflow(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Every recorded run, oldest first.
    pub async fn run_analytics(&self) -> Vec<WorkflowRun> {
        self.recorder.runs().await
    }

    pub async fn analytics_summary(&self) -> AnalyticsSummary {
        self.recorder.summary().await
    }

    pub async fn export(&self) -> WorkflowSnapshot {
        self.graph.read().await.export()
    }

    pub async fn import(&self, role: Role, snapshot: WorkflowSnapshot) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.import(role, snapshot)?;
        self.persist(&graph).await;
        Ok(())
    }

    /// Write the current graph to the snapshot store.
    pub async fn save(&self) -> Result<()> {
        let store = self
            .snapshots
            .as_ref()
            .ok_or_else(|| FlowError::Storage("no snapshot store configured".to_string()))?;
        let snapshot = self.graph.read().await.export();
        store.save(&snapshot).await
    }

    /// Replace the graph with the stored snapshot. Returns `false` when the
    /// store is empty.
    pub async fn load(&self) -> Result<bool> {
        let Some(store) = &self.snapshots else {
            return Ok(false);
        };
        let Some(snapshot) = store.load().await? else {
            return Ok(false);
        };
        let loaded = GraphStore::from_snapshot(snapshot)?;
        *self.graph.write().await = loaded;
        Ok(true)
    }

    /// Start a run for every scheduler trigger that belongs to this workflow.
    pub fn spawn_trigger_listener(
        self: &Arc<Self>,
        mut triggers: broadcast::Receiver<JobTriggered>,
    ) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match triggers.recv().await {
                    Ok(trigger) => {
                        let workflow_id = runtime.workflow_id().await;
                        if trigger.workflow_id != Some(workflow_id) {
                            tracing::debug!("Ignoring trigger of job {} for another workflow", trigger.job_id);
                            continue;
                        }

                        tracing::info!("Job {} triggered a run of workflow {}", trigger.job_id, workflow_id);
                        match runtime.execute_workflow(runtime.config.scheduled_run_role).await {
                            Ok(result) => tracing::info!("Scheduled run {}: {}", result.run_id, result.message),
                            Err(e) => tracing::warn!("Scheduled run failed to start: {}", e),
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Trigger listener missed {} triggers", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn record(&self, run: WorkflowRun) {
        if let Err(e) = self.recorder.record(run).await {
            tracing::warn!("Failed to record run: {}", e);
        }
    }

    async fn persist(&self, graph: &GraphStore) {
        if let Some(store) = &self.snapshots {
            if let Err(e) = store.save(&graph.export()).await {
                tracing::warn!("Failed to save workflow snapshot: {}", e);
            }
        }
    }
}
