// crates/cyberruntime/tests/executor_test.rs

use async_trait::async_trait;
use cybercore::{
    ExecutionEvent, FlowError, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeId,
    NodeSpec, NodeStatus, NodeType, Role, RunStatus, Value, WorkflowError,
};
use cyberruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns the pinned value.
struct PinnedFake;

#[async_trait]
impl NodeExecutor for PinnedFake {
    fn node_type(&self) -> NodeType {
        NodeType::PinnedInput
    }

    async fn execute(&self, node: &NodeSpec, _ctx: NodeContext) -> Result<Value, NodeError> {
        match &node.config {
            NodeConfig::PinnedInput(config) => Ok(config.value.clone()),
            _ => Err(NodeError::Configuration("not a pinned input".into())),
        }
    }
}

/// Echoes its inputs keyed by port.
struct TaskFake;

#[async_trait]
impl NodeExecutor for TaskFake {
    fn node_type(&self) -> NodeType {
        NodeType::Task
    }

    async fn execute(&self, _node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(ctx.inputs_object())
    }
}

/// Always fails like an unreachable endpoint.
struct IntegrationFake;

#[async_trait]
impl NodeExecutor for IntegrationFake {
    fn node_type(&self) -> NodeType {
        NodeType::Integration
    }

    async fn execute(&self, _node: &NodeSpec, _ctx: NodeContext) -> Result<Value, NodeError> {
        Err(NodeError::Transport("connection refused".into()))
    }
}

struct PanickingChat;

#[async_trait]
impl NodeExecutor for PanickingChat {
    fn node_type(&self) -> NodeType {
        NodeType::Chat
    }

    async fn execute(&self, _node: &NodeSpec, _ctx: NodeContext) -> Result<Value, NodeError> {
        panic!("model client blew up");
    }
}

/// Tracks how many reports run at the same time.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl NodeExecutor for ConcurrencyGauge {
    fn node_type(&self) -> NodeType {
        NodeType::Report
    }

    async fn execute(&self, _node: &NodeSpec, _ctx: NodeContext) -> Result<Value, NodeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "rendered": true }))
    }
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(PinnedFake));
    registry.register(Arc::new(TaskFake));
    registry.register(Arc::new(IntegrationFake));
    registry.register(Arc::new(PanickingChat));
    registry.register(Arc::new(ConcurrencyGauge::default()));
    registry
}

fn runtime() -> FlowRuntime {
    FlowRuntime::new(registry(), RuntimeConfig::default())
}

async fn pinned(runtime: &FlowRuntime, value: Value) -> NodeId {
    runtime
        .create_node(Role::Editor, NodeType::PinnedInput, &json!({ "value": value }))
        .await
        .unwrap()
        .id
}

async fn node_of(runtime: &FlowRuntime, node_type: NodeType) -> NodeId {
    runtime
        .create_node(Role::Editor, node_type, &Value::Null)
        .await
        .unwrap()
        .id
}

async fn status(runtime: &FlowRuntime, id: NodeId) -> NodeStatus {
    runtime.node(id).await.unwrap().run_state.status
}

#[tokio::test]
async fn fan_in_node_receives_every_upstream_result() {
    let runtime = runtime();
    let a = pinned(&runtime, json!("left")).await;
    let b = pinned(&runtime, json!("right")).await;
    let join = node_of(&runtime, NodeType::Task).await;
    runtime.create_edge(Role::Editor, a, join).await.unwrap();
    runtime.create_edge(Role::Editor, b, join).await.unwrap();

    let result = runtime.execute_workflow(Role::Editor).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "Workflow executed successfully");
    assert_eq!(
        result.node_results[&join],
        json!({ (a.to_string()): "left", (b.to_string()): "right" })
    );
    assert_eq!(status(&runtime, join).await, NodeStatus::Success);
}

#[tokio::test]
async fn explicit_ports_key_the_inputs() {
    let runtime = runtime();
    let a = pinned(&runtime, json!(1)).await;
    let b = node_of(&runtime, NodeType::Task).await;
    runtime.connect(Role::Editor, a, "A", b, "input").await.unwrap();

    let result = runtime.execute_workflow(Role::Editor).await.unwrap();

    assert_eq!(result.node_results[&b], json!({ "A": 1 }));
}

#[tokio::test]
async fn fan_in_on_a_shared_port_name_is_refused() {
    let runtime = runtime();
    let a = pinned(&runtime, json!(1)).await;
    let b = pinned(&runtime, json!(2)).await;
    let task = node_of(&runtime, NodeType::Task).await;
    runtime.connect(Role::Editor, a, "output", task, "input").await.unwrap();

    let err = runtime
        .connect(Role::Editor, b, "output", task, "input")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::InvalidConnection(_))
    ));

    runtime.connect(Role::Editor, b, "second", task, "input").await.unwrap();
    let result = runtime.execute_workflow(Role::Editor).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.node_results[&task], json!({ "output": 1, "second": 2 }));
}

#[tokio::test]
async fn every_node_starts_exactly_once() {
    let runtime = runtime();
    let root = pinned(&runtime, json!("x")).await;
    let left = node_of(&runtime, NodeType::Task).await;
    let right = node_of(&runtime, NodeType::Task).await;
    let sink = node_of(&runtime, NodeType::Task).await;
    for (s, t) in [(root, left), (root, right), (left, sink), (right, sink)] {
        runtime.create_edge(Role::Editor, s, t).await.unwrap();
    }
    let mut events = runtime.subscribe_events();

    let result = runtime.execute_workflow(Role::Editor).await.unwrap();
    assert!(result.success);

    let mut starts: HashMap<NodeId, usize> = HashMap::new();
    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeStarted { node_id, .. } = event {
            *starts.entry(node_id).or_default() += 1;
            order.push(node_id);
        }
    }

    assert_eq!(starts.len(), 4);
    assert!(starts.values().all(|count| *count == 1));
    assert_eq!(order.first(), Some(&root));
    assert_eq!(order.last(), Some(&sink));
}

#[tokio::test]
async fn failure_blocks_only_its_dependants() {
    let runtime = runtime();
    let failing = node_of(&runtime, NodeType::Integration).await;
    let blocked = node_of(&runtime, NodeType::Task).await;
    let sibling = pinned(&runtime, json!("ok")).await;
    let sibling_child = node_of(&runtime, NodeType::Task).await;
    runtime.create_edge(Role::Editor, failing, blocked).await.unwrap();
    runtime.create_edge(Role::Editor, sibling, sibling_child).await.unwrap();
    let mut events = runtime.subscribe_events();

    let result = runtime.execute_workflow(Role::Editor).await.unwrap();

    assert!(!result.success);
    assert!(result.message.contains("connection refused"), "{}", result.message);
    assert_eq!(status(&runtime, failing).await, NodeStatus::Error);
    assert_eq!(status(&runtime, blocked).await, NodeStatus::Idle);
    assert_eq!(status(&runtime, sibling_child).await, NodeStatus::Success);
    assert!(result.node_results.contains_key(&sibling_child));
    assert!(!result.node_results.contains_key(&failing));

    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeSkipped { node_id, .. } = event {
            skipped.push(node_id);
        }
    }
    assert_eq!(skipped, vec![blocked]);

    let runs = runtime.run_analytics().await;
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.stat(failing).unwrap().status, NodeStatus::Error);
    assert_eq!(run.stat(blocked).unwrap().status, NodeStatus::Idle);
    assert!((run.error_rate - 0.25).abs() < f64::EPSILON);
}

#[tokio::test]
async fn panicking_executor_is_a_node_error() {
    let runtime = runtime();
    let chat = node_of(&runtime, NodeType::Chat).await;
    let other = pinned(&runtime, json!(7)).await;

    let result = runtime.execute_workflow(Role::Admin).await.unwrap();

    assert!(!result.success);
    assert_eq!(status(&runtime, chat).await, NodeStatus::Error);
    assert_eq!(result.node_results[&other], json!(7));
}

#[tokio::test]
async fn cyclic_graph_runs_nothing() {
    let runtime = runtime();
    let start = pinned(&runtime, json!(0)).await;
    let a = node_of(&runtime, NodeType::Task).await;
    let b = node_of(&runtime, NodeType::Task).await;
    runtime.create_edge(Role::Editor, start, a).await.unwrap();
    runtime.create_edge(Role::Editor, a, b).await.unwrap();
    runtime.create_edge(Role::Editor, b, a).await.unwrap();
    let mut events = runtime.subscribe_events();

    let err = runtime.execute_workflow(Role::Editor).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::CyclicDependency { .. })
    ));
    assert!(events.try_recv().is_err());
    for node in runtime.nodes().await {
        assert_eq!(node.run_state.status, NodeStatus::Idle);
    }

    let runs = runtime.run_analytics().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Error);
    assert!(runs[0].node_stats.iter().all(|s| s.status == NodeStatus::Idle));
}

#[tokio::test]
async fn empty_graph_has_no_start_nodes() {
    let err = runtime().execute_workflow(Role::Admin).await.unwrap_err();

    assert!(matches!(err, FlowError::Workflow(WorkflowError::NoStartNodes)));
}

#[tokio::test]
async fn viewer_cannot_execute() {
    let runtime = runtime();
    pinned(&runtime, json!("x")).await;

    let err = runtime.execute_workflow(Role::Viewer).await.unwrap_err();

    assert!(err.is_permission_denied());
    assert!(runtime.run_analytics().await.is_empty());
}

#[tokio::test]
async fn missing_executor_is_rejected_before_running() {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(PinnedFake));
    let runtime = FlowRuntime::new(registry, RuntimeConfig::default());
    let a = pinned(&runtime, json!("x")).await;
    let b = node_of(&runtime, NodeType::Task).await;
    runtime.create_edge(Role::Editor, a, b).await.unwrap();

    let err = runtime.execute_workflow(Role::Editor).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::MissingExecutor(NodeType::Task))
    ));
    assert_eq!(status(&runtime, a).await, NodeStatus::Idle);
}

#[tokio::test]
async fn parallelism_is_bounded_by_config() {
    let gauge = Arc::new(ConcurrencyGauge::default());
    let mut registry = NodeRegistry::new();
    registry.register(gauge.clone());
    let config = RuntimeConfig {
        max_parallel_nodes: 1,
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::new(registry, config);
    for _ in 0..3 {
        node_of(&runtime, NodeType::Report).await;
    }

    let result = runtime.execute_workflow(Role::Editor).await.unwrap();

    assert!(result.success);
    assert_eq!(result.node_results.len(), 3);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_nodes_run_concurrently_by_default() {
    let gauge = Arc::new(ConcurrencyGauge::default());
    let mut registry = NodeRegistry::new();
    registry.register(gauge.clone());
    let runtime = FlowRuntime::new(registry, RuntimeConfig::default());
    for _ in 0..3 {
        node_of(&runtime, NodeType::Report).await;
    }

    runtime.execute_workflow(Role::Editor).await.unwrap();

    assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn results_are_reset_between_runs() {
    let runtime = runtime();
    let a = pinned(&runtime, json!("first")).await;

    runtime.execute_workflow(Role::Editor).await.unwrap();
    runtime
        .update_node(
            Role::Editor,
            a,
            cybercore::NodePatch::new().config(json!({ "value": "second" })),
        )
        .await
        .unwrap();
    let second = runtime.execute_workflow(Role::Editor).await.unwrap();

    assert_eq!(second.node_results[&a], json!("second"));
    assert_eq!(runtime.node(a).await.unwrap().run_state.result, Some(json!("second")));
    assert_eq!(runtime.run_analytics().await.len(), 2);
}
