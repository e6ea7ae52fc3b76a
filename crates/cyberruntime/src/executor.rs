use crate::registry::NodeRegistry;
use crate::validator;
use chrono::Utc;
use cybercore::permission::{self, Operation};
use cybercore::{
    EventBus, ExecutionEvent, FlowError, GraphStore, NodeContext, NodeError, NodeExecutor,
    NodeId, NodeRunState, NodeStat, NodeStatus, Role, RunId, Value, WorkflowError,
    WorkflowResult, WorkflowRun,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Executes workflows as DAGs with parallel execution
pub struct WorkflowExecutor {
    max_parallel: usize,
}

/// A run that got past validation.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub result: WorkflowResult,
    pub run: WorkflowRun,
}

impl WorkflowExecutor {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute the workflow held in `store`.
    ///
    /// Permission and structural problems are returned as errors before any
    /// node leaves `idle`. Node failures are not errors here: they end up in
    /// the node's run state, the run's statistics and `success == false`.
    pub async fn execute(
        &self,
        role: Role,
        store: &mut GraphStore,
        registry: &NodeRegistry,
        event_bus: &EventBus,
    ) -> Result<CompletedRun, FlowError> {
        permission::require(role, Operation::Execute)?;

        let topo = validator::validate(store.nodes(), store.edges())?;
        let mut executors: HashMap<NodeId, Arc<dyn NodeExecutor>> = HashMap::new();
        for node in store.nodes() {
            executors.insert(node.id, registry.executor_for(node)?);
        }

        let run_id = RunId::new_v4();
        let workflow_id = store.id();
        let start_time = Instant::now();
        let run = WorkflowRun::start(run_id, workflow_id);

        store.reset_run_states();

        event_bus.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow_id,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Starting run {} of workflow {} ({} nodes)",
            run_id,
            workflow_id,
            topo.len()
        );

        // Join bookkeeping: a node launches once every incoming edge has
        // delivered a result.
        let mut remaining: HashMap<NodeId, usize> = store
            .nodes()
            .iter()
            .map(|n| (n.id, store.incoming(n.id).count()))
            .collect();
        let mut pending: HashMap<NodeId, BTreeMap<String, Value>> = HashMap::new();
        let mut ready: VecDeque<NodeId> = topo.start_nodes().iter().copied().collect();
        let mut launched: HashSet<NodeId> = HashSet::new();
        let mut durations: HashMap<NodeId, u64> = HashMap::new();
        let mut node_results: BTreeMap<NodeId, Value> = BTreeMap::new();
        let mut failures: Vec<(NodeId, String)> = Vec::new();
        let mut running = FuturesUnordered::new();

        loop {
            // Spawn tasks for ready nodes up to parallel limit
            while running.len() < self.max_parallel {
                let Some(node_id) = ready.pop_front() else {
                    break;
                };
                if !launched.insert(node_id) {
                    continue;
                }
                let (Some(node), Some(executor)) =
                    (store.node(node_id).cloned(), executors.get(&node_id).cloned())
                else {
                    continue;
                };

                let inputs = pending.remove(&node_id).unwrap_or_default();
                let ctx = NodeContext::new(
                    workflow_id,
                    run_id,
                    node_id,
                    event_bus.create_emitter(run_id, node_id),
                )
                .with_inputs(inputs);

                store.set_run_state(node_id, NodeRunState::running());
                event_bus.emit(ExecutionEvent::NodeStarted {
                    run_id,
                    node_id,
                    node_type: node.node_type(),
                    timestamp: Utc::now(),
                });
                tracing::debug!("Launching {} node '{}' ({})", node.node_type(), node.name, node_id);

                let task = async move {
                    let start = Instant::now();
                    let result = executor.execute(&node, ctx).await;
                    (result, start.elapsed().as_millis() as u64)
                };
                let handle = tokio::spawn(task);
                running.push(async move { (node_id, handle.await) });
            }

            // Wait for next task to complete
            let Some((node_id, joined)) = running.next().await else {
                break;
            };

            let (exec_result, duration_ms) = match joined {
                Ok(outcome) => outcome,
                Err(e) => (
                    Err(NodeError::ExecutionFailed(format!("executor task failed: {}", e))),
                    0,
                ),
            };
            durations.insert(node_id, duration_ms);

            match exec_result {
                Ok(value) => {
                    tracing::info!("Node {} completed in {}ms", node_id, duration_ms);

                    event_bus.emit(ExecutionEvent::NodeCompleted {
                        run_id,
                        node_id,
                        result: value.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    store.set_run_state(node_id, NodeRunState::succeeded(value.clone()));

                    let outgoing: Vec<_> = store.outgoing(node_id).cloned().collect();
                    for edge in outgoing {
                        pending
                            .entry(edge.target)
                            .or_default()
                            .insert(edge.source_port, value.clone());
                        if let Some(count) = remaining.get_mut(&edge.target) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                ready.push_back(edge.target);
                            }
                        }
                    }
                    node_results.insert(node_id, value);
                }
                Err(e) => {
                    tracing::error!("Node {} failed: {}", node_id, e);

                    event_bus.emit(ExecutionEvent::NodeFailed {
                        run_id,
                        node_id,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    store.set_run_state(node_id, NodeRunState::failed(e.to_string()));
                    failures.push((node_id, e.to_string()));
                }
            }
        }

        let mut skipped = 0;
        for node in store.nodes() {
            if node.run_state.status == NodeStatus::Idle {
                skipped += 1;
                event_bus.emit(ExecutionEvent::NodeSkipped {
                    run_id,
                    node_id: node.id,
                    timestamp: Utc::now(),
                });
            }
        }

        let success = failures.is_empty();
        let message = if success {
            "Workflow executed successfully".to_string()
        } else {
            failure_message(store, &failures, skipped)
        };

        let stats: Vec<NodeStat> = store
            .nodes()
            .iter()
            .map(|n| NodeStat::from_node(n, durations.get(&n.id).copied()))
            .collect();
        let run = run.seal(stats, (!success).then(|| message.clone()));

        let duration_ms = start_time.elapsed().as_millis() as u64;
        event_bus.emit(ExecutionEvent::RunCompleted {
            run_id,
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Run {} finished in {}ms: {} succeeded, {} failed, {} skipped",
            run_id,
            duration_ms,
            node_results.len(),
            failures.len(),
            skipped
        );

        Ok(CompletedRun {
            result: WorkflowResult {
                run_id,
                success,
                message,
                node_results,
            },
            run,
        })
    }
}

/// Analytics entry for a run that was refused before any node ran.
pub fn rejected_run(store: &GraphStore, error: &WorkflowError) -> WorkflowRun {
    let stats = store
        .nodes()
        .iter()
        .map(|n| NodeStat {
            node_id: n.id,
            node_name: n.name.clone(),
            node_type: n.node_type(),
            status: NodeStatus::Idle,
            error: None,
            duration_ms: None,
        })
        .collect();
    WorkflowRun::start(RunId::new_v4(), store.id()).seal(stats, Some(error.to_string()))
}

fn failure_message(store: &GraphStore, failures: &[(NodeId, String)], skipped: usize) -> String {
    let details: Vec<String> = failures
        .iter()
        .map(|(id, error)| {
            let name = store.node(*id).map(|n| n.name.as_str()).unwrap_or("?");
            format!("node '{}' failed: {}", name, error)
        })
        .collect();
    let mut message = format!("Workflow execution failed: {}", details.join("; "));
    if skipped > 0 {
        message.push_str(&format!(" ({} node(s) skipped)", skipped));
    }
    message
}
