use crate::node::NodeType;
use crate::workflow::{NodeId, RunId, WorkflowId};
use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        node_type: NodeType,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        result: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: RunId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The node never ran because an upstream node failed.
    NodeSkipped {
        run_id: RunId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        run_id: RunId,
        node_id: NodeId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events specific to node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: u8, message: Option<String> },
}

/// Event emitter handed to executors for real-time updates.
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, node_id: NodeId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            run_id,
            node_id,
            sender,
        }
    }

    /// Emit a node-specific event
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            run_id: self.run_id,
            node_id: self.node_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    /// Emit progress update, clamped to 0..=100.
    pub fn progress(&self, percent: u8, message: Option<String>) {
        self.emit(NodeEvent::Progress {
            percent: percent.min(100),
            message,
        });
    }
}

/// Broadcast bus shared by one runtime.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: RunId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(run_id, node_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
