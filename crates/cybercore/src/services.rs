//! Interfaces of the collaborators the orchestrator talks to.
//!
//! Concrete implementations live in `cybernodes` and `cyberruntime`; tests
//! substitute their own.

use crate::config::{SandboxOptions, ScheduleType};
use crate::error::SandboxLimit;
use crate::run::WorkflowRun;
use crate::workflow::{WorkflowId, WorkflowSnapshot};
use crate::{NodeError, Result, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Language model

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the assistant's reply text.
    async fn generate(&self, request: ChatRequest) -> std::result::Result<String, NodeError>;
}

// ---------------------------------------------------------------------------
// Integration client

#[derive(Debug, Clone, PartialEq)]
pub struct HttpCall {
    pub endpoint: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// The request never produced a response.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait IntegrationClient: Send + Sync {
    async fn call(&self, call: HttpCall) -> std::result::Result<HttpResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// Sandbox

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxErrorKind {
    Timeout,
    MemoryExceeded,
    RuntimeError,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?}: {detail}")]
pub struct SandboxError {
    pub kind: SandboxErrorKind,
    pub detail: String,
}

impl SandboxError {
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: SandboxErrorKind::Timeout,
            detail: detail.into(),
        }
    }

    pub fn memory(detail: impl Into<String>) -> Self {
        Self {
            kind: SandboxErrorKind::MemoryExceeded,
            detail: detail.into(),
        }
    }

    pub fn runtime(detail: impl Into<String>) -> Self {
        Self {
            kind: SandboxErrorKind::RuntimeError,
            detail: detail.into(),
        }
    }
}

impl From<SandboxError> for NodeError {
    fn from(err: SandboxError) -> Self {
        match err.kind {
            SandboxErrorKind::Timeout => NodeError::SandboxLimitExceeded {
                limit: SandboxLimit::Timeout,
                detail: err.detail,
            },
            SandboxErrorKind::MemoryExceeded => NodeError::SandboxLimitExceeded {
                limit: SandboxLimit::Memory,
                detail: err.detail,
            },
            SandboxErrorKind::RuntimeError => {
                NodeError::ExecutionFailed(format!("script error: {}", err.detail))
            }
        }
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `script` with `input` bound as `input`; return its return value.
    async fn run(
        &self,
        script: &str,
        input: Value,
        limits: &SandboxOptions,
    ) -> std::result::Result<Value, SandboxError>;
}

// ---------------------------------------------------------------------------
// Scheduler

pub type JobId = String;

/// What to schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    /// Workflow whose run a trigger should start.
    pub workflow_id: Option<WorkflowId>,
    pub schedule_type: ScheduleType,
    pub expression: String,
    pub timezone: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job fired; whoever owns the workflow should start a new run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTriggered {
    pub job_id: JobId,
    pub workflow_id: Option<WorkflowId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid {schedule_type} expression '{expression}': {reason}")]
    InvalidExpression {
        schedule_type: ScheduleType,
        expression: String,
        reason: String,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule_job(&self, spec: JobSpec) -> std::result::Result<Job, SchedulerError>;

    async fn update_job(&self, id: &str, spec: JobSpec) -> std::result::Result<Job, SchedulerError>;

    async fn get_job(&self, id: &str) -> Option<Job>;

    /// Stream of fired jobs.
    fn subscribe(&self) -> broadcast::Receiver<JobTriggered>;
}

// ---------------------------------------------------------------------------
// Persistence

/// Opaque storage for the workflow graph.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &WorkflowSnapshot) -> Result<()>;

    async fn load(&self) -> Result<Option<WorkflowSnapshot>>;
}

/// Append-only storage for sealed runs.
#[async_trait]
pub trait RunLog: Send + Sync {
    async fn append(&self, run: &WorkflowRun) -> Result<()>;

    async fn load(&self) -> Result<Vec<WorkflowRun>>;
}
