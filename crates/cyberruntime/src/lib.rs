//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: DAG validation, the
//! executor registry, join-based parallel execution, run analytics, the job
//! scheduler and persistence backends, tied together by [`FlowRuntime`].

mod analytics;
mod config;
mod executor;
mod persistence;
mod registry;
mod runtime;
pub mod scheduler;
pub mod validator;

pub use analytics::{summarize, AnalyticsSummary, RunRecorder};
pub use config::{ChatSettings, RuntimeConfig, SandboxSettings};
pub use executor::{rejected_run, CompletedRun, WorkflowExecutor};
pub use persistence::{FileSnapshotStore, JsonlRunLog, MemoryRunLog, MemorySnapshotStore};
pub use registry::NodeRegistry;
pub use runtime::FlowRuntime;
pub use scheduler::{CronScheduler, ScheduleExpr};
pub use validator::{validate, TopoOrder};
