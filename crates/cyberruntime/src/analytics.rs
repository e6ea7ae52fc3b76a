use cybercore::services::RunLog;
use cybercore::{FlowError, Result, RunId, RunStatus, WorkflowId, WorkflowRun};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only record of sealed runs, mirrored into a [`RunLog`].
pub struct RunRecorder {
    log: Arc<dyn RunLog>,
    runs: RwLock<Vec<WorkflowRun>>,
}

/// Aggregate view over recorded runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub average_error_rate: f64,
    pub average_duration_ms: Option<f64>,
}

impl RunRecorder {
    pub fn new(log: Arc<dyn RunLog>) -> Self {
        Self {
            log,
            runs: RwLock::new(Vec::new()),
        }
    }

    /// Recorder preloaded with every run already in `log`.
    pub async fn restore(log: Arc<dyn RunLog>) -> Result<Self> {
        let mut runs = log.load().await?;
        let mut seen = HashSet::new();
        runs.retain(|run| {
            let fresh = seen.insert(run.id);
            if !fresh {
                tracing::warn!("Ignoring duplicate run {} in run log", run.id);
            }
            fresh
        });
        tracing::info!("Restored {} recorded runs", runs.len());
        Ok(Self {
            log,
            runs: RwLock::new(runs),
        })
    }

    /// Append a sealed run.
    ///
    /// The run is kept in memory even when the log write fails; the error is
    /// still returned so the caller can report it.
    pub async fn record(&self, run: WorkflowRun) -> Result<()> {
        if !run.is_sealed() {
            return Err(FlowError::Storage(format!("run {} is not sealed", run.id)));
        }

        {
            let mut runs = self.runs.write().await;
            if runs.iter().any(|r| r.id == run.id) {
                return Err(FlowError::Storage(format!("run {} already recorded", run.id)));
            }
            runs.push(run.clone());
        }

        tracing::debug!(
            "Recorded run {} ({:?}, error rate {:.2})",
            run.id,
            run.status,
            run.error_rate
        );
        self.log.append(&run).await
    }

    /// All recorded runs, oldest first.
    pub async fn runs(&self) -> Vec<WorkflowRun> {
        self.runs.read().await.clone()
    }

    pub async fn runs_for(&self, workflow_id: WorkflowId) -> Vec<WorkflowRun> {
        self.runs
            .read()
            .await
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub async fn get(&self, run_id: RunId) -> Option<WorkflowRun> {
        self.runs.read().await.iter().find(|r| r.id == run_id).cloned()
    }

    pub async fn summary(&self) -> AnalyticsSummary {
        summarize(&self.runs.read().await)
    }
}

pub fn summarize(runs: &[WorkflowRun]) -> AnalyticsSummary {
    let total_runs = runs.len();
    let successful_runs = runs
        .iter()
        .filter(|r| r.status == RunStatus::Success)
        .count();
    let failed_runs = runs.iter().filter(|r| r.status == RunStatus::Error).count();

    let average_error_rate = if total_runs == 0 {
        0.0
    } else {
        runs.iter().map(|r| r.error_rate).sum::<f64>() / total_runs as f64
    };

    let durations: Vec<i64> = runs.iter().filter_map(|r| r.duration_ms()).collect();
    let average_duration_ms = (!durations.is_empty())
        .then(|| durations.iter().sum::<i64>() as f64 / durations.len() as f64);

    AnalyticsSummary {
        total_runs,
        successful_runs,
        failed_runs,
        average_error_rate,
        average_duration_ms,
    }
}
