//! File and in-memory backends for graph snapshots and the run log.

use async_trait::async_trait;
use cybercore::services::{RunLog, SnapshotStore};
use cybercore::{FlowError, Result, WorkflowRun, WorkflowSnapshot};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Snapshot stored as pretty JSON in a single file.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        // Write next to the target, then rename over it.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Saved snapshot of '{}' to {}", snapshot.name, self.path.display());
        Ok(())
    }

    async fn load(&self) -> Result<Option<WorkflowSnapshot>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<WorkflowSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<WorkflowSnapshot>> {
        Ok(self.snapshot.lock().await.clone())
    }
}

/// One JSON document per line, appended per run.
pub struct JsonlRunLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RunLog for JsonlRunLog {
    async fn append(&self, run: &WorkflowRun) -> Result<()> {
        let mut line = serde_json::to_string(run)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<WorkflowRun>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|e| {
                    FlowError::Storage(format!(
                        "{} line {}: {}",
                        self.path.display(),
                        idx + 1,
                        e
                    ))
                })
            })
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryRunLog {
    runs: Mutex<Vec<WorkflowRun>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn append(&self, run: &WorkflowRun) -> Result<()> {
        self.runs.lock().await.push(run.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<WorkflowRun>> {
        Ok(self.runs.lock().await.clone())
    }
}
