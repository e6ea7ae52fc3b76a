use cybercore::{FlowError, Result, Role};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of nodes to execute in parallel
    pub max_parallel_nodes: usize,
    /// Event bus buffer size
    pub event_buffer_size: usize,
    /// Role used for runs started by scheduler triggers.
    pub scheduled_run_role: Role,
    pub snapshot_path: Option<PathBuf>,
    pub run_log_path: Option<PathBuf>,
    pub sandbox: SandboxSettings,
    pub http_timeout_ms: u64,
    pub chat: ChatSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            scheduled_run_role: Role::Editor,
            snapshot_path: None,
            run_log_path: None,
            sandbox: SandboxSettings::default(),
            http_timeout_ms: 30_000,
            chat: ChatSettings::default(),
        }
    }
}

/// Interpreter limits applied on top of each task's own options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Script call stack; exceeding it counts as a memory breach.
    pub max_stack_kb: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self { max_stack_kb: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// OpenAI-compatible API root.
    pub base_url: String,
    /// Environment variable holding the API key. Without a key the offline
    /// model is used.
    pub api_key_env: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl ChatSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl RuntimeConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns; unknown variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => result.push_str(&rest[start..start + 3 + end]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}
