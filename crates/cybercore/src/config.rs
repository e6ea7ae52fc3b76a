//! Type-specific node configuration.
//!
//! Each node type carries its own payload; `NodeConfig` is tagged by the node
//! type so a config can never disagree with the node it belongs to.

use crate::{NodeType, Value, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeConfig {
    Chat(ChatConfig),
    Integration(IntegrationConfig),
    Scheduler(SchedulerConfig),
    Task(TaskConfig),
    Report(ReportConfig),
    PinnedInput(PinnedInputConfig),
}

impl NodeConfig {
    /// Default configuration for a freshly created node.
    pub fn default_for(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Chat => NodeConfig::Chat(ChatConfig::default()),
            NodeType::Integration => NodeConfig::Integration(IntegrationConfig::default()),
            NodeType::Scheduler => NodeConfig::Scheduler(SchedulerConfig::default()),
            NodeType::Task => NodeConfig::Task(TaskConfig::default()),
            NodeType::Report => NodeConfig::Report(ReportConfig::default()),
            NodeType::PinnedInput => NodeConfig::PinnedInput(PinnedInputConfig::default()),
        }
    }

    /// Defaults for `node_type` with `overrides` merged on top.
    pub fn with_overrides(node_type: NodeType, overrides: &Value) -> Result<Self, WorkflowError> {
        Self::default_for(node_type).merge(overrides)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Chat(_) => NodeType::Chat,
            NodeConfig::Integration(_) => NodeType::Integration,
            NodeConfig::Scheduler(_) => NodeType::Scheduler,
            NodeConfig::Task(_) => NodeType::Task,
            NodeConfig::Report(_) => NodeType::Report,
            NodeConfig::PinnedInput(_) => NodeType::PinnedInput,
        }
    }

    /// Shallow merge of a JSON object onto this config.
    ///
    /// Top-level keys in `overrides` replace the current ones. A `type` key is
    /// accepted only if it names the current node type.
    pub fn merge(&self, overrides: &Value) -> Result<Self, WorkflowError> {
        let node_type = self.node_type();
        let patch = match overrides {
            Value::Null => return Ok(self.clone()),
            Value::Object(map) => map,
            _ => {
                return Err(WorkflowError::InvalidConfig(
                    "config overrides must be a JSON object".to_string(),
                ))
            }
        };

        if let Some(tag) = patch.get("type") {
            if tag.as_str() != Some(node_type.as_str()) {
                return Err(WorkflowError::InvalidConfig(format!(
                    "cannot change node type from '{}' to {}",
                    node_type, tag
                )));
            }
        }

        let mut merged = serde_json::to_value(self)
            .map_err(|e| WorkflowError::InvalidConfig(e.to_string()))?;
        if let Value::Object(base) = &mut merged {
            for (key, value) in patch {
                if key != "type" {
                    base.insert(key.clone(), value.clone());
                }
            }
        }

        serde_json::from_value(merged)
            .map_err(|e| WorkflowError::InvalidConfig(format!("{}: {}", node_type, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    Rest,
    Webhook,
    Graphql,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub integration_type: IntegrationKind,
    pub endpoint: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// Injected as `Authorization: Bearer <api_key>` when non-empty.
    pub api_key: String,
    /// GraphQL only.
    pub query: Option<String>,
    pub variables: Option<Value>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            integration_type: IntegrationKind::Webhook,
            endpoint: String::new(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            api_key: String::new(),
            query: None,
            variables: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Cron,
    Interval,
    Onetime,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::Onetime => "onetime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub schedule_type: ScheduleType,
    pub expression: String,
    pub timezone: String,
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_type: ScheduleType::Cron,
            expression: "0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
            enabled: true,
        }
    }
}

/// Resource limits applied to a task script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxOptions {
    pub timeout_ms: u64,
    pub memory_limit_mb: u64,
    pub allowed_imports: Vec<String>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            memory_limit_mb: 128,
            allowed_imports: vec!["lodash".to_string(), "moment".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub script: String,
    pub sandbox_options: SandboxOptions,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            script: "return input;".to_string(),
            sandbox_options: SandboxOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Csv,
    #[serde(alias = "txt")]
    Text,
    Markdown,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Text => "text",
            ReportFormat::Markdown => "markdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub dest_file: bool,
    pub dest_email: bool,
    pub dest_webhook: bool,
    pub dest_dashboard: bool,
    pub file_path: Option<String>,
    pub email: Option<String>,
    pub webhook_url: Option<String>,
    pub dashboard_section: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::Json,
            dest_file: false,
            dest_email: false,
            dest_webhook: false,
            dest_dashboard: true,
            file_path: None,
            email: None,
            webhook_url: None,
            dashboard_section: Some("Main".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinnedInputConfig {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

impl Default for PinnedInputConfig {
    fn default() -> Self {
        Self {
            value: Value::String(String::new()),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_replace_top_level_keys() {
        let config = NodeConfig::with_overrides(
            NodeType::Chat,
            &json!({ "model": "gpt-4o", "max_tokens": 64 }),
        )
        .unwrap();

        let NodeConfig::Chat(chat) = config else {
            panic!("expected chat config");
        };
        assert_eq!(chat.model, "gpt-4o");
        assert_eq!(chat.max_tokens, 64);
        assert_eq!(chat.system_prompt, "You are a helpful assistant.");
    }

    #[test]
    fn partial_sandbox_options_keep_defaults() {
        let config = NodeConfig::with_overrides(
            NodeType::Task,
            &json!({ "sandbox_options": { "timeout_ms": 100 } }),
        )
        .unwrap();

        let NodeConfig::Task(task) = config else {
            panic!("expected task config");
        };
        assert_eq!(task.sandbox_options.timeout_ms, 100);
        assert_eq!(task.sandbox_options.memory_limit_mb, 128);
    }

    #[test]
    fn type_tag_cannot_change() {
        let err = NodeConfig::with_overrides(NodeType::Task, &json!({ "type": "chat" }))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfig(_)));
    }

    #[test]
    fn config_serializes_with_kebab_case_tag() {
        let value = serde_json::to_value(NodeConfig::default_for(NodeType::PinnedInput)).unwrap();
        assert_eq!(value["type"], "pinned-input");
    }

    #[test]
    fn txt_is_accepted_for_text_reports() {
        let config: ReportConfig = serde_json::from_value(json!({ "format": "txt" })).unwrap();
        assert_eq!(config.format, ReportFormat::Text);
    }
}
