use async_trait::async_trait;
use cybercore::services::{ChatMessage, ChatRequest, LanguageModel};
use cybercore::{
    NodeConfig, NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeSpec, NodeType,
    PortDefinition, Value,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Sends the upstream input to a language model and returns its reply.
pub struct ChatExecutor {
    model: Arc<dyn LanguageModel>,
}

impl ChatExecutor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl NodeExecutor for ChatExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Chat
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError> {
        let NodeConfig::Chat(config) = &node.config else {
            return Err(NodeError::Configuration(format!(
                "expected chat config, got {}",
                node.node_type()
            )));
        };

        let content = match ctx.combined_input() {
            None => "Hello".to_string(),
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
        };

        ctx.events.info(format!("Asking {}", config.model));
        let reply = self
            .model
            .generate(ChatRequest {
                model: config.model.clone(),
                system_prompt: config.system_prompt.clone(),
                messages: vec![ChatMessage::user(content)],
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            })
            .await?;

        Ok(Value::String(reply))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Generate a reply with a language model".to_string(),
            category: "ai".to_string(),
            inputs: vec![PortDefinition::new("input", "Prompt text", false)],
            outputs: vec![PortDefinition::new("output", "Model reply", true)],
        }
    }
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl OpenAiChatModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn generate(&self, request: ChatRequest) -> Result<String, NodeError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system_prompt }));
        }
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content })),
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": request.model,
                "messages": messages,
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }))
            .send()
            .await
            .map_err(|e| NodeError::Transport(format!("model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NodeError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("unexpected model response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| NodeError::ExecutionFailed("model returned no choices".to_string()))
    }
}

/// Deterministic stand-in used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineModel;

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn generate(&self, request: ChatRequest) -> Result<String, NodeError> {
        let Some(last) = request.messages.iter().rev().find(|m| m.role == "user") else {
            return Ok("There is no message to reply to.".to_string());
        };
        let lower = last.content.to_lowercase();
        let has_word = |word: &str| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| w == word)
        };

        let reply = if has_word("hello") || has_word("hi") {
            "Hello! What should this workflow do today?".to_string()
        } else if has_word("help") {
            "Connect me to other nodes to summarise, answer or rewrite text.".to_string()
        } else {
            format!("[{}] {}", request.model, last.content)
        };
        Ok(reply)
    }
}
