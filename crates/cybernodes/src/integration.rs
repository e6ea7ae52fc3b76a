use async_trait::async_trait;
use cybercore::services::{HttpCall, HttpResponse, IntegrationClient, TransportError};
use cybercore::{
    IntegrationConfig, IntegrationKind, NodeConfig, NodeContext, NodeError, NodeExecutor,
    NodeMetadata, NodeSpec, NodeType, PortDefinition, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// reqwest-backed [`IntegrationClient`].
pub struct HttpIntegrationClient {
    client: reqwest::Client,
}

impl HttpIntegrationClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Default for HttpIntegrationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntegrationClient for HttpIntegrationClient {
    async fn call(&self, call: HttpCall) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(call.method.to_uppercase().as_bytes())
            .map_err(|_| TransportError(format!("Unsupported method: {}", call.method)))?;

        let mut request = self.client.request(method, &call.endpoint);
        for (key, value) in &call.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError(format!("HTTP request failed: {}", e)))?;

        let status_code = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError(format!("Failed to read response: {}", e)))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(HttpResponse { status_code, body })
    }
}

/// Calls a REST, webhook or GraphQL endpoint described by the node config.
pub struct IntegrationExecutor {
    client: Arc<dyn IntegrationClient>,
}

impl IntegrationExecutor {
    pub fn new(client: Arc<dyn IntegrationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeExecutor for IntegrationExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Integration
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError> {
        let NodeConfig::Integration(config) = &node.config else {
            return Err(NodeError::Configuration(format!(
                "expected integration config, got {}",
                node.node_type()
            )));
        };
        if config.endpoint.trim().is_empty() {
            return Err(NodeError::Configuration("No endpoint configured".to_string()));
        }

        let call = build_call(config, &ctx);
        ctx.events.info(format!("{} {}", call.method, call.endpoint));

        let response = self
            .client
            .call(call)
            .await
            .map_err(|e| NodeError::Transport(e.0))?;

        ctx.events.info(format!("Response status: {}", response.status_code));

        if !response.is_success() {
            return Err(NodeError::Upstream {
                status: response.status_code,
                message: upstream_message(&response),
            });
        }

        Ok(json!({ "success": true, "data": response.body }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Call an external REST, webhook or GraphQL API".to_string(),
            category: "integration".to_string(),
            inputs: vec![PortDefinition::new("input", "Request body", false)],
            outputs: vec![PortDefinition::new("output", "Response data", true)],
        }
    }
}

/// Translate the node config and upstream inputs into a request.
pub fn build_call(config: &IntegrationConfig, ctx: &NodeContext) -> HttpCall {
    let method = if config.method.trim().is_empty() {
        "POST".to_string()
    } else {
        config.method.trim().to_uppercase()
    };

    let mut headers = config.headers.clone();
    if !config.api_key.is_empty() {
        headers.insert("Authorization".to_string(), format!("Bearer {}", config.api_key));
    }
    if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let body = match (method.as_str(), config.integration_type) {
        ("GET", _) => None,
        (_, IntegrationKind::Graphql) => Some(json!({
            "query": config.query.clone().unwrap_or_default(),
            "variables": config.variables.clone().unwrap_or_else(|| json!({})),
        })),
        _ => Some(ctx.combined_input().unwrap_or(Value::Null)),
    };

    HttpCall {
        endpoint: config.endpoint.trim().to_string(),
        method,
        headers,
        body,
    }
}

/// `error` field of the body, else the body text, else the status.
fn upstream_message(response: &HttpResponse) -> String {
    match &response.body {
        Value::Object(map) => match map.get("error") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => response.body.to_string(),
        },
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Null => format!("HTTP {}", response.status_code),
        other => other.to_string(),
    }
}
