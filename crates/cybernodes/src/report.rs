use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cybercore::services::{HttpCall, IntegrationClient};
use cybercore::{
    NodeConfig, NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeSpec, NodeType,
    PortDefinition, ReportConfig, ReportFormat, Value,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    File,
    Email,
    Webhook,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Ok,
    /// Accepted by a stand-in that does not really deliver.
    Simulated,
    Error,
}

/// What happened to one destination of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub destination: Destination,
    pub target: Option<String>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DestinationOutcome {
    fn delivered(destination: Destination, target: &str, status: DeliveryStatus) -> Self {
        Self {
            destination,
            target: Some(target.to_string()),
            status,
            error: None,
        }
    }

    fn failed(destination: Destination, target: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            destination,
            target: target.map(str::to_string),
            status: DeliveryStatus::Error,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<DeliveryStatus, NodeError>;
}

/// Logs the mail instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<DeliveryStatus, NodeError> {
        tracing::info!("Mail to {} ({}): {} bytes", to, subject, body.len());
        Ok(DeliveryStatus::Simulated)
    }
}

#[async_trait]
pub trait Dashboard: Send + Sync {
    async fn publish(&self, section: &str, content: &str) -> Result<DeliveryStatus, NodeError>;
}

/// Dashboard sections kept in memory, newest entry last.
#[derive(Default)]
pub struct InMemoryDashboard {
    sections: RwLock<BTreeMap<String, Vec<String>>>,
}

impl InMemoryDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn section(&self, name: &str) -> Vec<String> {
        self.sections
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Dashboard for InMemoryDashboard {
    async fn publish(&self, section: &str, content: &str) -> Result<DeliveryStatus, NodeError> {
        self.sections
            .write()
            .await
            .entry(section.to_string())
            .or_default()
            .push(content.to_string());
        Ok(DeliveryStatus::Ok)
    }
}

/// Renders the inputs and fans the report out to every enabled destination.
///
/// Destinations are delivered concurrently and independently; a failed
/// destination shows up in the result but never fails the node.
pub struct ReportExecutor {
    integration: Arc<dyn IntegrationClient>,
    mailer: Arc<dyn Mailer>,
    dashboard: Arc<dyn Dashboard>,
}

impl ReportExecutor {
    pub fn new(
        integration: Arc<dyn IntegrationClient>,
        mailer: Arc<dyn Mailer>,
        dashboard: Arc<dyn Dashboard>,
    ) -> Self {
        Self {
            integration,
            mailer,
            dashboard,
        }
    }

    fn deliveries<'a>(
        &'a self,
        node: &'a NodeSpec,
        config: &'a ReportConfig,
        report: &'a str,
        timestamp: DateTime<Utc>,
    ) -> Vec<BoxFuture<'a, DestinationOutcome>> {
        let mut deliveries: Vec<BoxFuture<'a, DestinationOutcome>> = Vec::new();

        if config.dest_file {
            deliveries.push(
                async move {
                    let Some(path) = non_empty(&config.file_path) else {
                        return DestinationOutcome::failed(Destination::File, None, "no file path configured");
                    };
                    match tokio::fs::write(path, report).await {
                        Ok(()) => DestinationOutcome::delivered(Destination::File, path, DeliveryStatus::Ok),
                        Err(e) => DestinationOutcome::failed(Destination::File, Some(path), e.to_string()),
                    }
                }
                .boxed(),
            );
        }

        if config.dest_email {
            deliveries.push(
                async move {
                    let Some(to) = non_empty(&config.email) else {
                        return DestinationOutcome::failed(Destination::Email, None, "no email address configured");
                    };
                    let subject = format!("Report: {}", node.name);
                    match self.mailer.send(to, &subject, report).await {
                        Ok(status) => DestinationOutcome::delivered(Destination::Email, to, status),
                        Err(e) => DestinationOutcome::failed(Destination::Email, Some(to), e.to_string()),
                    }
                }
                .boxed(),
            );
        }

        if config.dest_webhook {
            deliveries.push(
                async move {
                    let Some(url) = non_empty(&config.webhook_url) else {
                        return DestinationOutcome::failed(Destination::Webhook, None, "no webhook URL configured");
                    };
                    let call = HttpCall {
                        endpoint: url.to_string(),
                        method: "POST".to_string(),
                        headers: BTreeMap::from([(
                            "Content-Type".to_string(),
                            "application/json".to_string(),
                        )]),
                        body: Some(json!({
                            "report": report,
                            "node": node.name,
                            "timestamp": timestamp,
                        })),
                    };
                    match self.integration.call(call).await {
                        Ok(response) if response.is_success() => {
                            DestinationOutcome::delivered(Destination::Webhook, url, DeliveryStatus::Ok)
                        }
                        Ok(response) => DestinationOutcome::failed(
                            Destination::Webhook,
                            Some(url),
                            format!("webhook returned {}", response.status_code),
                        ),
                        Err(e) => DestinationOutcome::failed(Destination::Webhook, Some(url), e.0),
                    }
                }
                .boxed(),
            );
        }

        if config.dest_dashboard {
            deliveries.push(
                async move {
                    let Some(section) = non_empty(&config.dashboard_section) else {
                        return DestinationOutcome::failed(Destination::Dashboard, None, "no dashboard section configured");
                    };
                    match self.dashboard.publish(section, report).await {
                        Ok(status) => DestinationOutcome::delivered(Destination::Dashboard, section, status),
                        Err(e) => DestinationOutcome::failed(Destination::Dashboard, Some(section), e.to_string()),
                    }
                }
                .boxed(),
            );
        }

        deliveries
    }
}

#[async_trait]
impl NodeExecutor for ReportExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Report
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<Value, NodeError> {
        let NodeConfig::Report(config) = &node.config else {
            return Err(NodeError::Configuration(format!(
                "expected report config, got {}",
                node.node_type()
            )));
        };

        let data = ctx.combined_input().unwrap_or(Value::Null);
        let report = render(&data, config.format);
        let timestamp = Utc::now();

        let outcomes = join_all(self.deliveries(node, config, &report, timestamp)).await;
        for outcome in outcomes.iter().filter(|o| o.status == DeliveryStatus::Error) {
            tracing::warn!(
                "Report '{}' not delivered to {:?} {:?}: {}",
                node.name,
                outcome.destination,
                outcome.target,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            ctx.events.warn(format!("{:?} delivery failed", outcome.destination));
        }

        Ok(json!({
            "success": true,
            "format": config.format,
            "destinations": outcomes,
            "timestamp": timestamp,
            "report": report,
        }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Render inputs and deliver them to file, email, webhook or dashboard".to_string(),
            category: "output".to_string(),
            inputs: vec![PortDefinition::new("input", "Data to report", false)],
            outputs: vec![PortDefinition::new("output", "Rendered report and delivery outcomes", true)],
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Render `data` in the requested format.
pub fn render(data: &Value, format: ReportFormat) -> String {
    match format {
        ReportFormat::Json => pretty(data),
        ReportFormat::Markdown => format!("# Report\n\n{}", pretty(data)),
        ReportFormat::Text => match data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        ReportFormat::Csv => render_csv(data),
    }
}

fn pretty(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

fn render_csv(data: &Value) -> String {
    match data {
        Value::Array(rows) => {
            let header: Vec<String> = match rows.first() {
                Some(Value::Object(first)) => first.keys().cloned().collect(),
                _ => Vec::new(),
            };
            if header.is_empty() {
                return rows.iter().map(csv_cell).collect::<Vec<_>>().join("\n");
            }

            let mut lines = vec![header.iter().map(|h| quote(h)).collect::<Vec<_>>().join(",")];
            for row in rows {
                let cells: Vec<String> = header
                    .iter()
                    .map(|key| row.get(key).map(csv_cell).unwrap_or_default())
                    .collect();
                lines.push(cells.join(","));
            }
            lines.join("\n")
        }
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("{},{}", quote(key), csv_cell(value)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => csv_cell(other),
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
