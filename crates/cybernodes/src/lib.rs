//! Standard executor library
//!
//! One executor per node type, plus the concrete collaborators they talk to.

mod chat;
mod integration;
mod pinned;
mod report;
mod sandbox;
mod scheduler;
mod task;

pub use chat::{ChatExecutor, OfflineModel, OpenAiChatModel};
pub use integration::{build_call, HttpIntegrationClient, IntegrationExecutor};
pub use pinned::PinnedInputExecutor;
pub use report::{
    render, Dashboard, DeliveryStatus, Destination, DestinationOutcome, InMemoryDashboard,
    LogMailer, Mailer, ReportExecutor,
};
pub use sandbox::QuickJsSandbox;
pub use scheduler::SchedulerTriggerExecutor;
pub use task::TaskExecutor;

use cybercore::services::{IntegrationClient, LanguageModel, Sandbox, Scheduler};
use cyberruntime::{NodeRegistry, RuntimeConfig};
use std::sync::Arc;
use std::time::Duration;

/// Services the executors depend on, injected at registration.
#[derive(Clone)]
pub struct Collaborators {
    pub language_model: Arc<dyn LanguageModel>,
    pub integration: Arc<dyn IntegrationClient>,
    pub scheduler: Arc<dyn Scheduler>,
    pub sandbox: Arc<dyn Sandbox>,
    pub mailer: Arc<dyn Mailer>,
    pub dashboard: Arc<dyn Dashboard>,
}

impl Collaborators {
    /// Production collaborators configured from `config`.
    ///
    /// Falls back to the offline model when no API key is set.
    pub fn from_config(config: &RuntimeConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let timeout = Duration::from_millis(config.http_timeout_ms);

        let integration = match HttpIntegrationClient::with_timeout(timeout) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("{}; using default HTTP client", e);
                HttpIntegrationClient::new()
            }
        };

        let language_model: Arc<dyn LanguageModel> = match config.chat.api_key() {
            Some(key) => match OpenAiChatModel::new(&config.chat.base_url, key, timeout) {
                Ok(model) => Arc::new(model),
                Err(e) => {
                    tracing::warn!("Chat model unavailable ({}), using offline model", e);
                    Arc::new(OfflineModel)
                }
            },
            None => {
                tracing::info!(
                    "{} not set, chat nodes use the offline model",
                    config.chat.api_key_env
                );
                Arc::new(OfflineModel)
            }
        };

        Self {
            language_model,
            integration: Arc::new(integration),
            scheduler,
            sandbox: Arc::new(QuickJsSandbox::new(config.sandbox.max_stack_kb.saturating_mul(1024))),
            mailer: Arc::new(LogMailer),
            dashboard: Arc::new(InMemoryDashboard::new()),
        }
    }
}

/// Register all standard executors with a registry
pub fn register_all(registry: &mut NodeRegistry, collaborators: &Collaborators) {
    registry.register(Arc::new(ChatExecutor::new(collaborators.language_model.clone())));
    registry.register(Arc::new(IntegrationExecutor::new(collaborators.integration.clone())));
    registry.register(Arc::new(SchedulerTriggerExecutor::new(collaborators.scheduler.clone())));
    registry.register(Arc::new(TaskExecutor::new(collaborators.sandbox.clone())));
    registry.register(Arc::new(ReportExecutor::new(
        collaborators.integration.clone(),
        collaborators.mailer.clone(),
        collaborators.dashboard.clone(),
    )));
    registry.register(Arc::new(PinnedInputExecutor));
}
