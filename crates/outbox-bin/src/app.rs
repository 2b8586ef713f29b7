//! Wiring: config → store → registry → worker → admin.

use anyhow::Context;
use event_dispatch::{
    DispatchRegistry, IdempotentHandler, Route, WebhookConfig, WebhookFormat, WebhookHandler,
};
use outbox_admin::OutboxAdmin;
use outbox_config_and_utils::{OutboxConfig, Paths, WebhookBodyFormat};
use outbox_database::EventStore;
use outbox_worker::{OutboxWorker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct App {
    pub config: OutboxConfig,
    pub paths: Paths,
}

impl App {
    pub fn new(config: OutboxConfig, paths: Paths) -> Self {
        Self { config, paths }
    }

    pub async fn open_store(&self) -> anyhow::Result<EventStore> {
        let path = self.config.database_file(&self.paths);
        EventStore::open(&path)
            .await
            .with_context(|| format!("failed to open event store at {}", path.display()))
    }

    pub async fn open_worker(&self) -> anyhow::Result<Arc<OutboxWorker>> {
        let store = self.open_store().await?;
        let registry = build_registry(&self.config)?;
        let routes: Vec<String> = registry.routes().iter().map(|r| r.to_string()).collect();
        info!(routes = ?routes, "Dispatch registry ready");
        Ok(Arc::new(OutboxWorker::new(
            store,
            Arc::new(registry),
            WorkerConfig::from(&self.config),
        )))
    }

    pub async fn open_admin(&self) -> anyhow::Result<OutboxAdmin> {
        Ok(OutboxAdmin::for_worker(self.open_worker().await?))
    }
}

/// One idempotency-guarded webhook handler per configured route.
///
/// Duplicate routes are rejected here as well as in config validation, so a
/// hand-built config cannot silently shadow a route.
pub fn build_registry(config: &OutboxConfig) -> anyhow::Result<DispatchRegistry> {
    let mut registry = DispatchRegistry::new();
    for webhook_route in &config.webhooks {
        let url = webhook_route.parsed_url()?;
        let label = webhook_route.label();
        let format = match webhook_route.format {
            WebhookBodyFormat::Envelope => WebhookFormat::Envelope,
            WebhookBodyFormat::Compact => WebhookFormat::Compact,
        };
        let mut webhook = WebhookConfig::new(url.as_str())
            .with_timeout(Duration::from_secs(webhook_route.timeout_secs))
            .with_format(format);
        if let Some(token) = &webhook_route.bearer_token {
            webhook = webhook.with_bearer_token(token.clone());
        }

        let route = Route::new(
            webhook_route.destination.clone(),
            webhook_route.event_type.clone(),
        );
        if registry.contains(&route) {
            anyhow::bail!("webhook route {} is configured more than once", label);
        }

        let handler = WebhookHandler::new(webhook)
            .with_context(|| format!("failed to build webhook client for {}", label))?;
        debug!(route = %label, url = %url, "Registered webhook route");
        registry.register_route(route, IdempotentHandler::new(handler));
    }
    Ok(registry)
}
