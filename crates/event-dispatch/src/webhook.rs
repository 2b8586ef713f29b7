//! HTTP webhook delivery.
//!
//! Each attempt is one POST:
//!
//! ```text
//! POST <url>
//! Content-Type: application/json
//! Idempotency-Key: <event id>
//! X-Outbox-Event-Id: <event id>
//! X-Outbox-Event-Type: <event type>
//! X-Outbox-Destination: <destination>
//! X-Outbox-Attempt: <attempt>
//! Authorization: Bearer <token>        (when configured)
//!
//! {"eventId":"…","eventType":"…","payload":{…},"timestamp":"…"}
//! ```
//!
//! [`WebhookFormat::Compact`] sends only `{"eventType":"…","payload":{…}}`,
//! for chat relays and other sinks that want the bare message. The payload
//! is embedded as raw JSON when it parses, otherwise as a string.
//!
//! | Outcome | Classification |
//! |---|---|
//! | 2xx | success |
//! | 5xx, 408, 429 | retryable |
//! | connect error, timeout | retryable |
//! | any other status | fatal |

use crate::{Delivery, EventHandler, HandlerError, HandlerResult};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::value::RawValue;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest slice of a response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Request body shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WebhookFormat {
    /// `{eventId, eventType, payload, timestamp}`
    #[default]
    Envelope,
    /// `{eventType, payload}`
    Compact,
}

/// Webhook endpoint configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    pub bearer_token: Option<String>,
    pub format: WebhookFormat,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            bearer_token: None,
            format: WebhookFormat::Envelope,
        }
    }

    pub fn with_format(mut self, format: WebhookFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum BodyPayload {
    Json(Box<RawValue>),
    Text(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<&'a str>,
    event_type: &'a str,
    payload: BodyPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// Delivers events to one HTTP endpoint.
pub struct WebhookHandler {
    config: WebhookConfig,
    client: Client,
}

impl WebhookHandler {
    pub fn new(config: WebhookConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }
}

#[async_trait]
impl EventHandler for WebhookHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerResult {
        let payload = match RawValue::from_string(delivery.payload.clone()) {
            Ok(raw) => BodyPayload::Json(raw),
            Err(_) => BodyPayload::Text(delivery.payload.clone()),
        };
        let body = match self.config.format {
            WebhookFormat::Envelope => WebhookBody {
                event_id: Some(&delivery.event_id),
                event_type: &delivery.event_type,
                payload,
                timestamp: Some(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            },
            WebhookFormat::Compact => WebhookBody {
                event_id: None,
                event_type: &delivery.event_type,
                payload,
                timestamp: None,
            },
        };

        debug!(
            url = %self.config.url,
            event_id = %delivery.event_id,
            destination = %delivery.destination,
            attempt = delivery.attempt,
            "Posting webhook"
        );

        let mut request = self
            .client
            .post(&self.config.url)
            .header("Idempotency-Key", &delivery.event_id)
            .header("X-Outbox-Event-Id", &delivery.event_id)
            .header("X-Outbox-Event-Type", &delivery.event_type)
            .header("X-Outbox-Destination", &delivery.destination)
            .header("X-Outbox-Attempt", delivery.attempt.to_string())
            .json(&body);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status, &body);
        warn!(
            url = %self.config.url,
            event_id = %delivery.event_id,
            status = status.as_u16(),
            retryable = error.is_retryable(),
            "Webhook rejected delivery"
        );
        Err(error)
    }
}

/// Map a non-2xx response to a handler error.
pub fn classify_status(status: StatusCode, body: &str) -> HandlerError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate(body.trim(), MAX_ERROR_BODY))
    };

    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;

    if retryable {
        HandlerError::Retryable(message)
    } else {
        HandlerError::Fatal(message)
    }
}

fn classify_transport_error(e: reqwest::Error) -> HandlerError {
    if e.is_timeout() {
        HandlerError::retryable("request timeout")
    } else if e.is_builder() {
        HandlerError::fatal(format!("invalid webhook request: {}", e))
    } else {
        HandlerError::retryable(format!("request failed: {}", e))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
