//! HTTP adapter for the commerce platform's stock API.

use crate::{AdapterError, AdapterResult, IntegrationAdapter, PushOutcome};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stockrelay_database::Movement;
use tracing::debug;
use url::Url;

/// HTTP adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Base URL for the platform API.
    pub api_url: String,
    /// Bearer token for the platform API, if the deployment uses one.
    pub access_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.tiendanube.com/v1".to_string(),
            access_token: None,
            timeout_secs: 30,
        }
    }
}

/// Request payload for one stock movement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StockMovementRequest {
    movement_id: String,
    movement_type: String,
    sku: String,
    quantity: i64,
    order_id: Option<String>,
    event_type: String,
}

impl StockMovementRequest {
    fn from_movement(movement: &Movement) -> Self {
        Self {
            movement_id: movement.id.clone(),
            movement_type: movement.movement_type.as_str().to_string(),
            sku: movement.sku.clone(),
            quantity: movement.quantity,
            order_id: movement.order_id.clone(),
            event_type: movement.event_type.clone(),
        }
    }
}

/// Error body the platform returns on rejected movements.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Pushes stock movements to the platform over HTTPS with bearer auth.
pub struct HttpIntegrationAdapter {
    config: AdapterConfig,
    client: Client,
}

impl HttpIntegrationAdapter {
    /// Create a new adapter. Validates the base URL and builds the client
    /// with the configured request timeout.
    pub fn new(config: AdapterConfig) -> AdapterResult<Self> {
        Url::parse(&config.api_url)
            .map_err(|e| AdapterError::InvalidUrl(format!("{}: {e}", config.api_url)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn movement_url(&self, movement: &Movement) -> String {
        format!(
            "{}/stores/{}/stock-movements",
            self.config.api_url.trim_end_matches('/'),
            movement.store_id
        )
    }

    async fn send(&self, movement: &Movement) -> Result<reqwest::Response, reqwest::Error> {
        let url = self.movement_url(movement);
        let payload = StockMovementRequest::from_movement(movement);

        debug!(
            url = %url,
            movement_id = %movement.id,
            sku = %movement.sku,
            "Pushing stock movement"
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload);

        if let Some(token) = &self.config.access_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        request.send().await
    }
}

#[async_trait]
impl IntegrationAdapter for HttpIntegrationAdapter {
    fn name(&self) -> &'static str {
        "platform-http"
    }

    async fn push(&self, movement: &Movement) -> PushOutcome {
        let response = match self.send(movement).await {
            Ok(response) => response,
            // Connection refused, DNS failure, request timeout: all
            // worth another attempt later.
            Err(e) => return PushOutcome::Transient(format!("request error: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            return PushOutcome::Success;
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<PlatformError>(&body).ok();
        classify_rejection(status, parsed, &body)
    }
}

/// Map a non-2xx platform response onto the outcome taxonomy.
fn classify_rejection(
    status: StatusCode,
    error: Option<PlatformError>,
    raw_body: &str,
) -> PushOutcome {
    let detail = error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| raw_body.trim().to_string());

    if let Some(code) = error.as_ref().and_then(|e| e.code.as_deref()) {
        if code == "unknown_sku" {
            return PushOutcome::UnmappedSku(detail);
        }
    }

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            PushOutcome::Transient(format!("HTTP {status}: {detail}"))
        }
        s if s.is_client_error() => PushOutcome::Permanent(format!("HTTP {status}: {detail}")),
        s => PushOutcome::Transient(format!("HTTP {s}: {detail}")),
    }
}
