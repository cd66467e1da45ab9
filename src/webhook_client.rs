use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;

use crate::signer;

/// HTTP client for outbound webhook deliveries. One instance is shared by
/// the whole dispatcher pool so connections to receivers are reused.
pub struct WebhookClient {
    http_client: Client,
}

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    /// Receiver answered, but not with a 2xx
    #[error("receiver answered {0}")]
    Status(reqwest::StatusCode),
    /// Timeout, connection refused, DNS failure, ...
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build the webhook HTTP client");
        Self { http_client }
    }

    /// Sign and POST one event payload.
    ///
    /// `body` must be the exact serialized payload: it is signed as-is and
    /// sent as-is, so the receiver can verify the signature against the raw
    /// bytes it reads off the wire.
    #[tracing::instrument(skip_all, fields(url = %url, event_type = %event_type))]
    pub async fn deliver(
        &self,
        url: &str,
        event_type: &str,
        secret: &Secret<String>,
        body: &str,
    ) -> Result<(), DeliveryError> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let signature = signer::sign(secret.expose_secret(), timestamp_ms, body);

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", event_type)
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Timestamp", timestamp_ms.to_string())
            .body(body.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status()));
        }
        Ok(())
    }
}
