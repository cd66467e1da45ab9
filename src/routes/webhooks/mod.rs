mod delete;
mod events;
mod get;
mod patch;
mod post;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use chrono::DateTime;
use chrono::Utc;
pub use delete::*;
pub use events::*;
pub use get::*;
pub use patch::*;
pub use post::*;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::error_chain_fmt;
use crate::domain::EventType;
use crate::store::WebhookSubscription;

/// Subscription representation for every endpoint except creation: the
/// signing secret is returned exactly once, by POST, and never again.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WebhookSubscription> for WebhookResponse {
    fn from(subscription: &WebhookSubscription) -> Self {
        Self {
            id: subscription.id,
            url: subscription.url.clone(),
            events: subscription.events.clone(),
            active: subscription.active,
            created_at: subscription.created_at,
            updated_at: subscription.updated_at,
        }
    }
}

#[derive(thiserror::Error)]
pub enum WebhookError {
    #[error("{0}")]
    Validation(String),
    #[error("webhook not found")]
    NotFound,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// Parse and deduplicate the requested event types; unknown types are a
/// validation error, not a silent no-op subscription.
pub(crate) fn parse_events(raw: &[String]) -> Result<Vec<EventType>, String> {
    if raw.is_empty() {
        return Err("a webhook must subscribe to at least one event type".to_string());
    }
    let mut events = Vec::with_capacity(raw.len());
    for name in raw {
        let event: EventType = name.parse()?;
        if !events.contains(&event) {
            events.push(event);
        }
    }
    Ok(events)
}

pub(crate) fn validate_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid webhook url: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!(
            "webhook url must be http(s), got scheme {:?}",
            parsed.scheme()
        ));
    }
    Ok(())
}
