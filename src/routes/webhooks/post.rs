use actix_web::http::header::ContentType;
use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use rand::RngCore;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::validate_url;
use super::WebhookError;
use crate::configuration::Settings;
use crate::idempotency::save_response;
use crate::idempotency::try_claim;
use crate::idempotency::NextAction;
use crate::routes::idempotency_key_from;
use crate::store;
use crate::store::NewSubscription;

#[derive(Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
}

/// The one response that carries the signing secret.
#[derive(Serialize)]
struct CreatedWebhookResponse {
    id: Uuid,
    url: String,
    events: Vec<String>,
    active: bool,
    secret: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// 256 bits of entropy, hex-encoded with a recognizable prefix.
fn generate_secret() -> Secret<String> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Secret::new(format!("whsec_{}", hex::encode(bytes)))
}

/// `POST /webhooks`: register a subscription. The returned `secret` is
/// shown here and never again; receivers use it to verify signatures.
#[tracing::instrument(name = "Creating a webhook subscription", skip_all)]
pub async fn create_webhook(
    request: web::Json<CreateWebhookRequest>,
    pool: web::Data<PgPool>,
    cfg: web::Data<Settings>,
    http_request: HttpRequest,
) -> Result<HttpResponse, WebhookError> {
    let key = idempotency_key_from(&http_request).map_err(WebhookError::Validation)?;
    let mut transaction = match try_claim(&pool, &key, cfg.idempotency.ttl())
        .await
        .context("failed to claim the idempotency key")?
    {
        NextAction::ReturnSavedResponse(saved) => return Ok(saved),
        NextAction::StartProcessing(transaction) => transaction,
        NextAction::Unreplayable => {
            return Err(WebhookError::Validation(
                "idempotency key was already used".to_string(),
            ))
        }
    };

    let request = request.into_inner();
    validate_url(&request.url).map_err(WebhookError::Validation)?;
    let events = super::parse_events(&request.events).map_err(WebhookError::Validation)?;

    let new = NewSubscription {
        id: Uuid::new_v4(),
        url: request.url,
        events,
        secret: generate_secret(),
    };
    let subscription = store::insert_subscription(&mut transaction, &new)
        .await
        .context("failed to insert webhook subscription")?;

    let body = serde_json::to_string(&CreatedWebhookResponse {
        id: subscription.id,
        url: subscription.url.clone(),
        events: subscription.events.clone(),
        active: subscription.active,
        secret: subscription.secret.expose_secret().clone(),
        created_at: subscription.created_at,
        updated_at: subscription.updated_at,
    })
    .context("failed to serialize the webhook response")?;
    save_response(transaction, &key, None, 201, &body)
        .await
        .context("failed to record the idempotent response")?;

    Ok(HttpResponse::Created()
        .content_type(ContentType::json())
        .body(body))
}
