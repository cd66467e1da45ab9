use actix_web::web;
use actix_web::HttpResponse;
use anyhow::Context;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::parse_events;
use super::validate_url;
use super::WebhookError;
use super::WebhookResponse;
use crate::store;
use crate::store::SubscriptionChanges;

#[derive(Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
}

/// `PATCH /webhooks/{id}`: partial update; omitted fields are untouched.
/// Deactivating a subscription fails its still-pending events on their next
/// dispatch attempt.
#[tracing::instrument(name = "Updating a webhook subscription", skip(request, pool))]
pub async fn update_webhook(
    path: web::Path<Uuid>,
    request: web::Json<UpdateWebhookRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, WebhookError> {
    let request = request.into_inner();
    if let Some(url) = &request.url {
        validate_url(url).map_err(WebhookError::Validation)?;
    }
    let events = request
        .events
        .as_deref()
        .map(parse_events)
        .transpose()
        .map_err(WebhookError::Validation)?;

    let changes = SubscriptionChanges {
        url: request.url,
        events,
        active: request.active,
    };
    let subscription = store::update_subscription(&pool, path.into_inner(), &changes)
        .await
        .context("failed to update webhook subscription")?
        .ok_or(WebhookError::NotFound)?;
    Ok(HttpResponse::Ok().json(WebhookResponse::from(&subscription)))
}
