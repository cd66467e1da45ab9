use actix_web::web;
use actix_web::HttpResponse;
use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use super::WebhookError;
use super::WebhookResponse;
use crate::store;

/// `GET /webhooks`: all subscriptions, secrets omitted.
#[tracing::instrument(name = "Listing webhook subscriptions", skip_all)]
pub async fn list_webhooks(pool: web::Data<PgPool>) -> Result<HttpResponse, WebhookError> {
    let subscriptions = store::list_subscriptions(&pool)
        .await
        .context("failed to list webhook subscriptions")?;
    let body: Vec<WebhookResponse> = subscriptions.iter().map(WebhookResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// `GET /webhooks/{id}`
#[tracing::instrument(name = "Fetching a webhook subscription", skip(pool))]
pub async fn get_webhook(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, WebhookError> {
    let subscription = store::get_subscription(&pool, path.into_inner())
        .await
        .context("failed to fetch webhook subscription")?
        .ok_or(WebhookError::NotFound)?;
    Ok(HttpResponse::Ok().json(WebhookResponse::from(&subscription)))
}
