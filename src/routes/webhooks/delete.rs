use actix_web::web;
use actix_web::HttpResponse;
use anyhow::Context;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::WebhookError;
use crate::store;

/// `DELETE /webhooks/{id}`: removes the subscription and, via the cascade,
/// its event history.
#[tracing::instrument(name = "Deleting a webhook subscription", skip(pool))]
pub async fn delete_webhook(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, WebhookError> {
    let id = path.into_inner();
    let deleted = store::delete_subscription(&pool, id)
        .await
        .context("failed to delete webhook subscription")?;
    if !deleted {
        return Err(WebhookError::NotFound);
    }
    Ok(HttpResponse::Ok().json(json!({ "id": id, "deleted": true })))
}
