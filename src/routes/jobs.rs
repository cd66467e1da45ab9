use actix_web::web;
use actix_web::HttpResponse;
use serde_json::json;
use sqlx::PgPool;

use super::error_500;
use crate::queue;
use crate::queue::Queue;
use crate::store;

/// `GET /test/jobs/status`: queue depths and outbox counts, for test
/// harnesses and manual poking. Not part of the stable contract.
pub async fn jobs_status(pool: web::Data<PgPool>) -> Result<HttpResponse, actix_web::Error> {
    let payments = queue::depth(pool.get_ref(), Queue::Payments)
        .await
        .map_err(error_500)?;
    let webhooks = queue::depth(pool.get_ref(), Queue::Webhooks)
        .await
        .map_err(error_500)?;
    let events = store::event_counts(pool.get_ref())
        .await
        .map_err(error_500)?;

    Ok(HttpResponse::Ok().json(json!({
        "queues": {
            "payments": payments,
            "webhooks": webhooks,
        },
        "webhook_events": events,
    })))
}
