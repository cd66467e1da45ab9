use actix_web::web;
use actix_web::HttpResponse;
use serde_json::json;
use sqlx::PgPool;

use crate::queue;
use crate::queue::Queue;

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn health_db(pool: web::Data<PgPool>) -> HttpResponse {
    match sqlx::query("SELECT 1").execute(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(json!({ "database": "ok" })),
        Err(e) => {
            tracing::error!(error.message = %e, "database health check failed");
            HttpResponse::ServiceUnavailable().json(json!({ "database": "unavailable" }))
        }
    }
}

/// Probes the job queues (both live in the store, so this mostly guards
/// against a missing or broken jobs table rather than a separate broker).
pub async fn health_queue(pool: web::Data<PgPool>) -> HttpResponse {
    let payments = queue::depth(pool.get_ref(), Queue::Payments).await;
    let webhooks = queue::depth(pool.get_ref(), Queue::Webhooks).await;
    match (payments, webhooks) {
        (Ok(_), Ok(_)) => HttpResponse::Ok().json(json!({ "queue": "ok" })),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error.message = %e, "queue health check failed");
            HttpResponse::ServiceUnavailable().json(json!({ "queue": "unavailable" }))
        }
    }
}
