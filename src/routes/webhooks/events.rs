use actix_web::web;
use actix_web::HttpResponse;
use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::WebhookError;
use crate::domain::EventStatus;
use crate::store;
use crate::store::WebhookEvent;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Deserialize)]
pub struct EventsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
struct EventResponse {
    id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    retry_count: i32,
    max_retries: i32,
    next_retry: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&WebhookEvent> for EventResponse {
    fn from(event: &WebhookEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            status: event.status.to_string(),
            retry_count: event.retry_count,
            max_retries: event.max_retries,
            next_retry: event.next_retry,
            last_error: event.last_error.clone(),
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

#[derive(Serialize)]
struct EventsPage {
    events: Vec<EventResponse>,
    total: i64,
    limit: i64,
    offset: i64,
}

/// `GET /webhooks/{id}/events`: delivery history of one subscription,
/// newest first, filterable by `status` and paginated with `limit`/`offset`.
#[tracing::instrument(name = "Listing webhook events", skip(query, pool))]
pub async fn list_webhook_events(
    path: web::Path<Uuid>,
    query: web::Query<EventsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, WebhookError> {
    let webhook_id = path.into_inner();
    // 404 before an empty page for a subscription that never existed
    store::get_subscription(&pool, webhook_id)
        .await
        .context("failed to fetch webhook subscription")?
        .ok_or(WebhookError::NotFound)?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<EventStatus>)
        .transpose()
        .map_err(WebhookError::Validation)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let events = store::list_events(&pool, webhook_id, status, limit, offset)
        .await
        .context("failed to list webhook events")?;
    let total = store::count_events(&pool, webhook_id, status)
        .await
        .context("failed to count webhook events")?;

    Ok(HttpResponse::Ok().json(EventsPage {
        events: events.iter().map(EventResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}
