use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::WebhookEvent;
use crate::domain::EventStatus;
use crate::domain::EventType;
use crate::queue::PgTransaction;

/// Fan an event out to every active subscription listening for its type: one
/// pending outbox row per subscription, inserted in the transaction that
/// performed the triggering state change. That shared transaction is the
/// outbox guarantee: state never commits without its events, and vice versa.
#[tracing::instrument(skip(tx, payload))]
pub async fn insert_events(
    tx: &mut PgTransaction,
    event_type: EventType,
    payload: &serde_json::Value,
    max_retries: i32,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        INSERT INTO webhook_events (id, webhook_id, event_type, payload, status, max_retries)
        SELECT gen_random_uuid(), w.id, $1, $2, 'pending', $3
        FROM webhooks w
        WHERE w.active AND $1 = ANY(w.events)
        RETURNING id
        "#,
    )
    .bind(event_type.as_str())
    .bind(payload)
    .bind(max_retries)
    .fetch_all(&mut **tx)
    .await?;
    rows.iter().map(|row| row.try_get("id")).collect()
}

/// Due events, oldest schedule first (`next_retry IS NULL` means "eligible
/// now" and sorts ahead). `SKIP LOCKED` keeps concurrent pollers from
/// claiming the same rows.
pub async fn claim_due(
    tx: &mut PgTransaction,
    limit: i64,
) -> Result<Vec<WebhookEvent>, sqlx::Error> {
    sqlx::query_as::<_, WebhookEvent>(
        r#"
        SELECT * FROM webhook_events
        WHERE status = 'pending'
          AND (next_retry IS NULL OR next_retry <= now())
        ORDER BY next_retry ASC NULLS FIRST, created_at ASC
        FOR UPDATE SKIP LOCKED
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
}

pub async fn get_event(pool: &PgPool, id: Uuid) -> Result<Option<WebhookEvent>, sqlx::Error> {
    sqlx::query_as::<_, WebhookEvent>("SELECT * FROM webhook_events WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Result of one dispatch attempt.
pub enum AttemptOutcome<'a> {
    /// Receiver answered 2xx
    Delivered,
    /// Failed with budget left; retry at `next_retry`
    Retry {
        attempt: i32,
        next_retry: DateTime<Utc>,
        error: &'a str,
    },
    /// Failed on the final attempt; the row becomes terminal
    Exhausted { attempt: i32, error: &'a str },
}

/// Record an attempt against a pending row. Every branch is guarded on
/// `status = 'pending'`, so a redelivered job that races an already-recorded
/// outcome becomes a no-op instead of resurrecting a terminal row.
#[tracing::instrument(skip(pool, outcome), fields(event_id = %id))]
pub async fn record_attempt(
    pool: &PgPool,
    id: Uuid,
    outcome: AttemptOutcome<'_>,
) -> Result<(), sqlx::Error> {
    match outcome {
        AttemptOutcome::Delivered => {
            sqlx::query(
                r#"
                UPDATE webhook_events
                SET status = 'completed', next_retry = NULL, updated_at = now()
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(id)
            .execute(pool)
            .await?;
        }
        AttemptOutcome::Retry {
            attempt,
            next_retry,
            error,
        } => {
            sqlx::query(
                r#"
                UPDATE webhook_events
                SET retry_count = $2, next_retry = $3, last_error = $4, updated_at = now()
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(id)
            .bind(attempt)
            .bind(next_retry)
            .bind(error)
            .execute(pool)
            .await?;
        }
        AttemptOutcome::Exhausted { attempt, error } => {
            sqlx::query(
                r#"
                UPDATE webhook_events
                SET status = 'failed', retry_count = $2, next_retry = NULL,
                    last_error = $3, updated_at = now()
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(id)
            .bind(attempt)
            .bind(error)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

/// Event history of one subscription, newest first, optionally filtered by
/// status.
pub async fn list_events(
    pool: &PgPool,
    webhook_id: Uuid,
    status: Option<EventStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<WebhookEvent>, sqlx::Error> {
    sqlx::query_as::<_, WebhookEvent>(
        r#"
        SELECT * FROM webhook_events
        WHERE webhook_id = $1
          AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(webhook_id)
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_events(
    pool: &PgPool,
    webhook_id: Uuid,
    status: Option<EventStatus>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM webhook_events
        WHERE webhook_id = $1
          AND ($2::text IS NULL OR status = $2)
        "#,
    )
    .bind(webhook_id)
    .bind(status.map(|s| s.as_str()))
    .fetch_one(pool)
    .await
}

#[derive(Debug, serde::Serialize)]
pub struct OutboxCounts {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

pub async fn event_counts(pool: &PgPool) -> Result<OutboxCounts, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'pending') AS pending,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed
        FROM webhook_events
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(OutboxCounts {
        pending: row.try_get("pending")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
    })
}
