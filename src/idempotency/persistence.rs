use actix_web::http::header::ContentType;
use actix_web::HttpResponse;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::IdempotencyKey;
use crate::queue::PgTransaction;

/// Outcome of claiming an idempotency key.
///
/// The claim is an `INSERT ... ON CONFLICT DO NOTHING` inside a fresh
/// transaction, which is the synchronization point for replicas as well as
/// in-process concurrency: a second request with the same key blocks on the
/// conflicting insert until the first commits, then reads the recorded
/// response. Exactly one request per key ever gets `StartProcessing`.
pub enum NextAction {
    /// The key is ours; the handler must do all of its work on this
    /// transaction and finish with [`save_response`].
    StartProcessing(PgTransaction),
    /// The key was used before and its response was recorded; replay it.
    ReturnSavedResponse(HttpResponse),
    /// The key was used before but there is nothing to replay (the record
    /// expired). The caller decides how to recover.
    Unreplayable,
}

#[tracing::instrument(skip(pool, ttl), fields(idempotency_key = %key.as_ref()))]
pub async fn try_claim(
    pool: &PgPool,
    key: &IdempotencyKey,
    ttl: chrono::Duration,
) -> Result<NextAction, anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO idempotency_keys (idempotency_key, created_at, expires_at)
        VALUES ($1, now(), $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(key.as_ref())
    .bind(Utc::now() + ttl)
    .execute(&mut *transaction)
    .await?
    .rows_affected()
        > 0;

    if inserted {
        return Ok(NextAction::StartProcessing(transaction));
    }
    // dropping `transaction` rolls the (empty) claim back
    match get_saved_response(pool, key).await? {
        Some(response) => Ok(NextAction::ReturnSavedResponse(response)),
        None => Ok(NextAction::Unreplayable),
    }
}

/// Record the response body on the claim row and commit the request's
/// transaction. This is the last thing a handler does: committing here makes
/// the state change, the outbox rows, the enqueued jobs, and the replayable
/// response visible as one unit.
pub async fn save_response(
    mut transaction: PgTransaction,
    key: &IdempotencyKey,
    payment_id: Option<Uuid>,
    status: u16,
    body: &str,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        UPDATE idempotency_keys
        SET payment_id = $2, response_status = $3, response_body = $4
        WHERE idempotency_key = $1
        "#,
    )
    .bind(key.as_ref())
    .bind(payment_id)
    .bind(status as i16)
    .bind(body)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(())
}

/// A recorded, unexpired response, replayed verbatim. Replays are served
/// with 200 regardless of the original status: the work already happened.
async fn get_saved_response(
    pool: &PgPool,
    key: &IdempotencyKey,
) -> Result<Option<HttpResponse>, anyhow::Error> {
    let saved = sqlx::query(
        r#"
        SELECT response_body
        FROM idempotency_keys
        WHERE idempotency_key = $1
          AND response_body IS NOT NULL
          AND expires_at > now()
        "#,
    )
    .bind(key.as_ref())
    .fetch_optional(pool)
    .await?;

    match saved {
        None => Ok(None),
        Some(row) => {
            let body: String = row.try_get("response_body")?;
            Ok(Some(
                HttpResponse::Ok()
                    .content_type(ContentType::json())
                    .body(body),
            ))
        }
    }
}
