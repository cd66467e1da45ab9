use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::ExecutionOutcome;
use super::RetrySchedule;
use crate::configuration::Settings;
use crate::queue;
use crate::queue::JobKind;
use crate::queue::Queue;
use crate::startup::get_worker_pool;
use crate::store;
use crate::store::AttemptOutcome;
use crate::webhook_client::WebhookClient;

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Claim one `deliver_webhook` job and attempt the delivery.
///
/// On a scheduled retry the job is not acked but pushed into the future on
/// the queue, mirroring the `next_retry` written to the outbox row; the row
/// stays authoritative and the poller re-enqueues if this cue is ever lost.
pub async fn try_deliver_job(
    pool: &PgPool,
    client: &WebhookClient,
    schedule: &RetrySchedule,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((transaction, job)) = queue::dequeue(pool, Queue::Webhooks).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };

    if job.kind != JobKind::DeliverWebhook {
        tracing::warn!(job_id = %job.id, kind = ?job.kind, "non-delivery job on the webhooks queue");
        queue::ack(transaction, Queue::Webhooks, &job).await?;
        return Ok(ExecutionOutcome::TaskCompleted);
    }

    match deliver_event(pool, client, schedule, job.id).await? {
        None => queue::ack(transaction, Queue::Webhooks, &job).await?,
        Some(retry_at) => {
            queue::requeue_delayed(transaction, Queue::Webhooks, &job, retry_at).await?
        }
    }
    Ok(ExecutionOutcome::TaskCompleted)
}

/// One dispatch attempt. Returns the time of the next attempt if one was
/// scheduled, `None` when the event reached a terminal state (or vanished).
#[tracing::instrument(skip(pool, client, schedule))]
async fn deliver_event(
    pool: &PgPool,
    client: &WebhookClient,
    schedule: &RetrySchedule,
    event_id: Uuid,
) -> Result<Option<DateTime<Utc>>, anyhow::Error> {
    let Some(event) = store::get_event(pool, event_id).await? else {
        tracing::warn!("event no longer exists; dropping job");
        return Ok(None);
    };
    if event.status.is_terminal() {
        // redelivered job for an already-settled event
        return Ok(None);
    }

    let Some(subscription) = store::get_subscription(pool, event.webhook_id).await? else {
        store::record_attempt(
            pool,
            event.id,
            AttemptOutcome::Exhausted {
                attempt: event.retry_count,
                error: "subscription no longer exists",
            },
        )
        .await?;
        return Ok(None);
    };
    if !subscription.active {
        store::record_attempt(
            pool,
            event.id,
            AttemptOutcome::Exhausted {
                attempt: event.retry_count,
                error: "subscription is inactive",
            },
        )
        .await?;
        return Ok(None);
    }

    // serialize exactly once; these are the bytes that get signed and sent
    let body = serde_json::to_string(&event.payload)?;

    match client
        .deliver(&subscription.url, &event.event_type, &subscription.secret, &body)
        .await
    {
        Ok(()) => {
            store::record_attempt(pool, event.id, AttemptOutcome::Delivered).await?;
            tracing::info!(event_type = %event.event_type, "webhook delivered");
            Ok(None)
        }
        Err(e) => {
            let attempt = event.retry_count + 1;
            let error = e.to_string();
            if attempt >= event.max_retries {
                tracing::warn!(%error, attempt, "delivery failed; retries exhausted");
                store::record_attempt(
                    pool,
                    event.id,
                    AttemptOutcome::Exhausted {
                        attempt,
                        error: &error,
                    },
                )
                .await?;
                Ok(None)
            } else {
                let next_retry =
                    Utc::now() + chrono::Duration::from_std(schedule.next_delay(attempt))?;
                tracing::warn!(%error, attempt, %next_retry, "delivery failed; retry scheduled");
                store::record_attempt(
                    pool,
                    event.id,
                    AttemptOutcome::Retry {
                        attempt,
                        next_retry,
                        error: &error,
                    },
                )
                .await?;
                Ok(Some(next_retry))
            }
        }
    }
}

async fn worker_loop(
    pool: PgPool,
    client: std::sync::Arc<WebhookClient>,
    schedule: RetrySchedule,
) -> Result<(), anyhow::Error> {
    loop {
        match try_deliver_job(&pool, &client, &schedule).await {
            Ok(ExecutionOutcome::TaskCompleted) => {}
            Ok(ExecutionOutcome::EmptyQueue) => {
                tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
            }
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "webhook worker pass failed"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

/// Spawn the dispatcher pool; resolves only if a worker dies.
pub async fn init_webhook_workers(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_worker_pool(&cfg.database);
    let client = std::sync::Arc::new(WebhookClient::new(cfg.webhook.timeout()));
    let schedule = RetrySchedule::new(cfg.webhook.test_retry_intervals);
    let mut workers = JoinSet::new();
    for _ in 0..cfg.webhook.workers.max(1) {
        workers.spawn(worker_loop(pool.clone(), client.clone(), schedule));
    }
    while let Some(joined) = workers.join_next().await {
        joined??;
    }
    Ok(())
}
