use std::time::Duration;

use sqlx::PgPool;

use crate::configuration::Settings;
use crate::queue;
use crate::queue::JobKind;
use crate::queue::Queue;
use crate::startup::get_worker_pool;
use crate::store;

/// Transient claim errors (deadlock, connection blip) get this many
/// immediate retries before waiting for the next tick.
const CLAIM_ATTEMPTS: u32 = 3;
const CLAIM_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Claim due outbox rows and turn each into a `deliver_webhook` job.
///
/// The claim and the enqueues share a transaction: a row is either still
/// claimable or its job is visible, never neither. Enqueueing is a no-op for
/// events whose job is still queued, so the poller can safely overlap with
/// the delayed-requeue cue written by the dispatcher.
#[tracing::instrument(skip(pool))]
pub async fn poll_once(pool: &PgPool, batch: i64) -> Result<usize, anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let due = store::claim_due(&mut transaction, batch).await?;
    for event in &due {
        queue::enqueue(
            &mut transaction,
            Queue::Webhooks,
            JobKind::DeliverWebhook,
            event.id,
        )
        .await?;
    }
    transaction.commit().await?;
    Ok(due.len())
}

/// Periodic outbox sweep; the authoritative retry schedule lives on the
/// event rows, the queue is only woken up by this loop.
pub async fn init_outbox_poller(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_worker_pool(&cfg.database);
    let interval = cfg.poller.interval();
    loop {
        for attempt in 1..=CLAIM_ATTEMPTS {
            match poll_once(&pool, cfg.poller.batch).await {
                Ok(0) => break,
                Ok(n) => {
                    tracing::info!("enqueued {n} due webhook events");
                    break;
                }
                Err(e) if attempt < CLAIM_ATTEMPTS => {
                    tracing::warn!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        "outbox sweep failed; retrying"
                    );
                    tokio::time::sleep(CLAIM_RETRY_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        "outbox sweep failed; waiting for the next tick"
                    );
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}
