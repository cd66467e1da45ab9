use std::time::Duration;

use rand::Rng;
use serde_json::json;
use sqlx::PgPool;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::ExecutionOutcome;
use crate::configuration::ProcessingSettings;
use crate::configuration::Settings;
use crate::domain::EventType;
use crate::domain::PaymentStatus;
use crate::domain::RefundStatus;
use crate::queue;
use crate::queue::JobKind;
use crate::queue::Queue;
use crate::startup::get_worker_pool;
use crate::store;

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Claim and run one job from the `payments` queue.
///
/// The claim transaction stays open for the duration of the job; an error
/// path drops it un-acked, which hands the job to the next worker
/// (at-least-once). The state mutations below run in their own, separate
/// transactions; redelivery is made safe by their CAS predicates, not by
/// the job lease.
pub async fn try_process_job(
    pool: &PgPool,
    processing: &ProcessingSettings,
    webhook_max_retries: i32,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((transaction, job)) = queue::dequeue(pool, Queue::Payments).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };

    match job.kind {
        JobKind::ProcessPayment => {
            process_payment(pool, processing, webhook_max_retries, job.id).await?
        }
        JobKind::ProcessRefund => process_refund(pool, webhook_max_retries, job.id).await?,
        JobKind::DeliverWebhook => {
            // wrong queue; drop it rather than let it poison the workers
            tracing::warn!(job_id = %job.id, "deliver_webhook job found on the payments queue");
        }
    }

    queue::ack(transaction, Queue::Payments, &job).await?;
    Ok(ExecutionOutcome::TaskCompleted)
}

/// Drive one payment out of `pending`, simulating the card-network leg.
#[tracing::instrument(skip(pool, processing, webhook_max_retries))]
async fn process_payment(
    pool: &PgPool,
    processing: &ProcessingSettings,
    webhook_max_retries: i32,
    payment_id: Uuid,
) -> Result<(), anyhow::Error> {
    let Some(payment) = store::get_payment(pool, payment_id).await? else {
        tracing::warn!("payment no longer exists; dropping job");
        return Ok(());
    };
    if payment.status != PaymentStatus::Pending {
        // redelivered job, or another worker won the race
        return Ok(());
    }

    let succeeded = if processing.test_mode {
        processing.test_payment_success
    } else {
        rand::thread_rng().gen::<f64>() < processing.success_rate
    };

    // simulate processing latency while holding no row locks
    tokio::time::sleep(processing.delay()).await;

    let mut transaction = pool.begin().await?;
    let (next, event_type) = if succeeded {
        (PaymentStatus::Completed, EventType::PaymentCompleted)
    } else {
        (PaymentStatus::Failed, EventType::PaymentFailed)
    };
    let Some(payment) =
        store::mark_payment(&mut transaction, payment_id, PaymentStatus::Pending, next).await?
    else {
        // lost the CAS; whoever won also emitted the event
        return Ok(());
    };

    let payload = if succeeded {
        json!({
            "payment_id": payment.id,
            "amount": payment.amount,
            "customer_email": payment.customer_email,
        })
    } else {
        json!({
            "payment_id": payment.id,
            "amount": payment.amount,
            "reason": "card declined",
        })
    };
    store::insert_events(&mut transaction, event_type, &payload, webhook_max_retries).await?;
    transaction.commit().await?;

    tracing::info!(status = %payment.status, "payment processed");
    Ok(())
}

/// Settle a pending refund. There is no network leg to simulate here: the
/// parent payment already advanced when the refund was created, and payment
/// statuses never move backward, so settling is deterministic.
#[tracing::instrument(skip(pool, webhook_max_retries))]
async fn process_refund(
    pool: &PgPool,
    webhook_max_retries: i32,
    refund_id: Uuid,
) -> Result<(), anyhow::Error> {
    let Some(refund) = store::get_refund(pool, refund_id).await? else {
        tracing::warn!("refund no longer exists; dropping job");
        return Ok(());
    };
    if refund.status != RefundStatus::Pending {
        return Ok(());
    }

    let mut transaction = pool.begin().await?;
    let Some(refund) = store::mark_refund(
        &mut transaction,
        refund_id,
        RefundStatus::Pending,
        RefundStatus::Processed,
    )
    .await?
    else {
        return Ok(());
    };

    let payload = json!({
        "refund_id": refund.id,
        "payment_id": refund.payment_id,
        "amount": refund.amount,
    });
    store::insert_events(
        &mut transaction,
        EventType::RefundProcessed,
        &payload,
        webhook_max_retries,
    )
    .await?;
    transaction.commit().await?;

    tracing::info!("refund processed");
    Ok(())
}

async fn worker_loop(
    pool: PgPool,
    processing: ProcessingSettings,
    webhook_max_retries: i32,
) -> Result<(), anyhow::Error> {
    loop {
        match try_process_job(&pool, &processing, webhook_max_retries).await {
            Ok(ExecutionOutcome::TaskCompleted) => {}
            Ok(ExecutionOutcome::EmptyQueue) => {
                tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
            }
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "payment worker pass failed"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

/// Spawn the payment-processor pool; resolves only if a worker dies.
pub async fn init_payment_workers(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_worker_pool(&cfg.database);
    let mut workers = JoinSet::new();
    for _ in 0..cfg.processing.workers.max(1) {
        workers.spawn(worker_loop(
            pool.clone(),
            cfg.processing.clone(),
            cfg.webhook.max_retries,
        ));
    }
    while let Some(joined) = workers.join_next().await {
        joined??;
    }
    Ok(())
}
