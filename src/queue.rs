use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;
use uuid::Uuid;

pub type PgTransaction = Transaction<'static, Postgres>;

/// The two named queues. `payments` carries state-machine work, `webhooks`
/// carries outbound deliveries; they are drained by independent worker pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Payments,
    Webhooks,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::Webhooks => "webhooks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    ProcessPayment,
    ProcessRefund,
    DeliverWebhook,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessPayment => "process_payment",
            Self::ProcessRefund => "process_refund",
            Self::DeliverWebhook => "deliver_webhook",
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process_payment" => Ok(Self::ProcessPayment),
            "process_refund" => Ok(Self::ProcessRefund),
            "deliver_webhook" => Ok(Self::DeliverWebhook),
            other => Err(format!("unknown job kind: {other:?}")),
        }
    }
}

/// A claimed job. `id` is the id of the entity the job acts on (payment,
/// refund, or outbox event), which is what makes enqueues idempotent.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
}

/// Enqueue within the caller's transaction, so a job becomes visible exactly
/// when the state change that warrants it commits. Re-enqueueing an id that
/// is already queued is a no-op.
pub async fn enqueue(
    tx: &mut PgTransaction,
    queue: Queue,
    kind: JobKind,
    job_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (queue, job_id, kind)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(queue.as_str())
    .bind(job_id)
    .bind(kind.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Enqueue a job that only becomes due at `run_after`. This is a secondary
/// cue: the outbox row's `next_retry` is the authoritative schedule, and the
/// poller re-enqueues anything the queue loses.
pub async fn enqueue_delayed(
    tx: &mut PgTransaction,
    queue: Queue,
    kind: JobKind,
    job_id: Uuid,
    run_after: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (queue, job_id, kind, run_after)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(queue.as_str())
    .bind(job_id)
    .bind(kind.as_str())
    .bind(run_after)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Claim the oldest due job. The returned transaction holds the row lock and
/// IS the lease: dropping it without `ack` (worker crash, error path) makes
/// the job visible to other workers again, which gives at-least-once
/// delivery. Consumers must therefore be idempotent at the state-machine
/// level.
pub async fn dequeue(
    pool: &PgPool,
    queue: Queue,
) -> Result<Option<(PgTransaction, Job)>, anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let row = sqlx::query(
        r#"
        SELECT job_id, kind
        FROM jobs
        WHERE queue = $1 AND run_after <= now()
        ORDER BY run_after, enqueued_at
        FOR UPDATE SKIP LOCKED
        LIMIT 1
        "#,
    )
    .bind(queue.as_str())
    .fetch_optional(&mut *transaction)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let id: Uuid = row.try_get("job_id")?;
    let kind: String = row.try_get("kind")?;
    let kind = kind.parse().map_err(anyhow::Error::msg)?;
    Ok(Some((transaction, Job { id, kind })))
}

/// Delete the claimed job and release the lease.
pub async fn ack(
    mut transaction: PgTransaction,
    queue: Queue,
    job: &Job,
) -> Result<(), anyhow::Error> {
    sqlx::query("DELETE FROM jobs WHERE queue = $1 AND job_id = $2")
        .bind(queue.as_str())
        .bind(job.id)
        .execute(&mut *transaction)
        .await?;
    transaction.commit().await?;
    Ok(())
}

/// Replace the claimed job with a delayed copy of itself (retry cue).
pub async fn requeue_delayed(
    mut transaction: PgTransaction,
    queue: Queue,
    job: &Job,
    run_after: DateTime<Utc>,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET run_after = $3
        WHERE queue = $1 AND job_id = $2
        "#,
    )
    .bind(queue.as_str())
    .bind(job.id)
    .bind(run_after)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(())
}

#[derive(Debug, serde::Serialize)]
pub struct QueueDepth {
    pub ready: i64,
    pub delayed: i64,
}

pub async fn depth(pool: &PgPool, queue: Queue) -> Result<QueueDepth, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE run_after <= now()) AS ready,
            COUNT(*) FILTER (WHERE run_after > now()) AS delayed
        FROM jobs
        WHERE queue = $1
        "#,
    )
    .bind(queue.as_str())
    .fetch_one(pool)
    .await?;
    Ok(QueueDepth {
        ready: row.try_get("ready")?,
        delayed: row.try_get("delayed")?,
    })
}
