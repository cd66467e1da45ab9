use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::Payment;
use super::Refund;
use crate::domain::PaymentAmount;
use crate::domain::PaymentStatus;
use crate::domain::RefundStatus;
use crate::queue::PgTransaction;

#[derive(thiserror::Error, Debug)]
pub enum RefundError {
    #[error("payment not found")]
    PaymentNotFound,
    #[error("payment in status `{0}` cannot be refunded")]
    NotRefundable(PaymentStatus),
    #[error("refund amount {requested} exceeds remaining refundable amount {remaining}")]
    ExceedsBudget {
        requested: Decimal,
        remaining: Decimal,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub struct CreatedRefund {
    pub refund: Refund,
    /// Parent payment after its status advanced
    pub payment: Payment,
}

/// Sum of refund amounts still holding a slice of the payment's budget
/// (everything but `failed`).
pub async fn refunded_total(
    tx: &mut PgTransaction,
    payment_id: Uuid,
) -> Result<Decimal, sqlx::Error> {
    sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM refunds
        WHERE payment_id = $1 AND status <> 'failed'
        "#,
    )
    .bind(payment_id)
    .fetch_one(&mut **tx)
    .await
}

/// Create a refund and advance the parent payment, atomically.
///
/// Locks the payment row, so two concurrent refunds against the same payment
/// serialize and the second sees the first's consumption of the budget. A
/// `None` amount refunds everything that is left. Exhausting the budget moves
/// the payment to `refunded`, anything less to `partial_refunded`.
#[tracing::instrument(skip(tx, requested, reason))]
pub async fn create_refund(
    tx: &mut PgTransaction,
    payment_id: Uuid,
    requested: Option<PaymentAmount>,
    reason: Option<String>,
) -> Result<CreatedRefund, RefundError> {
    let payment = super::get_payment_for_update(tx, payment_id)
        .await?
        .ok_or(RefundError::PaymentNotFound)?;
    if !payment.status.refundable() {
        return Err(RefundError::NotRefundable(payment.status));
    }

    let remaining = payment.amount - refunded_total(tx, payment_id).await?;
    let amount = match requested {
        Some(amount) => amount.as_decimal(),
        None => remaining,
    };
    if amount <= Decimal::ZERO || amount > remaining {
        return Err(RefundError::ExceedsBudget {
            requested: amount,
            remaining,
        });
    }

    let refund = sqlx::query_as::<_, Refund>(
        r#"
        INSERT INTO refunds (id, payment_id, amount, reason, status)
        VALUES ($1, $2, $3, $4, 'pending')
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payment_id)
    .bind(amount)
    .bind(&reason)
    .fetch_one(&mut **tx)
    .await?;

    let next = if amount == remaining {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartialRefunded
    };
    let payment = super::mark_payment(tx, payment_id, payment.status, next)
        .await?
        // we hold the row lock; a miss here means the table is corrupt
        .ok_or_else(|| anyhow::anyhow!("payment {payment_id} changed status mid-refund"))?;

    Ok(CreatedRefund { refund, payment })
}

pub async fn get_refund(pool: &PgPool, id: Uuid) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Refunds of a payment, newest first.
pub async fn list_refunds(pool: &PgPool, payment_id: Uuid) -> Result<Vec<Refund>, sqlx::Error> {
    sqlx::query_as::<_, Refund>(
        r#"
        SELECT * FROM refunds
        WHERE payment_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(payment_id)
    .fetch_all(pool)
    .await
}

/// Compare-and-set, as for payments.
pub async fn mark_refund(
    tx: &mut PgTransaction,
    id: Uuid,
    from: RefundStatus,
    to: RefundStatus,
) -> Result<Option<Refund>, sqlx::Error> {
    debug_assert!(from.can_transition_to(to));
    sqlx::query_as::<_, Refund>(
        r#"
        UPDATE refunds
        SET status = $3, updated_at = now()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .fetch_optional(&mut **tx)
    .await
}
