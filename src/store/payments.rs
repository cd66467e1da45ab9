use sqlx::PgPool;
use uuid::Uuid;

use super::is_unique_violation;
use super::Payment;
use super::StoreError;
use crate::domain::Currency;
use crate::domain::CustomerEmail;
use crate::domain::PaymentAmount;
use crate::domain::PaymentStatus;
use crate::queue::PgTransaction;

pub struct NewPayment {
    pub id: Uuid,
    pub idempotency_key: String,
    pub amount: PaymentAmount,
    pub currency: Currency,
    pub customer_email: CustomerEmail,
    pub customer_name: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
}

#[tracing::instrument(skip_all, fields(payment_id = %new.id))]
pub async fn insert_payment(
    tx: &mut PgTransaction,
    new: &NewPayment,
) -> Result<Payment, StoreError> {
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (id, idempotency_key, amount, currency, status, customer_email,
             customer_name, description, payment_method, metadata)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(new.id)
    .bind(&new.idempotency_key)
    .bind(new.amount.as_decimal())
    .bind(new.currency.as_ref())
    .bind(new.customer_email.as_ref())
    .bind(&new.customer_name)
    .bind(&new.description)
    .bind(&new.payment_method)
    .bind(&new.metadata)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::DuplicateKey
        } else {
            StoreError::Database(e)
        }
    })
}

pub async fn get_payment(pool: &PgPool, id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_payment_by_key(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE idempotency_key = $1")
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
}

/// Row-locked read; holds the payment until the caller's transaction ends,
/// which serializes concurrent refunds against the same payment.
pub async fn get_payment_for_update(
    tx: &mut PgTransaction,
    id: Uuid,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

/// Compare-and-set status update. Returns `None` when the payment is no
/// longer in `from`; the caller (a redelivered job, a concurrent worker)
/// must treat that as "someone else already did this" and stop.
#[tracing::instrument(skip(tx), fields(payment_id = %id))]
pub async fn mark_payment(
    tx: &mut PgTransaction,
    id: Uuid,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<Option<Payment>, sqlx::Error> {
    debug_assert!(from.can_transition_to(to));
    sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
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
