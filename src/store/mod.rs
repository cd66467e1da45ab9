//! Durable state. All multi-row mutations take an explicit transaction so
//! that state changes, outbox rows, idempotency records, and job enqueues
//! commit or roll back together.

mod outbox;
mod payments;
mod refunds;
mod subscriptions;

use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
pub use outbox::claim_due;
pub use outbox::count_events;
pub use outbox::event_counts;
pub use outbox::get_event;
pub use outbox::insert_events;
pub use outbox::list_events;
pub use outbox::record_attempt;
pub use outbox::AttemptOutcome;
pub use outbox::OutboxCounts;
pub use payments::get_payment;
pub use payments::get_payment_by_key;
pub use payments::get_payment_for_update;
pub use payments::insert_payment;
pub use payments::mark_payment;
pub use payments::NewPayment;
pub use refunds::create_refund;
pub use refunds::get_refund;
pub use refunds::list_refunds;
pub use refunds::mark_refund;
pub use refunds::refunded_total;
pub use refunds::CreatedRefund;
pub use refunds::RefundError;
use rust_decimal::Decimal;
use secrecy::Secret;
use sqlx::postgres::PgRow;
use sqlx::FromRow;
use sqlx::Row;
pub use subscriptions::delete_subscription;
pub use subscriptions::get_subscription;
pub use subscriptions::insert_subscription;
pub use subscriptions::list_subscriptions;
pub use subscriptions::update_subscription;
pub use subscriptions::NewSubscription;
pub use subscriptions::SubscriptionChanges;
use uuid::Uuid;

use crate::domain::EventStatus;
use crate::domain::PaymentStatus;
use crate::domain::RefundStatus;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Unique violation on `payments.idempotency_key`
    #[error("a payment with this idempotency key already exists")]
    DuplicateKey,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Postgres unique-violation SQLSTATE
const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// Status columns are TEXT; a row carrying an unknown status is corrupt and
/// surfaces as a decode error rather than a panic.
pub(crate) fn parse_status_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.into(),
        source: e.into(),
    })
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Payment {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            amount: row.try_get("amount")?,
            currency: row.try_get::<String, _>("currency")?.trim_end().to_string(),
            status: parse_status_column(row, "status")?,
            customer_email: row.try_get("customer_email")?,
            customer_name: row.try_get("customer_name")?,
            description: row.try_get("description")?,
            payment_method: row.try_get("payment_method")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Refund {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            payment_id: row.try_get("payment_id")?,
            amount: row.try_get("amount")?,
            reason: row.try_get("reason")?,
            status: parse_status_column(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    /// Plaintext is needed for signing; it must never appear in logs or in
    /// any response after creation.
    pub secret: Secret<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for WebhookSubscription {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            events: row.try_get("events")?,
            active: row.try_get("active")?,
            secret: Secret::new(row.try_get("secret")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for WebhookEvent {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            webhook_id: row.try_get("webhook_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: parse_status_column(row, "status")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            next_retry: row.try_get("next_retry")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
