mod get;
mod post;
mod refund;

use chrono::DateTime;
use chrono::Utc;
pub use get::*;
pub use post::*;
pub use refund::*;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::store::Payment;
use crate::store::Refund;

/// Canonical payment representation in responses. Serialized exactly once
/// per request; the serialized string doubles as the recorded idempotent
/// response.
#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            status: payment.status.to_string(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            customer_email: payment.customer_email.clone(),
            customer_name: payment.customer_name.clone(),
            description: payment.description.clone(),
            payment_method: payment.payment_method.clone(),
            metadata: payment.metadata.clone(),
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct RefundResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Refund> for RefundResponse {
    fn from(refund: &Refund) -> Self {
        Self {
            id: refund.id,
            payment_id: refund.payment_id,
            amount: refund.amount,
            reason: refund.reason.clone(),
            status: refund.status.to_string(),
            created_at: refund.created_at,
            updated_at: refund.updated_at,
        }
    }
}
