use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use anyhow::Context;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::PaymentResponse;
use crate::configuration::Settings;
use crate::domain::Currency;
use crate::domain::CustomerEmail;
use crate::domain::PaymentAmount;
use crate::idempotency::save_response;
use crate::idempotency::try_claim;
use crate::idempotency::IdempotencyKey;
use crate::idempotency::NextAction;
use crate::queue;
use crate::queue::JobKind;
use crate::queue::Queue;
use crate::routes::error_chain_fmt;
use crate::routes::idempotency_key_from;
use crate::store;
use crate::store::NewPayment;
use crate::store::StoreError;

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(thiserror::Error)]
pub enum CreatePaymentError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for CreatePaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for CreatePaymentError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// `POST /payments`
///
/// The whole intake (idempotency claim, payment row, job enqueue, recorded
/// response) is one transaction: a client observes either nothing or all of
/// it, and a crashed request leaves no claim behind.
#[tracing::instrument(
    name = "Creating a payment",
    skip(request, pool, cfg, http_request),
    fields(idempotency_key = tracing::field::Empty)
)]
pub async fn create_payment(
    request: web::Json<CreatePaymentRequest>,
    pool: web::Data<PgPool>,
    cfg: web::Data<Settings>,
    http_request: HttpRequest,
) -> Result<HttpResponse, CreatePaymentError> {
    let key = idempotency_key_from(&http_request).map_err(CreatePaymentError::Validation)?;
    tracing::Span::current().record("idempotency_key", tracing::field::display(key.as_ref()));

    let mut transaction = match try_claim(&pool, &key, cfg.idempotency.ttl())
        .await
        .context("failed to claim the idempotency key")?
    {
        NextAction::ReturnSavedResponse(saved) => return Ok(saved),
        NextAction::StartProcessing(transaction) => transaction,
        // claim exists but its response expired; the payment row, if any,
        // outlives the idempotency record
        NextAction::Unreplayable => return existing_payment_response(&pool, &key).await,
    };

    let request = request.into_inner();
    let new = NewPayment {
        id: Uuid::new_v4(),
        idempotency_key: key.as_ref().to_string(),
        amount: PaymentAmount::parse(request.amount).map_err(CreatePaymentError::Validation)?,
        currency: match request.currency {
            Some(code) => Currency::parse(code).map_err(CreatePaymentError::Validation)?,
            None => Currency::default(),
        },
        customer_email: CustomerEmail::parse(request.customer_email)
            .map_err(CreatePaymentError::Validation)?,
        customer_name: request.customer_name,
        description: request.description,
        payment_method: request.payment_method,
        metadata: request.metadata.unwrap_or_else(|| json!({})),
    };

    let payment = match store::insert_payment(&mut transaction, &new).await {
        Ok(payment) => payment,
        Err(StoreError::DuplicateKey) => {
            // rolls the claim back; the earlier payment answers instead
            drop(transaction);
            return existing_payment_response(&pool, &key).await;
        }
        Err(StoreError::Database(e)) => {
            return Err(anyhow::Error::from(e)
                .context("failed to insert payment")
                .into())
        }
    };

    queue::enqueue(
        &mut transaction,
        Queue::Payments,
        JobKind::ProcessPayment,
        payment.id,
    )
    .await
    .context("failed to enqueue payment processing")?;

    let body = serde_json::to_string(&PaymentResponse::from(&payment))
        .context("failed to serialize the payment response")?;
    save_response(transaction, &key, Some(payment.id), 201, &body)
        .await
        .context("failed to record the idempotent response")?;

    Ok(HttpResponse::Created()
        .content_type(ContentType::json())
        .body(body))
}

/// The `DuplicateKey` recovery: the key was burned by an earlier request
/// whose recorded response is gone, but the payment itself is still there.
async fn existing_payment_response(
    pool: &PgPool,
    key: &IdempotencyKey,
) -> Result<HttpResponse, CreatePaymentError> {
    let payment = store::get_payment_by_key(pool, key.as_ref())
        .await
        .context("failed to look up the existing payment")?
        .ok_or_else(|| {
            CreatePaymentError::Validation("idempotency key was already used".to_string())
        })?;
    Ok(HttpResponse::Ok().json(json!({
        "id": payment.id,
        "status": payment.status.to_string(),
        "message": "Payment already exists",
    })))
}
