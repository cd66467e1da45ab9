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

use super::RefundResponse;
use crate::configuration::Settings;
use crate::domain::EventType;
use crate::domain::PaymentAmount;
use crate::idempotency::save_response;
use crate::idempotency::try_claim;
use crate::idempotency::NextAction;
use crate::queue;
use crate::queue::JobKind;
use crate::queue::Queue;
use crate::routes::error_chain_fmt;
use crate::routes::idempotency_key_from;
use crate::store;
use crate::store::RefundError;

#[derive(Deserialize, Default)]
pub struct CreateRefundRequest {
    /// Omitted means "refund everything that is left"
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(thiserror::Error)]
pub enum CreateRefundError {
    #[error("{0}")]
    Validation(String),
    #[error("payment not found")]
    NotFound,
    /// State machine refused: wrong payment status, or over-refund
    #[error("{0}")]
    InvalidState(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for CreateRefundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for CreateRefundError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

impl From<RefundError> for CreateRefundError {
    fn from(e: RefundError) -> Self {
        match e {
            RefundError::PaymentNotFound => Self::NotFound,
            RefundError::NotRefundable(_) | RefundError::ExceedsBudget { .. } => {
                Self::InvalidState(e.to_string())
            }
            RefundError::Database(e) => {
                Self::Unexpected(anyhow::Error::from(e).context("refund creation failed"))
            }
            RefundError::Unexpected(e) => Self::Unexpected(e),
        }
    }
}

/// `POST /payments/{id}/refund`
///
/// Creating the refund, advancing the parent payment, emitting
/// `refund.created`, and enqueueing settlement commit together; the
/// `refund.processed` event follows once the background worker settles the
/// refund.
#[tracing::instrument(
    name = "Creating a refund",
    skip(request, pool, cfg, http_request),
    fields(idempotency_key = tracing::field::Empty)
)]
pub async fn create_refund(
    path: web::Path<Uuid>,
    request: Option<web::Json<CreateRefundRequest>>,
    pool: web::Data<PgPool>,
    cfg: web::Data<Settings>,
    http_request: HttpRequest,
) -> Result<HttpResponse, CreateRefundError> {
    let payment_id = path.into_inner();
    let request = request.map(web::Json::into_inner).unwrap_or_default();
    let key = idempotency_key_from(&http_request).map_err(CreateRefundError::Validation)?;
    tracing::Span::current().record("idempotency_key", tracing::field::display(key.as_ref()));

    let requested = request
        .amount
        .map(PaymentAmount::parse)
        .transpose()
        .map_err(CreateRefundError::Validation)?;

    let mut transaction = match try_claim(&pool, &key, cfg.idempotency.ttl())
        .await
        .context("failed to claim the idempotency key")?
    {
        NextAction::ReturnSavedResponse(saved) => return Ok(saved),
        NextAction::StartProcessing(transaction) => transaction,
        NextAction::Unreplayable => {
            return Err(CreateRefundError::Validation(
                "idempotency key was already used".to_string(),
            ))
        }
    };

    let created = store::create_refund(&mut transaction, payment_id, requested, request.reason)
        .await?;

    let payload = json!({
        "refund_id": created.refund.id,
        "payment_id": created.payment.id,
        "amount": created.refund.amount,
        "reason": created.refund.reason,
        "payment_status": created.payment.status.to_string(),
    });
    store::insert_events(
        &mut transaction,
        EventType::RefundCreated,
        &payload,
        cfg.webhook.max_retries,
    )
    .await
    .context("failed to insert refund.created events")?;

    queue::enqueue(
        &mut transaction,
        Queue::Payments,
        JobKind::ProcessRefund,
        created.refund.id,
    )
    .await
    .context("failed to enqueue refund settlement")?;

    let body = serde_json::to_string(&RefundResponse::from(&created.refund))
        .context("failed to serialize the refund response")?;
    save_response(transaction, &key, Some(payment_id), 201, &body)
        .await
        .context("failed to record the idempotent response")?;

    Ok(HttpResponse::Created()
        .content_type(ContentType::json())
        .body(body))
}
