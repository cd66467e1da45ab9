use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::PaymentResponse;
use super::RefundResponse;
use crate::routes::error_chain_fmt;
use crate::store;

#[derive(thiserror::Error)]
pub enum GetPaymentError {
    #[error("payment not found")]
    NotFound,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for GetPaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for GetPaymentError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[derive(Serialize)]
struct PaymentWithRefunds {
    #[serde(flatten)]
    payment: PaymentResponse,
    refunds: Vec<RefundResponse>,
}

/// `GET /payments/{id}`: the payment with its refunds, newest refund first.
#[tracing::instrument(name = "Fetching a payment", skip(pool))]
pub async fn get_payment(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, GetPaymentError> {
    let payment_id = path.into_inner();
    let payment = store::get_payment(&pool, payment_id)
        .await
        .context("failed to fetch payment")?
        .ok_or(GetPaymentError::NotFound)?;
    let refunds = store::list_refunds(&pool, payment_id)
        .await
        .context("failed to fetch refunds")?;

    Ok(HttpResponse::Ok().json(PaymentWithRefunds {
        payment: PaymentResponse::from(&payment),
        refunds: refunds.iter().map(RefundResponse::from).collect(),
    }))
}
