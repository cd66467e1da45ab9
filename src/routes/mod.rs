mod health;
mod jobs;
mod payments;
mod webhooks;

use std::fmt::Debug;
use std::fmt::Display;

use actix_web::HttpRequest;
pub use health::*;
pub use jobs::*;
pub use payments::*;
pub use webhooks::*;

use crate::idempotency::IdempotencyKey;

/// Walk the `source` chain so logs show the root cause, not just the
/// outermost wrapper.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

/// Convert arbitrary error types to `actix_web::Error` with HTTP 500
pub fn error_500<T>(e: T) -> actix_web::Error
where
    T: Debug + Display + 'static,
{
    actix_web::error::ErrorInternalServerError(e)
}

/// The `Idempotency-Key` request header, or a generated key when the client
/// omitted one. A generated key still deduplicates enqueued jobs, but cannot
/// serve replays; the warning is the client's hint to start sending one.
pub(crate) fn idempotency_key_from(request: &HttpRequest) -> Result<IdempotencyKey, String> {
    match request.headers().get("Idempotency-Key") {
        None => {
            tracing::warn!("request without Idempotency-Key header; replay will not be possible");
            Ok(IdempotencyKey::generate())
        }
        Some(value) => value
            .to_str()
            .map_err(|_| "Idempotency-Key header is not valid UTF-8".to_string())?
            .to_string()
            .try_into(),
    }
}
