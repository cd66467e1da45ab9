use std::time::Duration;

use sqlx::PgPool;

use crate::configuration::Settings;
use crate::startup::get_connection_pool;

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Expired records are treated as absent by lookups; this worker just keeps
/// the table from growing without bound.
async fn expire_old_keys(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= now()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

async fn expiry_loop(pool: &PgPool) -> Result<(), anyhow::Error> {
    loop {
        match expire_old_keys(pool).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("expired {n} idempotency keys"),
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "failed to expire idempotency keys"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;
    }
}

/// To be spawned alongside the API; never returns under normal operation.
pub async fn init_expiry_worker(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    expiry_loop(&pool).await
}
