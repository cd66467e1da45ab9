use std::fmt::Debug;
use std::fmt::Display;

use paygate::configuration::get_configuration;
use paygate::delivery::init_outbox_poller;
use paygate::delivery::init_payment_workers;
use paygate::delivery::init_webhook_workers;
use paygate::idempotency::init_expiry_worker;
use paygate::startup::Application;
use paygate::telemetry::get_subscriber;
use paygate::telemetry::init_subscriber;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} failed"
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} task failed to complete"
            )
        }
    }
}

/// One process, five long-lived futures: the API, the payment processor
/// pool, the webhook dispatcher pool, the outbox poller, and the
/// idempotency-key expiry sweep. The first to exit takes the process down;
/// un-acked jobs survive in the store and are redelivered on restart.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("paygate", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration()?;

    let server = Application::build(cfg.clone()).await?.run_until_stopped();
    let payment_workers = init_payment_workers(cfg.clone());
    let webhook_workers = init_webhook_workers(cfg.clone());
    let poller = init_outbox_poller(cfg.clone());
    let expiry_worker = init_expiry_worker(cfg);

    let server_task = tokio::spawn(server);
    let payment_task = tokio::spawn(payment_workers);
    let webhook_task = tokio::spawn(webhook_workers);
    let poller_task = tokio::spawn(poller);
    let expiry_task = tokio::spawn(expiry_worker);

    tokio::select! {
        o = server_task => report_exit("API", o),
        o = payment_task => report_exit("Payment processor", o),
        o = webhook_task => report_exit("Webhook dispatcher", o),
        o = poller_task => report_exit("Outbox poller", o),
        o = expiry_task => report_exit("Idempotency expiry worker", o),
    }

    Ok(())
}
