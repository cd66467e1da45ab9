use std::net::TcpListener;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::routes::create_payment;
use crate::routes::create_refund;
use crate::routes::create_webhook;
use crate::routes::delete_webhook;
use crate::routes::get_payment;
use crate::routes::get_webhook;
use crate::routes::health_check;
use crate::routes::health_db;
use crate::routes::health_queue;
use crate::routes::jobs_status;
use crate::routes::list_webhook_events;
use crate::routes::list_webhooks;
use crate::routes::update_webhook;

/// The intake half of the gateway: a bound listener plus the actix `Server`.
/// The background workers are spawned separately (see `main.rs`) and share
/// nothing with this but the database.
pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(addr)?;
        // port 0 in the config means "pick one"; remember what we got
        let port = listener.local_addr()?.port();

        let pool = get_connection_pool(&cfg.database);
        let server = run(listener, pool, cfg)?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Consumes `self`; either `await` it last or hand it to `tokio::spawn`.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

/// Statement timeout for request-serving connections. Interactive queries
/// that take longer than this are better off failing.
const INTERACTIVE_STATEMENT_TIMEOUT_MS: &str = "2000";

/// Workers hold claim transactions across network calls and sleeps, so they
/// get a much looser limit.
const WORKER_STATEMENT_TIMEOUT_MS: &str = "10000";

pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(
        db_cfg
            .connection()
            .options([("statement_timeout", INTERACTIVE_STATEMENT_TIMEOUT_MS)]),
    )
}

pub fn get_worker_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(
        db_cfg
            .connection()
            .options([("statement_timeout", WORKER_STATEMENT_TIMEOUT_MS)]),
    )
}

/// Declares all API endpoints.
pub fn run(listener: TcpListener, pool: PgPool, cfg: Settings) -> Result<Server, anyhow::Error> {
    let pool = Data::new(pool);
    let cfg = Data::new(cfg);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(health_check))
            .route("/health/db", web::get().to(health_db))
            .route("/health/queue", web::get().to(health_queue))
            .route("/payments", web::post().to(create_payment))
            .route("/payments/{id}", web::get().to(get_payment))
            .route("/payments/{id}/refund", web::post().to(create_refund))
            .route("/webhooks", web::post().to(create_webhook))
            .route("/webhooks", web::get().to(list_webhooks))
            .route("/webhooks/{id}", web::get().to(get_webhook))
            .route("/webhooks/{id}", web::patch().to(update_webhook))
            .route("/webhooks/{id}", web::delete().to(delete_webhook))
            .route("/webhooks/{id}/events", web::get().to(list_webhook_events))
            .route("/test/jobs/status", web::get().to(jobs_status))
            .app_data(pool.clone())
            .app_data(cfg.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
