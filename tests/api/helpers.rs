use once_cell::sync::Lazy;
use paygate::configuration::get_configuration;
use paygate::configuration::DatabaseSettings;
use paygate::configuration::ProcessingSettings;
use paygate::configuration::Settings;
use paygate::delivery::poll_once;
use paygate::delivery::try_deliver_job;
use paygate::delivery::try_process_job;
use paygate::delivery::ExecutionOutcome;
use paygate::delivery::RetrySchedule;
use paygate::startup::get_connection_pool;
use paygate::startup::Application;
use paygate::telemetry::get_subscriber;
use paygate::telemetry::init_subscriber;
use paygate::webhook_client::WebhookClient;
use serde_json::json;
use serde_json::Value;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::MockServer;

/// Init the tracing subscriber once for the whole test binary. Opt in to
/// output with `TEST_LOG=true cargo test | bunyan`.
static TRACING: Lazy<()> = Lazy::new(|| {
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

pub struct TestApp {
    pub addr: String,
    pub pool: PgPool,
    pub cfg: Settings,
    /// Stand-in for merchants' webhook receivers
    pub receiver: MockServer,
    pub api_client: reqwest::Client,
}

impl TestApp {
    pub async fn post_payment(&self, body: &Value, idempotency_key: Option<&str>) -> reqwest::Response {
        let mut request = self.api_client.post(format!("{}/payments", self.addr)).json(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        request.send().await.expect("failed to POST /payments")
    }

    pub async fn get_payment(&self, id: &str) -> reqwest::Response {
        self.api_client
            .get(format!("{}/payments/{id}", self.addr))
            .send()
            .await
            .expect("failed to GET /payments/{id}")
    }

    pub async fn post_refund(&self, payment_id: &str, body: &Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/payments/{payment_id}/refund", self.addr))
            .json(body)
            .send()
            .await
            .expect("failed to POST refund")
    }

    pub async fn post_webhook(&self, body: &Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/webhooks", self.addr))
            .json(body)
            .send()
            .await
            .expect("failed to POST /webhooks")
    }

    /// Register a subscription pointed at the receiver; returns (id, secret).
    pub async fn create_subscription(&self, events: &[&str]) -> (String, String) {
        let response = self
            .post_webhook(&json!({
                "url": format!("{}/hooks", self.receiver.uri()),
                "events": events,
            }))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        (
            body["id"].as_str().unwrap().to_string(),
            body["secret"].as_str().unwrap().to_string(),
        )
    }

    /// Run payment-queue jobs until the queue is drained.
    pub async fn drain_payment_queue(&self) {
        let processing = self.cfg.processing.clone();
        self.drain_payment_queue_with(&processing).await;
    }

    /// As above, with outcome overrides (e.g. forced failure).
    pub async fn drain_payment_queue_with(&self, processing: &ProcessingSettings) {
        loop {
            let outcome = try_process_job(&self.pool, processing, self.cfg.webhook.max_retries)
                .await
                .expect("payment worker pass failed");
            if outcome == ExecutionOutcome::EmptyQueue {
                break;
            }
        }
    }

    /// Run webhook-queue jobs until nothing is due. Retries scheduled into
    /// the future stay queued; see `force_due` to fast-forward them.
    pub async fn drain_webhook_queue(&self) {
        let client = WebhookClient::new(self.cfg.webhook.timeout());
        let schedule = RetrySchedule::new(self.cfg.webhook.test_retry_intervals);
        loop {
            let outcome = try_deliver_job(&self.pool, &client, &schedule)
                .await
                .expect("webhook worker pass failed");
            if outcome == ExecutionOutcome::EmptyQueue {
                break;
            }
        }
    }

    /// One poller tick: claim due outbox rows, enqueue delivery jobs.
    pub async fn poll_outbox(&self) -> usize {
        poll_once(&self.pool, self.cfg.poller.batch)
            .await
            .expect("outbox poll failed")
    }

    /// Fast-forward the clock from the queue's point of view: make every
    /// scheduled retry and delayed job due now.
    pub async fn force_due(&self) {
        sqlx::query("UPDATE webhook_events SET next_retry = now() WHERE status = 'pending' AND next_retry IS NOT NULL")
            .execute(&self.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE jobs SET run_after = now()")
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn event_rows(&self, event_type: &str) -> Vec<(Uuid, String, i32)> {
        sqlx::query_as::<_, (Uuid, String, i32)>(
            "SELECT id, status, retry_count FROM webhook_events WHERE event_type = $1 ORDER BY created_at",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }
}

/// Create a throwaway database (randomized name) and run the migrations.
async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    let mut conn = PgConnection::connect_with(&cfg.connection_without_db())
        .await
        .expect("postgres must be running");
    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .expect("failed to create database");

    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to migrate");
    pool
}

/// Spawn the API against a fresh database. Background workers are NOT
/// started; tests drive them explicitly through the drain helpers so every
/// scenario is deterministic.
pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let receiver = MockServer::start().await;

    let cfg = {
        let mut cfg = get_configuration().expect("failed to read configuration");
        cfg.database.database_name = Uuid::new_v4().to_string();
        cfg.application.port = 0;
        // deterministic processing and a fast retry schedule
        cfg.processing.test_mode = true;
        cfg.processing.test_payment_success = true;
        cfg.processing.test_delay_ms = 0;
        cfg.webhook.test_retry_intervals = true;
        cfg.webhook.timeout_ms = 1000;
        cfg
    };

    let _pool = configure_database(&cfg.database).await;

    let app = Application::build(cfg.clone()).await.unwrap();
    let addr = format!("http://127.0.0.1:{}", app.get_port());
    let pool = get_connection_pool(&cfg.database);
    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        pool,
        cfg,
        receiver,
        api_client: reqwest::Client::new(),
    }
}
