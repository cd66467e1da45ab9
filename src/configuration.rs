use std::time::Duration;

use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_bool_from_anything;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub processing: ProcessingSettings,
    pub webhook: WebhookSettings,
    pub poller: PollerSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

/// Knobs for the simulated card-network leg of payment processing.
#[derive(Deserialize, Clone)]
pub struct ProcessingSettings {
    /// Probability of a simulated payment succeeding
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub success_rate: f64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub delay_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub workers: usize,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub test_mode: bool,
    /// Deterministic outcome used when `test_mode` is on
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub test_payment_success: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub test_delay_ms: u64,
}

impl ProcessingSettings {
    pub fn delay(&self) -> Duration {
        let ms = if self.test_mode {
            self.test_delay_ms
        } else {
            self.delay_ms
        };
        Duration::from_millis(ms)
    }
}

#[derive(Deserialize, Clone)]
pub struct WebhookSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: i32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub workers: usize,
    /// Shortens the retry schedule from `2^n` minutes to `2^n` seconds
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub test_retry_intervals: bool,
}

impl WebhookSettings {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}

#[derive(Deserialize, Clone)]
pub struct PollerSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub interval_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch: i64,
}

impl PollerSettings {
    pub fn interval(&self) -> Duration { Duration::from_millis(self.interval_ms) }
}

#[derive(Deserialize, Clone)]
pub struct IdempotencySettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub ttl_hours: i64,
}

impl IdempotencySettings {
    pub fn ttl(&self) -> chrono::Duration { chrono::Duration::hours(self.ttl_hours) }
}

impl DatabaseSettings {
    /// Connection options for the server-level database (no database name);
    /// used by the test harness to create throwaway databases.
    pub fn connection_without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
    }

    pub fn connection(&self) -> PgConnectOptions {
        self.connection_without_db().database(&self.database_name)
    }
}

/// Runtime environment, selected with `APP_ENVIRONMENT`.
#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment; use `local` or `production`"
            )),
        }
    }
}

/// Flat environment variables recognized in addition to the `APP__`-prefixed
/// form, mapped to their settings keys.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PAYMENT_SUCCESS_RATE", "processing.success_rate"),
    ("TEST_MODE", "processing.test_mode"),
    ("TEST_PAYMENT_SUCCESS", "processing.test_payment_success"),
    ("TEST_PROCESSING_DELAY_MS", "processing.test_delay_ms"),
    ("WEBHOOK_MAX_RETRIES", "webhook.max_retries"),
    ("WEBHOOK_TIMEOUT_MS", "webhook.timeout_ms"),
    ("WEBHOOK_RETRY_INTERVALS_TEST", "webhook.test_retry_intervals"),
    ("IDEMPOTENCY_TTL_HOURS", "idempotency.ttl_hours"),
    ("POLL_INTERVAL_MS", "poller.interval_ms"),
    ("POLL_BATCH", "poller.batch"),
];

/// Layered configuration: `configuration/base.yaml`, then the
/// environment-specific file, then `APP__section__field` variables, then the
/// flat variable names above. All fields must end up populated or the service
/// refuses to start.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("failed to determine current directory");
    let configuration_dir = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_file = format!("{}.yaml", environment.as_str());

    let mut builder = config::Config::builder()
        .add_source(config::File::from(configuration_dir.join("base.yaml")))
        .add_source(config::File::from(configuration_dir.join(environment_file)))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"), // APP__database__host etc.
        );

    for (var, key) in ENV_OVERRIDES {
        if let Ok(value) = std::env::var(var) {
            builder = builder.set_override(*key, value)?;
        }
    }

    builder.build()?.try_deserialize()
}
