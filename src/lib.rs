pub mod configuration;
pub mod delivery;
pub mod domain;
pub mod idempotency;
pub mod queue;
pub mod routes;
pub mod signer;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod webhook_client;
