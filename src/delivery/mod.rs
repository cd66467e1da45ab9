//! Background halves of the gateway: the payment processor driving the
//! payment/refund state machines, and the webhook dispatcher draining the
//! outbox. Both consume the durable job queues and assume redelivery: every
//! state mutation is CAS-guarded, so running a job twice is harmless.

mod backoff;
mod payment_worker;
mod poller;
mod webhook_worker;

pub use backoff::RetrySchedule;
pub use payment_worker::init_payment_workers;
pub use payment_worker::try_process_job;
pub use poller::init_outbox_poller;
pub use poller::poll_once;
pub use webhook_worker::init_webhook_workers;
pub use webhook_worker::try_deliver_job;

/// What a single pass over a queue accomplished.
#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    TaskCompleted,
    EmptyQueue,
}
