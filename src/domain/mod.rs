mod amount;
mod currency;
mod customer_email;
mod events;
mod statuses;

pub use amount::PaymentAmount;
pub use currency::Currency;
pub use customer_email::CustomerEmail;
pub use events::EventType;
pub use statuses::EventStatus;
pub use statuses::PaymentStatus;
pub use statuses::RefundStatus;
