use std::str::FromStr;

/// Event types a webhook subscription can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    PaymentCompleted,
    PaymentFailed,
    RefundCreated,
    RefundProcessed,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        Self::PaymentCompleted,
        Self::PaymentFailed,
        Self::RefundCreated,
        Self::RefundProcessed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentCompleted => "payment.completed",
            Self::PaymentFailed => "payment.failed",
            Self::RefundCreated => "refund.created",
            Self::RefundProcessed => "refund.processed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment.completed" => Ok(Self::PaymentCompleted),
            "payment.failed" => Ok(Self::PaymentFailed),
            "refund.created" => Ok(Self::RefundCreated),
            "refund.processed" => Ok(Self::RefundProcessed),
            other => Err(format!("unknown event type: {other:?}")),
        }
    }
}
