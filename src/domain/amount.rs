use rust_decimal::Decimal;

/// Positive monetary amount with at most two decimal places, the resolution
/// of the NUMERIC(12, 2) columns it is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentAmount(Decimal);

/// NUMERIC(12, 2) upper bound
fn max_amount() -> Decimal { Decimal::new(999_999_999_999, 2) }

impl PaymentAmount {
    pub fn parse(amount: Decimal) -> Result<Self, String> {
        if amount <= Decimal::ZERO {
            return Err(format!("amount must be positive, got {amount}"));
        }
        if amount.normalize().scale() > 2 {
            return Err(format!("amount has sub-cent precision: {amount}"));
        }
        if amount > max_amount() {
            return Err(format!("amount exceeds the supported maximum: {amount}"));
        }
        Ok(Self(amount))
    }

    pub fn as_decimal(&self) -> Decimal { self.0 }
}
