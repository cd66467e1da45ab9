/// Three-letter (ISO 4217 style) currency code, stored uppercase.
///
/// Codes are validated for shape only; whether a code is actually allocated
/// is the card network's business, not ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: String) -> Result<Self, String> {
        let code = code.trim().to_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("invalid currency code: {code:?}"));
        }
        Ok(Self(code))
    }

    pub fn usd() -> Self { Self("USD".to_string()) }
}

impl Default for Currency {
    fn default() -> Self { Self::usd() }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str { &self.0 }
}
