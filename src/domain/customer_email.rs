use validator::ValidateEmail;

/// Parsed, syntactically valid customer email.
#[derive(Debug, Clone)]
pub struct CustomerEmail(String);

impl CustomerEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        ValidateEmail::validate_email(&email)
            .then_some(Self(email.clone()))
            .ok_or(format!("invalid customer email: {email:?}"))
    }
}

impl AsRef<str> for CustomerEmail {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for CustomerEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}
