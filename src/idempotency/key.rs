use uuid::Uuid;

/// Client-supplied opaque deduplication key (the `Idempotency-Key` header).
#[derive(Debug, Clone)]
pub struct IdempotencyKey(String);

const MAX_CHARS: usize = 64;

impl TryFrom<String> for IdempotencyKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("idempotency key cannot be empty".into());
        }
        if value.len() > MAX_CHARS {
            return Err(format!(
                "idempotency key cannot be longer than {MAX_CHARS} characters"
            ));
        }
        Ok(Self(value))
    }
}

impl IdempotencyKey {
    /// Fallback for requests that omit the header. A server-generated key
    /// still deduplicates job enqueues, but the client can never replay it;
    /// real idempotency requires the key to originate with the caller.
    pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str { &self.0 }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self { value.0 }
}
