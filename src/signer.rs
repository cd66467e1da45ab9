use std::time::Duration;

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;

/// How far a signature timestamp may drift from the verifier's clock before
/// the signature is rejected outright.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5 * 60);

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, timestamp_ms: i64, body: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take a key of any size");
    // the signed string is `timestamp "." body`; the body must be the exact
    // byte string that goes on the wire
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    mac
}

/// Lowercase-hex `HMAC-SHA256(secret, "{timestamp}.{body}")`, as carried in
/// the `X-Webhook-Signature` header.
pub fn sign(secret: &str, timestamp_ms: i64, body: &str) -> String {
    hex::encode(mac(secret, timestamp_ms, body).finalize().into_bytes())
}

/// Constant-time signature check. Also rejects timestamps outside the
/// tolerance window, so a captured request cannot be replayed later.
pub fn verify(
    secret: &str,
    timestamp_ms: i64,
    body: &str,
    signature_hex: &str,
    now_ms: i64,
    tolerance: Duration,
) -> bool {
    if (now_ms - timestamp_ms).unsigned_abs() > tolerance.as_millis() as u64 {
        return false;
    }
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    // `verify_slice` is the constant-time comparison
    mac(secret, timestamp_ms, body).verify_slice(&signature).is_ok()
}
