//! HMAC-SHA256 request signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    // new_from_slice only fails for fixed-size-key MACs; HMAC accepts any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Canonical string for signed marketplace requests:
/// `METHOD\nPATH\nTIMESTAMP\nBODY`.
pub fn canonical_request(method: &str, path: &str, timestamp: &str, body: &str) -> String {
    format!("{}\n{}\n{}\n{}", method.to_ascii_uppercase(), path, timestamp, body)
}

pub fn sign_request(secret: &str, method: &str, path: &str, timestamp: &str, body: &str) -> String {
    hmac_sha256_hex(
        secret.as_bytes(),
        canonical_request(method, path, timestamp, body).as_bytes(),
    )
}
