//! Webhook signature verification.
//!
//! Gateways sign the raw request body with HMAC-SHA256 and send the hex digest
//! in the `x-gateway-signature` header, optionally prefixed with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `message` and return it hex-encoded (64 characters).
///
/// Returns `None` only if the HMAC implementation rejects the key, which
/// HMAC-SHA256 never does for any key length.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Whether `signature` is a valid signature of `body` under `secret`.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let provided = signature.strip_prefix("sha256=").unwrap_or(signature);
    hmac_sha256_hex(secret, body)
        .is_some_and(|expected| constant_time_eq(&expected, &provided.to_ascii_lowercase()))
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let digest = hmac_sha256_hex("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verifies_with_and_without_prefix() {
        let body = br#"{"gateway_ref":"gw_1","status":"settled"}"#;
        let digest = hmac_sha256_hex("whsec", body).unwrap();

        assert!(verify_signature("whsec", body, &digest));
        assert!(verify_signature("whsec", body, &format!("sha256={digest}")));
        assert!(verify_signature("whsec", body, &digest.to_uppercase()));
        assert!(!verify_signature("other", body, &digest));
        assert!(!verify_signature("whsec", b"tampered", &digest));
        assert!(!verify_signature("whsec", body, ""));
    }

    #[test]
    fn constant_time_eq_compares_length_and_content() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
