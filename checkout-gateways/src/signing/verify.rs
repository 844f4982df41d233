//! Constant-time checks for inbound webhook credentials.

use subtle::ConstantTimeEq;

use super::symmetric::{sha256_hex, sha512_hex};

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Shared-token schemes (for example a static callback token header).
pub fn verify_token(expected: &str, received: &str) -> bool {
    !expected.is_empty() && constant_time_eq(expected.as_bytes(), received.trim().as_bytes())
}

/// Compares a hex digest case-insensitively.
pub fn verify_digest_hex(expected_hex: &str, received: &str) -> bool {
    constant_time_eq(
        expected_hex.to_ascii_lowercase().as_bytes(),
        received.trim().to_ascii_lowercase().as_bytes(),
    )
}

/// `sha256hex(payload)` scheme.
pub fn verify_sha256_hex(payload: &str, received: &str) -> bool {
    verify_digest_hex(&sha256_hex(payload.as_bytes()), received)
}

/// `sha512hex(payload)` scheme.
pub fn verify_sha512_hex(payload: &str, received: &str) -> bool {
    verify_digest_hex(&sha512_hex(payload.as_bytes()), received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token() {
        assert!(verify_token("cb-token", "cb-token"));
        assert!(!verify_token("cb-token", "cb-tokex"));
        assert!(!verify_token("", ""));
    }

    #[test]
    fn test_digest_case_insensitive() {
        let digest = sha256_hex(b"abc");
        assert!(verify_sha256_hex("abc", &digest.to_uppercase()));
        assert!(!verify_sha256_hex("abd", &digest));
    }
}
