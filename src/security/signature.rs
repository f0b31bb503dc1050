use chrono::DateTime;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Sign a message with HMAC-SHA256, returning a lowercase hex digest.
pub fn sign(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compare two hex digests in constant time.
///
/// Both the supplied and the expected digest are attacker-observable
/// strings, so a short-circuiting comparison would leak the mismatch
/// position. Every byte is folded into the accumulator regardless of
/// earlier differences; a length mismatch fails without inspecting
/// content.
pub fn verify(supplied_hex: &str, expected_hex: &str) -> bool {
    let supplied = supplied_hex.as_bytes();
    let expected = expected_hex.as_bytes();
    if supplied.len() != expected.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a, b) in supplied.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// SHA-256 content hash as lowercase hex, used for content-based dedupe keys.
pub fn content_hash(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse a vendor timestamp into epoch milliseconds.
///
/// Accepts raw epoch values (digit strings of 10 or fewer digits are
/// seconds, longer are milliseconds) and RFC 3339 strings. Returns None
/// on anything else so callers can produce a clean 400 instead of
/// propagating a parse error.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let value: i64 = trimmed.parse().ok()?;
        if trimmed.len() <= 10 {
            return Some(value * 1000);
        }
        return Some(value);
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_and_hex() {
        let sig = sign("secret", "1700000000.{}");
        assert_eq!(sig.len(), 64);
        assert!(sig.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(sig, sign("secret", "1700000000.{}"));
    }

    #[test]
    fn verify_round_trip() {
        let secret = "whsec_test";
        let message = "1700000000.{\"event\":\"checkin\"}";
        let sig = sign(secret, message);
        assert!(verify(&sig, &sign(secret, message)));
    }

    #[test]
    fn single_byte_mutation_flips_verification() {
        let secret = "whsec_test";
        let sig = sign(secret, "1700000000.{\"event\":\"checkin\"}");
        let mutated_body = sign(secret, "1700000000.{\"event\":\"checkout\"}");
        let mutated_ts = sign(secret, "1700000001.{\"event\":\"checkin\"}");
        assert!(!verify(&sig, &mutated_body));
        assert!(!verify(&sig, &mutated_ts));
    }

    #[test]
    fn verify_rejects_length_mismatch() {
        assert!(!verify("abcd", "abcde"));
        assert!(!verify("", "00"));
    }

    #[test]
    fn content_hash_differs_by_input() {
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("a").len(), 64);
    }

    #[test]
    fn parse_timestamp_epoch_seconds() {
        assert_eq!(parse_timestamp("1700000000"), Some(1_700_000_000_000));
    }

    #[test]
    fn parse_timestamp_epoch_millis() {
        assert_eq!(parse_timestamp("1700000000123"), Some(1_700_000_000_123));
    }

    #[test]
    fn parse_timestamp_rfc3339() {
        assert_eq!(
            parse_timestamp("2023-11-14T22:13:20+00:00"),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp("not-a-time"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2023-11-14 22:13:20"), None);
    }
}
