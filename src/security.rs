//! Callback authentication.
//!
//! The provider echoes two custom fields back on every webhook: the local job
//! item id (`custom0`) and a token (`custom1`) computed from that id with a
//! secret only this side knows. The token is a keyed BLAKE3 hash, stable per
//! job item, so a repeated webhook for the same item carries the same token.

use crate::host::JobItemId;
use subtle::ConstantTimeEq;

/// Domain-separation context for deriving the token key from the secret.
const TOKEN_KEY_CONTEXT: &str = "oht-gateway callback token v1";

/// Constant-time string comparison to prevent timing attacks
/// Use this for comparing API keys, webhook secrets, and other sensitive values
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Compute the callback token sent as `custom1` for a job item.
pub fn compute_token(job_item_id: JobItemId, secret: &str) -> String {
    let key = blake3::derive_key(TOKEN_KEY_CONTEXT, secret.as_bytes());
    blake3::keyed_hash(&key, job_item_id.to_string().as_bytes())
        .to_hex()
        .to_string()
}

/// Parse a job item id exactly as it was issued: ASCII digits, no sign, no
/// padding, no surrounding whitespace.
pub fn parse_job_item_id(raw: &str) -> Option<JobItemId> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: u64 = raw.parse().ok()?;
    if id.to_string() != raw {
        return None;
    }
    Some(JobItemId(id))
}

/// Check an echoed token against the recomputed one.
///
/// Fails closed: a missing id or token, a non-canonical id, or an empty
/// secret is a rejection.
pub fn verify_token(job_item_id: Option<&str>, secret: &str, presented: Option<&str>) -> bool {
    let (Some(raw_id), Some(presented)) = (job_item_id, presented) else {
        return false;
    };
    if secret.is_empty() || presented.is_empty() {
        return false;
    }
    let Some(id) = parse_job_item_id(raw_id) else {
        return false;
    };

    constant_time_compare(&compute_token(id, secret), presented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("secret123", "secret12"));
        assert!(!constant_time_compare("", "secret"));
    }

    #[test]
    fn test_token_is_deterministic() {
        let a = compute_token(JobItemId(42), "salt");
        let b = compute_token(JobItemId(42), "salt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_token_differs_per_item() {
        assert_ne!(
            compute_token(JobItemId(1), "salt"),
            compute_token(JobItemId(2), "salt")
        );
    }

    #[test]
    fn test_verify_accepts_matching_token() {
        let token = compute_token(JobItemId(17), "salt");
        assert!(verify_token(Some("17"), "salt", Some(&token)));
    }

    #[test]
    fn test_verify_rejects_missing_fields() {
        let token = compute_token(JobItemId(17), "salt");
        assert!(!verify_token(None, "salt", Some(&token)));
        assert!(!verify_token(Some("17"), "salt", None));
        assert!(!verify_token(Some("17"), "salt", Some("")));
    }

    #[test]
    fn test_verify_rejects_empty_secret() {
        let token = compute_token(JobItemId(17), "");
        assert!(!verify_token(Some("17"), "", Some(&token)));
    }

    #[test]
    fn test_verify_rejects_malformed_ids() {
        let token = compute_token(JobItemId(17), "salt");
        for raw in ["", "abc", "17a", "-17", "+17", " 17", "17 ", "017", "1.7"] {
            assert!(
                !verify_token(Some(raw), "salt", Some(&token)),
                "id {:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_verify_rejects_token_for_other_item() {
        let token = compute_token(JobItemId(17), "salt");
        assert!(!verify_token(Some("18"), "salt", Some(&token)));
    }

    #[test]
    fn test_parse_job_item_id() {
        assert_eq!(parse_job_item_id("0"), Some(JobItemId(0)));
        assert_eq!(parse_job_item_id("123"), Some(JobItemId(123)));
        assert_eq!(parse_job_item_id("00"), None);
        assert_eq!(parse_job_item_id("99999999999999999999999"), None);
    }

    proptest! {
        #[test]
        fn prop_verify_roundtrip(id in any::<u64>(), secret in "[a-zA-Z0-9]{1,32}") {
            let token = compute_token(JobItemId(id), &secret);
            prop_assert!(verify_token(Some(&id.to_string()), &secret, Some(&token)));
        }

        #[test]
        fn prop_verify_rejects_other_secret(
            id in any::<u64>(),
            secret in "[a-z0-9]{1,16}",
            other in "[a-z0-9]{1,16}",
        ) {
            prop_assume!(secret != other);
            let token = compute_token(JobItemId(id), &secret);
            prop_assert!(!verify_token(Some(&id.to_string()), &other, Some(&token)));
        }

        #[test]
        fn prop_verify_rejects_near_miss_secrets(
            id in any::<u64>(),
            secret in "[a-z0-9]{2,24}",
            index in any::<prop::sample::Index>(),
            suffix in "[a-z0-9]{1,4}",
        ) {
            let token = compute_token(JobItemId(id), &secret);
            let raw_id = id.to_string();

            // One character changed
            let pos = index.index(secret.len());
            let mut bytes = secret.clone().into_bytes();
            bytes[pos] = if bytes[pos] == b'x' { b'y' } else { b'x' };
            let changed = String::from_utf8(bytes).unwrap();
            prop_assert!(!verify_token(Some(&raw_id), &changed, Some(&token)));

            // Truncated and extended
            let truncated = &secret[..secret.len() - 1];
            prop_assert!(!verify_token(Some(&raw_id), truncated, Some(&token)));
            let extended = format!("{}{}", secret, suffix);
            prop_assert!(!verify_token(Some(&raw_id), &extended, Some(&token)));
        }

        #[test]
        fn prop_verify_rejects_truncated_token(id in any::<u64>(), cut in 1usize..64) {
            let token = compute_token(JobItemId(id), "salt");
            let keep = token.len().saturating_sub(cut);
            prop_assert!(!verify_token(Some(&id.to_string()), "salt", Some(&token[..keep])));
        }
    }
}
