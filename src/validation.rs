//! Input validation helpers.
//!
//! Pure, total predicates over untrusted request fields. Every request field
//! that reaches a handler goes through one of these before it is parsed into
//! a typed value.

use alloy::primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

use crate::types::ContentId;

static WALLET_ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("invalid regex"));

static TX_HASH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{64}$").expect("invalid regex"));

static BLOB_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("invalid regex"));

static NUMERIC_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("invalid regex"));

static IDEMPOTENCY_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,128}$").expect("invalid regex"));

pub fn is_valid_wallet_address(address: &str) -> bool {
    WALLET_ADDRESS_REGEX.is_match(address)
}

pub fn is_valid_transaction_hash(hash: &str) -> bool {
    TX_HASH_REGEX.is_match(hash)
}

pub fn is_valid_blob_id(id: &str) -> bool {
    BLOB_ID_REGEX.is_match(id)
}

pub fn is_numeric_id(id: &str) -> bool {
    NUMERIC_ID_REGEX.is_match(id)
}

/// Subscription tiers are small non-negative integers.
pub fn is_valid_tier_id(tier: i64) -> bool {
    (0..=10).contains(&tier)
}

pub fn is_valid_idempotency_key(key: &str) -> bool {
    IDEMPOTENCY_KEY_REGEX.is_match(key)
}

/// Parses a content id into one of the two disjoint id spaces.
///
/// Numeric strings always win the premium space, so a blob id can never
/// shadow an on-chain listing. Returns `None` for ids that fit neither
/// space (empty, too long, or containing foreign characters).
pub fn parse_content_id(id: &str) -> Option<ContentId> {
    if is_numeric_id(id) {
        let numeric = U256::from_str(id).ok()?;
        return Some(ContentId::Premium(numeric));
    }
    if is_valid_blob_id(id) {
        return Some(ContentId::Blob(id.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_address_requires_40_hex_chars() {
        assert!(is_valid_wallet_address(
            "0xc567c6112720d8190caa4e93086cd36e2ae01d37"
        ));
        assert!(!is_valid_wallet_address("0xc567c611"));
        assert!(!is_valid_wallet_address(
            "c567c6112720d8190caa4e93086cd36e2ae01d37"
        ));
        assert!(!is_valid_wallet_address(
            "0xZ567c6112720d8190caa4e93086cd36e2ae01d37"
        ));
    }

    #[test]
    fn transaction_hash_requires_64_hex_chars() {
        let ok = format!("0x{}", "a1".repeat(32));
        assert!(is_valid_transaction_hash(&ok));
        assert!(!is_valid_transaction_hash("0xa1b2"));
        assert!(!is_valid_transaction_hash(&format!("0x{}", "g1".repeat(32))));
    }

    #[test]
    fn idempotency_key_allows_token_characters_only() {
        assert!(is_valid_idempotency_key("sub-user-1_attempt-2"));
        assert!(!is_valid_idempotency_key(""));
        assert!(!is_valid_idempotency_key("has space"));
        assert!(!is_valid_idempotency_key(&"k".repeat(129)));
    }

    #[test]
    fn tier_id_bounds_are_inclusive() {
        assert!(is_valid_tier_id(0));
        assert!(is_valid_tier_id(10));
        assert!(!is_valid_tier_id(-1));
        assert!(!is_valid_tier_id(11));
    }

    #[test]
    fn numeric_ids_parse_into_premium_space() {
        match parse_content_id("42") {
            Some(ContentId::Premium(id)) => assert_eq!(id, U256::from(42u64)),
            other => panic!("expected premium id, got {other:?}"),
        }
    }

    #[test]
    fn blob_tokens_parse_into_blob_space() {
        match parse_content_id("Qm_abc-123") {
            Some(ContentId::Blob(token)) => assert_eq!(token, "Qm_abc-123"),
            other => panic!("expected blob id, got {other:?}"),
        }
    }

    #[test]
    fn id_spaces_are_disjoint() {
        // A numeric string matches the blob grammar too but must resolve
        // to the premium space.
        assert!(matches!(
            parse_content_id("123"),
            Some(ContentId::Premium(_))
        ));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert_eq!(parse_content_id(""), None);
        assert_eq!(parse_content_id("has space"), None);
        assert_eq!(parse_content_id(&"x".repeat(65)), None);
        assert_eq!(parse_content_id("semi;colon"), None);
    }
}
