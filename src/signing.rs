//! Signed fetch instructions.
//!
//! A fetch instruction is a short-lived capability the authorize endpoint
//! hands to a client after a successful access decision. The client presents
//! it to the storage provider's retrieval path; the signature binds the blob,
//! the wallet, and the validity window to the server-held secret.
//!
//! The signature is HMAC-SHA256 over the canonical JSON encoding of the
//! payload, hex-encoded. Canonical means the struct field order below;
//! reordering fields would invalidate every outstanding instruction.

use alloy::hex;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use crate::timestamp::UnixMillis;

type HmacSha256 = Hmac<Sha256>;

/// Instructions stay valid for one hour from issuance.
pub const FETCH_INSTRUCTION_TTL: Duration = Duration::from_secs(3600);

/// The signed portion of a fetch instruction.
///
/// Field order is load-bearing: the HMAC covers the serialized JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchInstructionPayload {
    pub blob_id: String,
    pub user_wallet: String,
    pub issued_at: UnixMillis,
    pub expiry: UnixMillis,
    pub nonce: u32,
}

/// A fetch instruction: the payload plus its detached signature, flattened
/// into a single JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchInstruction {
    #[serde(flatten)]
    pub payload: FetchInstructionPayload,
    pub signature: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Computes the hex-encoded HMAC-SHA256 signature of a payload.
pub fn create_signature(
    payload: &FetchInstructionPayload,
    secret: &str,
) -> Result<String, SigningError> {
    let serialized = serde_json::to_vec(payload)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(&serialized);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex-encoded signature against the payload.
///
/// Uses a constant-time comparison; malformed hex or a length mismatch
/// short-circuits to `false` without panicking. Expiry is not checked here,
/// see [`FetchInstruction::is_expired`].
pub fn verify_signature(payload: &FetchInstructionPayload, signature: &str, secret: &str) -> bool {
    let serialized = match serde_json::to_vec(payload) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let provided = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(&serialized);
    // verify_slice is constant time and rejects wrong-length input.
    mac.verify_slice(&provided).is_ok()
}

impl FetchInstruction {
    /// Issues a fresh instruction for `blob_id`/`user_wallet`, valid for
    /// [`FETCH_INSTRUCTION_TTL`] from now.
    pub fn issue(
        blob_id: impl Into<String>,
        user_wallet: impl Into<String>,
        secret: &str,
    ) -> Result<Self, SigningError> {
        let issued_at = UnixMillis::now();
        let payload = FetchInstructionPayload {
            blob_id: blob_id.into(),
            user_wallet: user_wallet.into(),
            issued_at,
            expiry: issued_at + FETCH_INSTRUCTION_TTL,
            nonce: rand::thread_rng().gen_range(0..1_000_000),
        };
        let signature = create_signature(&payload, secret)?;
        Ok(FetchInstruction { payload, signature })
    }

    /// Whether the validity window has passed. Checked independently of the
    /// signature: an expired instruction is rejected even if authentic.
    pub fn is_expired(&self) -> bool {
        self.payload.expiry.is_past()
    }

    /// Whether the signature matches the payload under `secret`.
    pub fn is_authentic(&self, secret: &str) -> bool {
        verify_signature(&self.payload, &self.signature, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-signing-secret";

    fn sample_payload() -> FetchInstructionPayload {
        FetchInstructionPayload {
            blob_id: "QmSample".to_string(),
            user_wallet: "0x1111111111111111111111111111111111111111".to_string(),
            issued_at: UnixMillis(1_700_000_000_000),
            expiry: UnixMillis(1_700_000_000_000 + 3_600_000),
            nonce: 424_242,
        }
    }

    #[test]
    fn signature_round_trips() {
        let payload = sample_payload();
        let signature = create_signature(&payload, SECRET).unwrap();
        assert!(verify_signature(&payload, &signature, SECRET));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let payload = sample_payload();
        let signature = create_signature(&payload, SECRET).unwrap();

        let mut wrong_blob = payload.clone();
        wrong_blob.blob_id = "QmOther".to_string();
        assert!(!verify_signature(&wrong_blob, &signature, SECRET));

        let mut wrong_wallet = payload.clone();
        wrong_wallet.user_wallet = "0x2222222222222222222222222222222222222222".to_string();
        assert!(!verify_signature(&wrong_wallet, &signature, SECRET));

        let mut wrong_expiry = payload.clone();
        wrong_expiry.expiry = UnixMillis(wrong_expiry.expiry.0 + 1);
        assert!(!verify_signature(&wrong_expiry, &signature, SECRET));

        let mut wrong_nonce = payload;
        wrong_nonce.nonce += 1;
        assert!(!verify_signature(&wrong_nonce, &signature, SECRET));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let payload = sample_payload();
        let signature = create_signature(&payload, SECRET).unwrap();
        assert!(!verify_signature(&payload, &signature, "other-secret"));
    }

    #[test]
    fn malformed_signature_is_rejected_without_panicking() {
        let payload = sample_payload();
        assert!(!verify_signature(&payload, "not-hex", SECRET));
        assert!(!verify_signature(&payload, "abcd", SECRET));
        assert!(!verify_signature(&payload, "", SECRET));
    }

    #[test]
    fn issued_instruction_is_authentic_and_unexpired() {
        let instruction = FetchInstruction::issue(
            "QmSample",
            "0x1111111111111111111111111111111111111111",
            SECRET,
        )
        .unwrap();
        assert!(instruction.is_authentic(SECRET));
        assert!(!instruction.is_expired());
        assert!(instruction.payload.nonce < 1_000_000);
        assert_eq!(
            instruction.payload.expiry,
            instruction.payload.issued_at + FETCH_INSTRUCTION_TTL
        );
    }

    #[test]
    fn expiry_is_checked_independently_of_signature() {
        let mut instruction = FetchInstruction::issue(
            "QmSample",
            "0x1111111111111111111111111111111111111111",
            SECRET,
        )
        .unwrap();
        instruction.payload.issued_at = UnixMillis(0);
        instruction.payload.expiry = UnixMillis(1);
        instruction.signature = create_signature(&instruction.payload, SECRET).unwrap();
        // Authentic, yet expired.
        assert!(instruction.is_authentic(SECRET));
        assert!(instruction.is_expired());
    }

    #[test]
    fn serialized_instruction_flattens_payload_fields() {
        let instruction = FetchInstruction {
            payload: sample_payload(),
            signature: "aa".repeat(32),
        };
        let value = serde_json::to_value(&instruction).unwrap();
        assert_eq!(value["blobId"], "QmSample");
        assert_eq!(value["issuedAt"], 1_700_000_000_000u64);
        assert!(value["signature"].is_string());
        assert!(value.get("payload").is_none());
    }
}
