//! Type definitions for the payment-gated content protocol.
//!
//! The key objects are `PaymentMetadata` (the 402 challenge body), the
//! request bodies of the charge/authorize endpoints, and the activation
//! results returned once a payment proof passes verification.
//!
//! Amounts travel as stringified `U256` base units to avoid precision loss;
//! addresses and transaction hashes are validated at the serde boundary.

use alloy::primitives::U256;
use alloy::{hex, sol};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Header carrying the client's settlement proof (a transaction hash).
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Represents an EVM address.
///
/// Wrapper around `alloy::primitives::Address`, providing display/serialization
/// support. Comparison is byte-wise, so differently-cased hex inputs of the
/// same address compare equal after parsing.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy::primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy::primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl PartialEq<alloy::primitives::Address> for EvmAddress {
    fn eq(&self, other: &alloy::primitives::Address) -> bool {
        self.0 == *other
    }
}

/// A precise on-chain token amount in base units (e.g., USDC with 6 decimals).
/// Represented as a stringified `U256` in JSON to prevent precision loss.
#[derive(Debug, Copy, Clone, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Computes `self + rhs`, saturating at the numeric bounds instead of
    /// overflowing.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<u128> for TokenAmount {
    fn from(value: u128) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        let value = U256::from_str(&string).map_err(serde::de::Error::custom)?;
        Ok(TokenAmount(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-byte EVM transaction hash, encoded as 0x-prefixed hex string.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHash(pub [u8; 32]);

static TX_HASH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction hash format")]
pub struct TransactionHashDecodingError;

impl FromStr for TransactionHash {
    type Err = TransactionHashDecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !TX_HASH_REGEX.is_match(s) {
            return Err(TransactionHashDecodingError);
        }
        let bytes =
            hex::decode(s.trim_start_matches("0x")).map_err(|_| TransactionHashDecodingError)?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| TransactionHashDecodingError)?;
        Ok(TransactionHash(array))
    }
}

impl From<alloy::primitives::B256> for TransactionHash {
    fn from(value: alloy::primitives::B256) -> Self {
        TransactionHash(value.0)
    }
}

impl From<TransactionHash> for alloy::primitives::B256 {
    fn from(value: TransactionHash) -> Self {
        alloy::primitives::B256::from(value.0)
    }
}

impl Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash(0x{})", hex::encode(self.0))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TransactionHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Identifies a piece of content in one of the two disjoint id spaces.
///
/// Purely numeric ids denote premium content listed on-chain; everything else
/// that matches the blob token grammar denotes off-chain-indexed storage
/// blobs. The two spaces cannot collide: a numeric string never parses as a
/// blob id here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentId {
    /// On-chain listing id of premium content.
    Premium(U256),
    /// Storage blob token, `[A-Za-z0-9_-]{1,64}` and not purely numeric.
    Blob(String),
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContentId::Premium(id) => write!(f, "{id}"),
            ContentId::Blob(token) => write!(f, "{token}"),
        }
    }
}

/// Payment actions a content listing supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseAction {
    Rent,
    Buy,
}

impl Display for PurchaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PurchaseAction::Rent => "rent",
            PurchaseAction::Buy => "buy",
        };
        write!(f, "{s}")
    }
}

/// Marker for the subscription action inside payment metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeAction {
    Subscribe,
}

/// Action-specific parameter bag inside [`PaymentMetadata`].
///
/// The client executor uses it to construct the exact contract call the
/// verifier will later demand byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaymentParameter {
    #[serde(rename_all = "camelCase")]
    Content {
        content_id: String,
        purchase_type: PurchaseAction,
        action: PurchaseAction,
    },
    #[serde(rename_all = "camelCase")]
    Subscription {
        creator_address: EvmAddress,
        action: SubscribeAction,
    },
}

/// Machine-readable payment instructions returned with a 402 challenge.
///
/// Regenerated per request from the current on-chain price; never persisted.
/// A zero token address would denote the native currency, but every challenge
/// this gateway issues is denominated in USDC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    pub chain_id: u64,
    pub token_address: EvmAddress,
    pub amount: TokenAmount,
    pub recipient: EvmAddress,
    pub payment_parameter: PaymentParameter,
}

/// Request body of `POST /x402/content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChargeRequest {
    pub content_id: Option<String>,
    /// Raw action string; the handler rejects anything but `rent`/`buy`
    /// with a field-specific message instead of a body parse error.
    pub action: Option<String>,
    pub wallet_address: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Request body of `POST /x402/subscribe`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeChargeRequest {
    pub creator_address: Option<String>,
    pub tier_id: Option<i64>,
    pub wallet_address: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Request body of `POST /content/{id}/authorize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub wallet_address: Option<String>,
    pub creator_address: Option<String>,
}

/// Query string of `GET /upload/key`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadKeyQuery {
    pub wallet_address: Option<String>,
}

/// Marker for the `"activated"` status of settlement results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationStatus {
    Activated,
}

/// Settlement result of a content rent/buy payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentActivation {
    pub status: ActivationStatus,
    pub action: PurchaseAction,
    pub content_id: String,
    pub transaction_hash: TransactionHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    #[serde(rename = "ACTIVE")]
    Active,
}

/// Subscription record embedded in a subscribe settlement result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub id: String,
    pub creator_address: EvmAddress,
    pub tier_id: i64,
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub transaction_hash: TransactionHash,
}

/// Settlement result of a subscription payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionActivation {
    pub status: ActivationStatus,
    pub subscription: SubscriptionRecord,
}

/// A simple error structure returned on request failures.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

sol! {
    /// On-chain marketplace contract. Creators register a channel and list
    /// content; users rent, buy, or subscribe, and the contract exposes the
    /// access predicates the verifier and authorizer read back.
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface CreatorHub {
        function rentContent(uint256 contentId) external;
        function buyContent(uint256 contentId) external;
        function subscribe(address creator) external;
        function checkRental(address user, uint256 contentId) external view returns (bool);
        function checkPurchase(address user, uint256 contentId) external view returns (bool);
        function checkSubscription(address user, address creator) external view returns (bool);
        function getChannelName(address creator) external view returns (string memory);
        function contents(uint256 contentId) external view returns (
            uint256 id,
            address creator,
            uint8 contentType,
            string memory uri,
            bool isFree,
            uint256 fullPrice,
            uint256 rentedPrice,
            address paymentToken,
            bool active
        );
        function creators(address creator) external view returns (
            string memory name,
            address wallet,
            bool registered,
            uint256 subscriptionPrice,
            uint256 subscriberCount,
            uint256 contentCount
        );
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
        function transfer(address to, uint256 value) external returns (bool);
    }
}
