//! Read-only chain access.
//!
//! The chain is the single source of truth for money-moving state: prices,
//! active flags, rental/subscription/purchase predicates, and settlement
//! transactions are read through on every check, never cached.
//!
//! [`ContentChain`] is the seam the verifier and authorizer depend on; the
//! EVM implementation lives in [`evm`], and tests substitute an in-memory
//! mock.

pub mod evm;

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;

use crate::types::{EvmAddress, TokenAmount, TransactionHash};

/// Errors surfaced by chain reads.
///
/// A transaction or receipt that simply is not indexed yet is `Ok(None)`,
/// not an error: callers treat it as retryable non-confirmation, which is a
/// different situation from the RPC being unreachable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// The RPC endpoint could not be reached or timed out. Retryable.
    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),
    /// The contract call reverted or returned undecodable data. Terminal.
    #[error("Contract call failed: {0}")]
    CallReverted(String),
}

/// Settlement transaction fields the verifier inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: TransactionHash,
    pub from: EvmAddress,
    pub to: Option<EvmAddress>,
    pub input: Bytes,
    pub value: U256,
}

/// Outcome recorded in a mined transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Decoded `contents(uint256)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentListing {
    pub creator: EvmAddress,
    pub is_free: bool,
    pub full_price: TokenAmount,
    pub rent_price: TokenAmount,
    pub payment_token: EvmAddress,
    pub active: bool,
}

/// Decoded `creators(address)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorProfile {
    pub name: String,
    pub registered: bool,
    pub subscription_price: TokenAmount,
}

/// Read-only view of the marketplace chain state.
///
/// Every method is a live read; implementations must not cache results.
#[async_trait]
pub trait ContentChain: Send + Sync {
    /// Fetches a transaction by hash. `None` if not yet indexed.
    async fn transaction_by_hash(
        &self,
        hash: TransactionHash,
    ) -> Result<Option<ChainTransaction>, ChainError>;

    /// Fetches the receipt status of a transaction. `None` if not yet mined.
    async fn receipt_status(
        &self,
        hash: TransactionHash,
    ) -> Result<Option<ReceiptStatus>, ChainError>;

    /// Reads the on-chain listing of a premium content id.
    async fn content_listing(&self, content_id: U256) -> Result<ContentListing, ChainError>;

    /// Reads a creator's registration record.
    async fn creator_profile(&self, creator: EvmAddress) -> Result<CreatorProfile, ChainError>;

    /// Whether `user` holds an unexpired rental of `content_id`.
    async fn has_rental(&self, user: EvmAddress, content_id: U256) -> Result<bool, ChainError>;

    /// Whether `user` has purchased `content_id`.
    async fn has_purchase(&self, user: EvmAddress, content_id: U256) -> Result<bool, ChainError>;

    /// Whether `user` holds an unexpired subscription to `creator`.
    async fn has_subscription(
        &self,
        user: EvmAddress,
        creator: EvmAddress,
    ) -> Result<bool, ChainError>;
}
