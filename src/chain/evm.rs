//! EVM implementation of [`ContentChain`] over JSON-RPC.
//!
//! A thin read-only client: transaction/receipt lookups plus typed
//! `CreatorHub` contract reads. Struct-shaped returns are decoded into
//! domain records right here at the RPC boundary so nothing downstream
//! touches positional tuples.
//!
//! Invariants:
//! - No write path: this type never holds a signer.
//! - No caching: every method is a live read.

use alloy::primitives::U256;
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use async_trait::async_trait;
use tracing::instrument;

use crate::chain::{
    ChainError, ChainTransaction, ContentChain, ContentListing, CreatorProfile, ReceiptStatus,
};
use crate::network::Network;
use crate::types::{CreatorHub, EvmAddress, TokenAmount, TransactionHash};

/// Read-only chain client for one network.
#[derive(Debug, Clone)]
pub struct EvmChainReader {
    provider: RootProvider,
    hub: EvmAddress,
    network: Network,
}

impl EvmChainReader {
    /// Connects to `rpc_url` and targets the `CreatorHub` at `hub`.
    pub async fn connect(
        rpc_url: &str,
        hub: EvmAddress,
        network: Network,
    ) -> Result<Self, ChainError> {
        let client = RpcClient::builder()
            .connect(rpc_url)
            .await
            .map_err(|e| ChainError::RpcUnavailable(e.to_string()))?;
        let provider = RootProvider::new(client);
        Ok(Self {
            provider,
            hub,
            network,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn hub_address(&self) -> EvmAddress {
        self.hub
    }

    fn hub_contract(&self) -> CreatorHub::CreatorHubInstance<&RootProvider> {
        CreatorHub::new(self.hub.into(), &self.provider)
    }
}

fn rpc_error(error: alloy::transports::TransportError) -> ChainError {
    ChainError::RpcUnavailable(error.to_string())
}

fn contract_error(error: alloy::contract::Error) -> ChainError {
    match error {
        alloy::contract::Error::TransportError(e) => ChainError::RpcUnavailable(e.to_string()),
        other => ChainError::CallReverted(other.to_string()),
    }
}

#[async_trait]
impl ContentChain for EvmChainReader {
    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, hash = %hash))]
    async fn transaction_by_hash(
        &self,
        hash: TransactionHash,
    ) -> Result<Option<ChainTransaction>, ChainError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash.into())
            .await
            .map_err(rpc_error)?;
        Ok(tx.map(|tx| {
            let from = alloy::network::TransactionResponse::from(&tx);
            let to = alloy::consensus::Transaction::to(&tx);
            let input = alloy::consensus::Transaction::input(&tx).clone();
            let value = alloy::consensus::Transaction::value(&tx);
            ChainTransaction {
                hash,
                from: from.into(),
                to: to.map(EvmAddress::from),
                input,
                value,
            }
        }))
    }

    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, hash = %hash))]
    async fn receipt_status(
        &self,
        hash: TransactionHash,
    ) -> Result<Option<ReceiptStatus>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash.into())
            .await
            .map_err(rpc_error)?;
        Ok(receipt.map(|receipt| {
            if receipt.status() {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Reverted
            }
        }))
    }

    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, content_id = %content_id))]
    async fn content_listing(&self, content_id: U256) -> Result<ContentListing, ChainError> {
        let listing = self
            .hub_contract()
            .contents(content_id)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(ContentListing {
            creator: listing.creator.into(),
            is_free: listing.isFree,
            full_price: TokenAmount(listing.fullPrice),
            rent_price: TokenAmount(listing.rentedPrice),
            payment_token: listing.paymentToken.into(),
            active: listing.active,
        })
    }

    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, creator = %creator))]
    async fn creator_profile(&self, creator: EvmAddress) -> Result<CreatorProfile, ChainError> {
        let profile = self
            .hub_contract()
            .creators(creator.into())
            .call()
            .await
            .map_err(contract_error)?;
        Ok(CreatorProfile {
            name: profile.name,
            registered: profile.registered,
            subscription_price: TokenAmount(profile.subscriptionPrice),
        })
    }

    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, user = %user, content_id = %content_id))]
    async fn has_rental(&self, user: EvmAddress, content_id: U256) -> Result<bool, ChainError> {
        self.hub_contract()
            .checkRental(user.into(), content_id)
            .call()
            .await
            .map_err(contract_error)
    }

    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, user = %user, content_id = %content_id))]
    async fn has_purchase(&self, user: EvmAddress, content_id: U256) -> Result<bool, ChainError> {
        self.hub_contract()
            .checkPurchase(user.into(), content_id)
            .call()
            .await
            .map_err(contract_error)
    }

    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, user = %user, creator = %creator))]
    async fn has_subscription(
        &self,
        user: EvmAddress,
        creator: EvmAddress,
    ) -> Result<bool, ChainError> {
        self.hub_contract()
            .checkSubscription(user.into(), creator.into())
            .call()
            .await
            .map_err(contract_error)
    }
}
