//! Client-side payment executor.
//!
//! Takes the metadata from a 402 challenge and performs the payment: picks
//! the signer for the challenge's chain, checks native and token balances,
//! tops up the USDC allowance when the hub needs to pull funds, submits the
//! transaction, and waits a bounded time for confirmation. The transaction
//! hash is returned either way; a payment that outlives the wait is still a
//! valid proof once it confirms.
//!
//! A zero token address in the challenge denotes the chain's native
//! currency: the payment is settled as a raw value transfer and the
//! pre-flight requires the amount on top of the gas buffer.
//!
//! Public for consumption by downstream crates; the gate itself never
//! signs or submits transactions.

use alloy::network::{Ethereum, EthereumWallet, NetworkWallet};
use alloy::primitives::{Bytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use dashmap::DashMap;
use std::time::Duration;
use tracing::instrument;

use crate::network::Network;
use crate::types::{
    EvmAddress, IERC20, PaymentMetadata, PaymentParameter, PurchaseAction, TokenAmount,
    TransactionHash,
};
use crate::verifier::PaymentIntent;

/// Native balance headroom required before submitting, in wei.
pub const GAS_BUFFER_WEI: u128 = 100_000_000_000_000;

/// How long to wait for the settlement receipt before handing the hash
/// back unconfirmed.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

pub const REQUIRED_CONFIRMATIONS: u64 = 1;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentExecError {
    /// The challenge names a chain this executor has no signer for.
    #[error("Unsupported chain id: {0}")]
    UnsupportedChain(u64),
    /// Not enough native currency to cover gas.
    #[error("Insufficient native balance for gas")]
    InsufficientNative,
    /// Not enough of the payment token to cover the charge.
    #[error("Insufficient token balance: need {required}, have {available}")]
    InsufficientToken {
        required: TokenAmount,
        available: TokenAmount,
    },
    /// The challenge metadata itself is unusable.
    #[error("Invalid payment challenge: {0}")]
    InvalidChallenge(String),
    /// The wallet or node refused the transaction.
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    #[error("RPC failure: {0}")]
    Rpc(String),
}

/// What happened to a submitted payment within the confirmation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Mined with at least one confirmation.
    Confirmed(TransactionHash),
    /// Submitted but not yet confirmed when the wait expired. The hash is
    /// still a valid proof once the transaction lands.
    Pending(TransactionHash),
}

impl PaymentOutcome {
    pub fn transaction_hash(&self) -> TransactionHash {
        match self {
            PaymentOutcome::Confirmed(hash) | PaymentOutcome::Pending(hash) => *hash,
        }
    }
}

/// Encodes the contract call a challenge's parameter bag demands.
///
/// Produces exactly the calldata the gate's verifier will compare against,
/// via the same intent encoding.
pub fn challenge_calldata(parameter: &PaymentParameter) -> Result<Bytes, PaymentExecError> {
    match parameter {
        PaymentParameter::Content {
            content_id,
            action,
            ..
        } => {
            let content_id = content_id.parse::<U256>().map_err(|_| {
                PaymentExecError::InvalidChallenge(format!(
                    "contentId {content_id} is not numeric"
                ))
            })?;
            let intent = match action {
                PurchaseAction::Rent => PaymentIntent::Rent { content_id },
                PurchaseAction::Buy => PaymentIntent::Buy { content_id },
            };
            Ok(intent.calldata())
        }
        PaymentParameter::Subscription {
            creator_address, ..
        } => Ok(PaymentIntent::Subscribe {
            creator: *creator_address,
        }
        .calldata()),
    }
}

/// The zero token address marks a payment in the chain's native currency.
pub fn is_native_token(token: EvmAddress) -> bool {
    token.0.is_zero()
}

/// Native balance the payer must hold before submitting: the gas buffer,
/// plus the transferred amount itself when the payment is native.
fn required_native_balance(metadata: &PaymentMetadata) -> U256 {
    let buffer = U256::from(GAS_BUFFER_WEI);
    if is_native_token(metadata.token_address) {
        metadata.amount.0.saturating_add(buffer)
    } else {
        buffer
    }
}

fn native_transfer_request(metadata: &PaymentMetadata) -> TransactionRequest {
    TransactionRequest::default()
        .to(metadata.recipient.into())
        .value(metadata.amount.0)
}

fn rpc_error(error: impl std::fmt::Display) -> PaymentExecError {
    let message = error.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("insufficient funds") {
        PaymentExecError::InsufficientNative
    } else if lowered.contains("rejected") || lowered.contains("denied") {
        PaymentExecError::Rejected(message)
    } else {
        PaymentExecError::Rpc(message)
    }
}

/// Signs and submits challenge payments on one network.
pub struct PaymentExecutor {
    provider: DynProvider,
    network: Network,
    payer: EvmAddress,
    // Local proof memory keyed by challenge identity. Purely a convenience
    // for retries after a lost response; the gate's idempotency store is
    // the real replay protection.
    proofs: DashMap<String, TransactionHash>,
}

impl PaymentExecutor {
    pub async fn connect(
        rpc_url: &str,
        wallet: EthereumWallet,
        network: Network,
    ) -> Result<Self, PaymentExecError> {
        let payer = NetworkWallet::<Ethereum>::default_signer_address(&wallet);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect(rpc_url)
            .await
            .map_err(rpc_error)?
            .erased();
        Ok(Self {
            provider,
            network,
            payer: payer.into(),
            proofs: DashMap::new(),
        })
    }

    pub fn payer(&self) -> EvmAddress {
        self.payer
    }

    pub fn cached_proof(&self, challenge_key: &str) -> Option<TransactionHash> {
        self.proofs.get(challenge_key).map(|entry| *entry)
    }

    /// Executes the payment a 402 challenge demands and returns the proof.
    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, payer = %self.payer))]
    pub async fn pay(
        &self,
        challenge_key: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentOutcome, PaymentExecError> {
        if metadata.chain_id != self.network.chain_id() {
            return Err(PaymentExecError::UnsupportedChain(metadata.chain_id));
        }
        if let Some(hash) = self.cached_proof(challenge_key) {
            return Ok(PaymentOutcome::Pending(hash));
        }

        let native = is_native_token(metadata.token_address);
        self.ensure_native_headroom(required_native_balance(metadata))
            .await?;
        if !native {
            self.ensure_token_funds(metadata).await?;
            self.ensure_allowance(metadata).await?;
        }

        let calldata = challenge_calldata(&metadata.payment_parameter)?;
        let mut request = TransactionRequest::default()
            .to(metadata.recipient.into())
            .input(calldata.into());
        if native {
            request = request.value(metadata.amount.0);
        }
        let outcome = self.submit(request).await?;
        self.proofs
            .insert(challenge_key.to_string(), outcome.transaction_hash());
        Ok(outcome)
    }

    /// Pays straight to the recipient wallet instead of through a hub
    /// call: a raw value transfer when the challenge names the native
    /// currency (zero token address), an ERC-20 `transfer` otherwise.
    #[instrument(skip_all, fields(otel.kind = "client", network = %self.network, payer = %self.payer))]
    pub async fn pay_direct(
        &self,
        challenge_key: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentOutcome, PaymentExecError> {
        if metadata.chain_id != self.network.chain_id() {
            return Err(PaymentExecError::UnsupportedChain(metadata.chain_id));
        }
        if let Some(hash) = self.cached_proof(challenge_key) {
            return Ok(PaymentOutcome::Pending(hash));
        }

        self.ensure_native_headroom(required_native_balance(metadata))
            .await?;
        if is_native_token(metadata.token_address) {
            let outcome = self.submit(native_transfer_request(metadata)).await?;
            self.proofs
                .insert(challenge_key.to_string(), outcome.transaction_hash());
            return Ok(outcome);
        }
        self.ensure_token_funds(metadata).await?;

        let token = IERC20::new(metadata.token_address.into(), &self.provider);
        let pending = token
            .transfer(metadata.recipient.into(), metadata.amount.0)
            .send()
            .await
            .map_err(rpc_error)?;
        let hash = TransactionHash::from(*pending.tx_hash());
        let outcome = self.await_confirmation(pending, hash).await?;
        self.proofs
            .insert(challenge_key.to_string(), outcome.transaction_hash());
        Ok(outcome)
    }

    async fn ensure_native_headroom(&self, required: U256) -> Result<(), PaymentExecError> {
        let balance = self
            .provider
            .get_balance(self.payer.into())
            .await
            .map_err(rpc_error)?;
        if balance < required {
            return Err(PaymentExecError::InsufficientNative);
        }
        Ok(())
    }

    async fn ensure_token_funds(
        &self,
        metadata: &PaymentMetadata,
    ) -> Result<(), PaymentExecError> {
        let token = IERC20::new(metadata.token_address.into(), &self.provider);
        let balance = token
            .balanceOf(self.payer.into())
            .call()
            .await
            .map_err(rpc_error)?;
        if balance < metadata.amount.0 {
            return Err(PaymentExecError::InsufficientToken {
                required: metadata.amount,
                available: TokenAmount(balance),
            });
        }
        Ok(())
    }

    /// Makes sure the recipient contract can pull the charge, approving
    /// first when the current allowance falls short. The approval must be
    /// mined before the payment itself is submitted.
    async fn ensure_allowance(&self, metadata: &PaymentMetadata) -> Result<(), PaymentExecError> {
        let token = IERC20::new(metadata.token_address.into(), &self.provider);
        let allowance = token
            .allowance(self.payer.into(), metadata.recipient.into())
            .call()
            .await
            .map_err(rpc_error)?;
        if allowance >= metadata.amount.0 {
            return Ok(());
        }

        tracing::debug!(required = %metadata.amount, current = %allowance, "approving token allowance");
        let pending = token
            .approve(metadata.recipient.into(), metadata.amount.0)
            .send()
            .await
            .map_err(rpc_error)?;
        tokio::time::timeout(CONFIRMATION_TIMEOUT, pending.watch())
            .await
            .map_err(|_| PaymentExecError::Rpc("approval confirmation timed out".to_string()))?
            .map_err(rpc_error)?;
        Ok(())
    }

    async fn submit(
        &self,
        request: TransactionRequest,
    ) -> Result<PaymentOutcome, PaymentExecError> {
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(rpc_error)?;
        let hash = TransactionHash::from(*pending.tx_hash());
        self.await_confirmation(pending, hash).await
    }

    async fn await_confirmation(
        &self,
        pending: alloy::providers::PendingTransactionBuilder<Ethereum>,
        hash: TransactionHash,
    ) -> Result<PaymentOutcome, PaymentExecError> {
        let pending = pending.with_required_confirmations(REQUIRED_CONFIRMATIONS);
        match tokio::time::timeout(CONFIRMATION_TIMEOUT, pending.get_receipt()).await {
            Ok(Ok(_receipt)) => Ok(PaymentOutcome::Confirmed(hash)),
            Ok(Err(error)) => Err(rpc_error(error)),
            // The transaction is in flight; the hash becomes a valid proof
            // once it confirms.
            Err(_) => Ok(PaymentOutcome::Pending(hash)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscribeAction;
    use alloy::primitives::address;

    fn creator() -> EvmAddress {
        EvmAddress(address!("0x2222222222222222222222222222222222222222"))
    }

    #[test]
    fn content_challenge_encodes_the_matching_hub_call() {
        let rent = PaymentParameter::Content {
            content_id: "7".to_string(),
            purchase_type: PurchaseAction::Rent,
            action: PurchaseAction::Rent,
        };
        assert_eq!(
            challenge_calldata(&rent).unwrap(),
            PaymentIntent::Rent {
                content_id: U256::from(7u64)
            }
            .calldata()
        );

        let buy = PaymentParameter::Content {
            content_id: "7".to_string(),
            purchase_type: PurchaseAction::Buy,
            action: PurchaseAction::Buy,
        };
        assert_eq!(
            challenge_calldata(&buy).unwrap(),
            PaymentIntent::Buy {
                content_id: U256::from(7u64)
            }
            .calldata()
        );
    }

    #[test]
    fn subscription_challenge_encodes_subscribe() {
        let parameter = PaymentParameter::Subscription {
            creator_address: creator(),
            action: SubscribeAction::Subscribe,
        };
        assert_eq!(
            challenge_calldata(&parameter).unwrap(),
            PaymentIntent::Subscribe { creator: creator() }.calldata()
        );
    }

    #[test]
    fn non_numeric_content_id_is_an_invalid_challenge() {
        let parameter = PaymentParameter::Content {
            content_id: "bafy-blob".to_string(),
            purchase_type: PurchaseAction::Rent,
            action: PurchaseAction::Rent,
        };
        assert!(matches!(
            challenge_calldata(&parameter),
            Err(PaymentExecError::InvalidChallenge(_))
        ));
    }

    fn native_metadata(amount: u64) -> PaymentMetadata {
        PaymentMetadata {
            chain_id: 84532,
            token_address: EvmAddress(alloy::primitives::Address::ZERO),
            amount: TokenAmount::from(amount),
            recipient: creator(),
            payment_parameter: PaymentParameter::Subscription {
                creator_address: creator(),
                action: SubscribeAction::Subscribe,
            },
        }
    }

    #[test]
    fn zero_token_address_selects_the_native_path() {
        assert!(is_native_token(EvmAddress(alloy::primitives::Address::ZERO)));
        assert!(!is_native_token(creator()));
    }

    #[test]
    fn native_payments_require_amount_plus_gas_buffer() {
        let native = native_metadata(1_000);
        assert_eq!(
            required_native_balance(&native),
            U256::from(1_000u64) + U256::from(GAS_BUFFER_WEI)
        );

        let mut erc20 = native_metadata(1_000);
        erc20.token_address = creator();
        assert_eq!(required_native_balance(&erc20), U256::from(GAS_BUFFER_WEI));
    }

    #[test]
    fn native_transfer_carries_value_and_no_calldata() {
        let request = native_transfer_request(&native_metadata(2_500));
        assert_eq!(request.value, Some(U256::from(2_500u64)));
        assert!(request.input.input().is_none());
        assert_eq!(
            request.to,
            Some(alloy::primitives::TxKind::Call(creator().into()))
        );
    }

    #[test]
    fn rpc_errors_are_categorized_by_message() {
        assert!(matches!(
            rpc_error("insufficient funds for gas * price + value"),
            PaymentExecError::InsufficientNative
        ));
        assert!(matches!(
            rpc_error("user rejected the request"),
            PaymentExecError::Rejected(_)
        ));
        assert!(matches!(
            rpc_error("connection refused"),
            PaymentExecError::Rpc(_)
        ));
    }

    #[test]
    fn outcome_always_exposes_the_hash() {
        let hash = TransactionHash([7u8; 32]);
        assert_eq!(PaymentOutcome::Confirmed(hash).transaction_hash(), hash);
        assert_eq!(PaymentOutcome::Pending(hash).transaction_hash(), hash);
    }
}
