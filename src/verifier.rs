//! Payment verification against on-chain settlement.
//!
//! Given a claimed transaction hash plus the expected (payer, action,
//! amount, recipient) tuple, the verifier confirms that the transaction
//! settled on-chain, that it is the payer's own transaction, that it pays
//! the right party for the right thing, and that the access-granting state
//! change actually landed.
//!
//! The checks are strictly sequential and short-circuiting: each step
//! narrows trust, and a later step assuming an earlier one passed would be
//! unsound. Each failure carries a specific reason, never a generic
//! "invalid".

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use tracing::instrument;

use crate::chain::{ChainError, ContentChain, ReceiptStatus};
use crate::types::{CreatorHub, EvmAddress, TokenAmount, TransactionHash};

/// The contract action a payment is expected to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentIntent {
    Rent { content_id: U256 },
    Buy { content_id: U256 },
    Subscribe { creator: EvmAddress },
}

impl PaymentIntent {
    /// ABI-encodes the exact `CreatorHub` call this intent requires.
    ///
    /// The byte-for-byte comparison against the submitted transaction's
    /// input is what binds a payment to one specific action and id: a valid
    /// payment for content A can never unlock content B.
    pub fn calldata(&self) -> Bytes {
        match self {
            PaymentIntent::Rent { content_id } => CreatorHub::rentContentCall {
                contentId: *content_id,
            }
            .abi_encode()
            .into(),
            PaymentIntent::Buy { content_id } => CreatorHub::buyContentCall {
                contentId: *content_id,
            }
            .abi_encode()
            .into(),
            PaymentIntent::Subscribe { creator } => CreatorHub::subscribeCall {
                creator: (*creator).into(),
            }
            .abi_encode()
            .into(),
        }
    }

    /// Reads back the on-chain post-condition: did the payment actually
    /// activate access for `payer`?
    async fn access_activated(
        &self,
        chain: &dyn ContentChain,
        payer: EvmAddress,
    ) -> Result<bool, ChainError> {
        match self {
            PaymentIntent::Rent { content_id } => chain.has_rental(payer, *content_id).await,
            PaymentIntent::Buy { content_id } => chain.has_purchase(payer, *content_id).await,
            PaymentIntent::Subscribe { creator } => {
                chain.has_subscription(payer, *creator).await
            }
        }
    }
}

/// What the settlement transaction is expected to look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedSettlement {
    /// A call into the `CreatorHub` contract with exact calldata.
    HubCall {
        hub: EvmAddress,
        intent: PaymentIntent,
    },
    /// A plain value transfer straight to the recipient's wallet, carrying
    /// at least `min_amount`.
    DirectTransfer {
        recipient: EvmAddress,
        min_amount: TokenAmount,
        intent: PaymentIntent,
    },
}

impl ExpectedSettlement {
    fn recipient(&self) -> EvmAddress {
        match self {
            ExpectedSettlement::HubCall { hub, .. } => *hub,
            ExpectedSettlement::DirectTransfer { recipient, .. } => *recipient,
        }
    }

    fn intent(&self) -> &PaymentIntent {
        match self {
            ExpectedSettlement::HubCall { intent, .. } => intent,
            ExpectedSettlement::DirectTransfer { intent, .. } => intent,
        }
    }
}

/// Why a payment proof was rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentInvalid {
    /// The hash is not indexed or not yet mined. The client should retry
    /// after a delay; the transaction may still confirm.
    #[error("Transaction not found or not yet confirmed")]
    NotConfirmed,
    /// The transaction was mined but reverted. Terminal.
    #[error("Transaction failed on-chain")]
    FailedOnChain,
    /// A third party's transaction hash cannot unlock this payer's access.
    #[error("Transaction sender mismatch")]
    SenderMismatch,
    #[error("Transaction recipient mismatch")]
    RecipientMismatch,
    /// The transaction called the hub with different calldata than the
    /// expected action/id requires.
    #[error("Transaction call data mismatch")]
    CallDataMismatch,
    /// A direct transfer carried less value than the required amount.
    #[error("Transaction amount below required payment")]
    InsufficientAmount,
    /// The transaction settled but the contract predicate still reports no
    /// access for the payer.
    #[error("Payment confirmed but access not activated on-chain")]
    NotActivated,
    /// A chain read failed while checking the post-condition.
    #[error("Transaction verification failed: {0}")]
    ChainRead(#[from] ChainError),
}

impl PaymentInvalid {
    /// Whether retrying the same proof later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentInvalid::NotConfirmed
                | PaymentInvalid::ChainRead(ChainError::RpcUnavailable(_))
        )
    }
}

/// Runs the full verification sequence for one payment proof.
#[instrument(skip(chain), fields(hash = %hash, payer = %payer))]
pub async fn verify_payment(
    chain: &dyn ContentChain,
    hash: TransactionHash,
    payer: EvmAddress,
    expected: &ExpectedSettlement,
) -> Result<(), PaymentInvalid> {
    // 1. Fetch transaction and receipt concurrently. Any miss or fetch
    // failure is reported as non-confirmation, which the client may retry.
    let (tx, receipt) = tokio::join!(
        chain.transaction_by_hash(hash),
        chain.receipt_status(hash)
    );
    let tx = tx
        .map_err(|_| PaymentInvalid::NotConfirmed)?
        .ok_or(PaymentInvalid::NotConfirmed)?;
    let receipt = receipt
        .map_err(|_| PaymentInvalid::NotConfirmed)?
        .ok_or(PaymentInvalid::NotConfirmed)?;

    // 2. The transaction must have succeeded.
    if receipt != ReceiptStatus::Success {
        return Err(PaymentInvalid::FailedOnChain);
    }

    // 3. The sender must be the claimed payer.
    if tx.from != payer {
        tracing::warn!(got = %tx.from, expected = %payer, "payment sender mismatch");
        return Err(PaymentInvalid::SenderMismatch);
    }

    // 4. The recipient must be the expected contract or wallet.
    let recipient = expected.recipient();
    if tx.to != Some(recipient) {
        tracing::warn!(got = ?tx.to, expected = %recipient, "payment recipient mismatch");
        return Err(PaymentInvalid::RecipientMismatch);
    }

    // 5/6. Flow-specific binding: exact calldata for contract calls,
    // minimum value for direct transfers.
    match expected {
        ExpectedSettlement::HubCall { intent, .. } => {
            if tx.input != intent.calldata() {
                return Err(PaymentInvalid::CallDataMismatch);
            }
        }
        ExpectedSettlement::DirectTransfer { min_amount, .. } => {
            if tx.value < min_amount.0 {
                return Err(PaymentInvalid::InsufficientAmount);
            }
        }
    }

    // 7. The access-granting state change must have landed on-chain.
    let activated = expected.intent().access_activated(chain, payer).await?;
    if !activated {
        return Err(PaymentInvalid::NotActivated);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::chain::ChainTransaction;
    use alloy::primitives::address;
    use std::str::FromStr;

    fn payer() -> EvmAddress {
        EvmAddress(address!("0x1111111111111111111111111111111111111111"))
    }

    fn hub() -> EvmAddress {
        EvmAddress(address!("0xc567c6112720d8190caa4e93086cd36e2ae01d37"))
    }

    fn tx_hash(byte: u8) -> TransactionHash {
        TransactionHash([byte; 32])
    }

    fn rent_expectation(content_id: u64) -> ExpectedSettlement {
        ExpectedSettlement::HubCall {
            hub: hub(),
            intent: PaymentIntent::Rent {
                content_id: U256::from(content_id),
            },
        }
    }

    fn rent_transaction(hash: TransactionHash, content_id: u64) -> ChainTransaction {
        ChainTransaction {
            hash,
            from: payer(),
            to: Some(hub()),
            input: PaymentIntent::Rent {
                content_id: U256::from(content_id),
            }
            .calldata(),
            value: U256::ZERO,
        }
    }

    #[tokio::test]
    async fn accepts_a_settled_rental_payment() {
        let hash = tx_hash(1);
        let chain = MockChain::new()
            .with_transaction(rent_transaction(hash, 7), ReceiptStatus::Success)
            .with_rental(payer(), U256::from(7u64));

        let result = verify_payment(&chain, hash, payer(), &rent_expectation(7)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_hash_is_retryable_non_confirmation() {
        let chain = MockChain::new();
        let err = verify_payment(&chain, tx_hash(2), payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::NotConfirmed));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_rpc_is_retryable() {
        let chain = MockChain::new().unreachable_rpc();
        let err = verify_payment(&chain, tx_hash(2), payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn reverted_transaction_is_terminal() {
        let hash = tx_hash(3);
        let chain = MockChain::new()
            .with_transaction(rent_transaction(hash, 7), ReceiptStatus::Reverted);
        let err = verify_payment(&chain, hash, payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::FailedOnChain));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn third_party_transaction_fails_sender_check() {
        let hash = tx_hash(4);
        let mut transaction = rent_transaction(hash, 7);
        transaction.from = EvmAddress(address!("0x2222222222222222222222222222222222222222"));
        let chain = MockChain::new()
            .with_transaction(transaction, ReceiptStatus::Success)
            .with_rental(payer(), U256::from(7u64));

        let err = verify_payment(&chain, hash, payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::SenderMismatch));
    }

    #[tokio::test]
    async fn wrong_recipient_is_rejected() {
        let hash = tx_hash(5);
        let mut transaction = rent_transaction(hash, 7);
        transaction.to = Some(EvmAddress(address!(
            "0x3333333333333333333333333333333333333333"
        )));
        let chain = MockChain::new().with_transaction(transaction, ReceiptStatus::Success);

        let err = verify_payment(&chain, hash, payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::RecipientMismatch));
    }

    #[tokio::test]
    async fn payment_for_one_content_cannot_unlock_another() {
        let hash = tx_hash(6);
        // Settled rental of content 7, but access to content 8 is claimed.
        let chain = MockChain::new()
            .with_transaction(rent_transaction(hash, 7), ReceiptStatus::Success)
            .with_rental(payer(), U256::from(7u64));

        let err = verify_payment(&chain, hash, payer(), &rent_expectation(8))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::CallDataMismatch));
    }

    #[tokio::test]
    async fn buy_calldata_does_not_satisfy_rent_expectation() {
        let hash = tx_hash(7);
        let mut transaction = rent_transaction(hash, 7);
        transaction.input = PaymentIntent::Buy {
            content_id: U256::from(7u64),
        }
        .calldata();
        let chain = MockChain::new().with_transaction(transaction, ReceiptStatus::Success);

        let err = verify_payment(&chain, hash, payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::CallDataMismatch));
    }

    #[tokio::test]
    async fn settled_payment_without_onchain_access_is_rejected() {
        let hash = tx_hash(8);
        // Transaction looks right but the rental predicate still reports
        // no access.
        let chain = MockChain::new()
            .with_transaction(rent_transaction(hash, 7), ReceiptStatus::Success);

        let err = verify_payment(&chain, hash, payer(), &rent_expectation(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::NotActivated));
    }

    #[tokio::test]
    async fn subscription_payment_verifies_against_subscribe_calldata() {
        let creator = EvmAddress(address!("0x4444444444444444444444444444444444444444"));
        let hash = tx_hash(9);
        let intent = PaymentIntent::Subscribe { creator };
        let transaction = ChainTransaction {
            hash,
            from: payer(),
            to: Some(hub()),
            input: intent.calldata(),
            value: U256::ZERO,
        };
        let chain = MockChain::new()
            .with_transaction(transaction, ReceiptStatus::Success)
            .with_subscription(payer(), creator);

        let expected = ExpectedSettlement::HubCall { hub: hub(), intent };
        assert!(verify_payment(&chain, hash, payer(), &expected).await.is_ok());
    }

    #[tokio::test]
    async fn direct_transfer_requires_minimum_value() {
        let creator = EvmAddress(address!("0x4444444444444444444444444444444444444444"));
        let hash = tx_hash(10);
        let transaction = ChainTransaction {
            hash,
            from: payer(),
            to: Some(creator),
            input: Bytes::new(),
            value: U256::from(900u64),
        };
        let chain = MockChain::new().with_transaction(transaction, ReceiptStatus::Success);

        let expected = ExpectedSettlement::DirectTransfer {
            recipient: creator,
            min_amount: TokenAmount::from(1000u64),
            intent: PaymentIntent::Subscribe { creator },
        };
        let err = verify_payment(&chain, hash, payer(), &expected)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentInvalid::InsufficientAmount));
    }

    #[tokio::test]
    async fn direct_transfer_of_exactly_the_required_amount_passes() {
        let creator = EvmAddress(address!("0x4444444444444444444444444444444444444444"));
        let hash = tx_hash(12);
        let transaction = ChainTransaction {
            hash,
            from: payer(),
            to: Some(creator),
            input: Bytes::new(),
            value: U256::from(1000u64),
        };
        let chain = MockChain::new()
            .with_transaction(transaction, ReceiptStatus::Success)
            .with_subscription(payer(), creator);

        let expected = ExpectedSettlement::DirectTransfer {
            recipient: creator,
            min_amount: TokenAmount::from(1000u64),
            intent: PaymentIntent::Subscribe { creator },
        };
        assert!(verify_payment(&chain, hash, payer(), &expected).await.is_ok());
    }

    #[tokio::test]
    async fn direct_transfer_accepts_overpayment() {
        let creator = EvmAddress(address!("0x4444444444444444444444444444444444444444"));
        let hash = tx_hash(11);
        let transaction = ChainTransaction {
            hash,
            from: payer(),
            to: Some(creator),
            input: Bytes::new(),
            value: U256::from(1500u64),
        };
        let chain = MockChain::new()
            .with_transaction(transaction, ReceiptStatus::Success)
            .with_subscription(payer(), creator);

        let expected = ExpectedSettlement::DirectTransfer {
            recipient: creator,
            min_amount: TokenAmount::from(1000u64),
            intent: PaymentIntent::Subscribe { creator },
        };
        assert!(verify_payment(&chain, hash, payer(), &expected).await.is_ok());
    }

    #[test]
    fn calldata_is_deterministic_and_intent_specific() {
        let rent = PaymentIntent::Rent {
            content_id: U256::from(7u64),
        };
        let buy = PaymentIntent::Buy {
            content_id: U256::from(7u64),
        };
        assert_eq!(rent.calldata(), rent.calldata());
        assert_ne!(rent.calldata(), buy.calldata());

        let other_id = PaymentIntent::Rent {
            content_id: U256::from(8u64),
        };
        assert_ne!(rent.calldata(), other_id.calldata());
    }

    #[test]
    fn error_strings_are_stable() {
        assert_eq!(
            PaymentInvalid::NotConfirmed.to_string(),
            "Transaction not found or not yet confirmed"
        );
        assert_eq!(
            PaymentInvalid::FailedOnChain.to_string(),
            "Transaction failed on-chain"
        );
        assert_eq!(
            PaymentInvalid::SenderMismatch.to_string(),
            "Transaction sender mismatch"
        );
        assert_eq!(
            PaymentInvalid::RecipientMismatch.to_string(),
            "Transaction recipient mismatch"
        );
        assert_eq!(
            PaymentInvalid::CallDataMismatch.to_string(),
            "Transaction call data mismatch"
        );
        assert_eq!(
            PaymentInvalid::NotActivated.to_string(),
            "Payment confirmed but access not activated on-chain"
        );
    }

    #[test]
    fn hash_parses_from_header_value() {
        let s = format!("0x{}", "ab".repeat(32));
        assert!(TransactionHash::from_str(&s).is_ok());
    }
}
