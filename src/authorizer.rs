//! Access authorization for already-paid (or free) content.
//!
//! Decides whether a wallet may fetch a piece of content right now, by
//! checking the grant sources in a fixed priority order: ownership, free
//! content, an active rental, then an active subscription. The first grant
//! wins and its reason is reported to the caller.
//!
//! Chain read failures degrade to denial, never to a grant. A denial caused
//! by a failed check is reported as a verification failure so the client
//! knows a retry may succeed without paying again.

use tracing::instrument;

use crate::chain::ContentChain;
use crate::types::{ContentId, EvmAddress};

/// Why access was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    Owner,
    Free,
    ActiveRental,
    ActiveSubscription,
}

impl AccessGrant {
    pub fn reason(&self) -> &'static str {
        match self {
            AccessGrant::Owner => "Content owner",
            AccessGrant::Free => "Content is free",
            AccessGrant::ActiveRental => "Active Rental",
            AccessGrant::ActiveSubscription => "Active Subscription",
        }
    }
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    /// No grant source applies. The client should go pay.
    PaymentRequired,
    /// At least one check could not be completed. Retrying may succeed
    /// without a new payment.
    VerificationFailed,
}

impl AccessDenial {
    pub fn reason(&self) -> &'static str {
        match self {
            AccessDenial::PaymentRequired => "Payment required",
            AccessDenial::VerificationFailed => "Verification failed",
        }
    }
}

/// Runs the grant checks for `user` against `content`.
///
/// `creator` is the content creator's wallet when the caller knows it; for
/// premium ids the on-chain listing supplies a fallback. Rental checks only
/// apply to premium (numeric) ids; blob-addressed content is gated by
/// ownership and subscription alone.
#[instrument(skip(chain), fields(user = %user, content = %content))]
pub async fn authorize_access(
    chain: &dyn ContentChain,
    user: EvmAddress,
    content: &ContentId,
    creator: Option<EvmAddress>,
) -> Result<AccessGrant, AccessDenial> {
    let mut degraded = false;

    match content {
        ContentId::Premium(content_id) => {
            if creator == Some(user) {
                return Ok(AccessGrant::Owner);
            }

            let listing = match chain.content_listing(*content_id).await {
                Ok(listing) => Some(listing),
                Err(error) => {
                    tracing::warn!(%error, "content listing read failed during authorization");
                    degraded = true;
                    None
                }
            };

            if let Some(listing) = &listing {
                if listing.creator == user {
                    return Ok(AccessGrant::Owner);
                }
                if listing.is_free {
                    return Ok(AccessGrant::Free);
                }
            }

            let subscription_target = creator.or_else(|| listing.as_ref().map(|l| l.creator));
            let (rental, subscription) = tokio::join!(chain.has_rental(user, *content_id), async {
                match subscription_target {
                    Some(target) => chain.has_subscription(user, target).await,
                    None => Ok(false),
                }
            });

            match rental {
                Ok(true) => return Ok(AccessGrant::ActiveRental),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%error, "rental check failed during authorization");
                    degraded = true;
                }
            }
            match subscription {
                Ok(true) => return Ok(AccessGrant::ActiveSubscription),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%error, "subscription check failed during authorization");
                    degraded = true;
                }
            }
        }
        ContentId::Blob(_) => {
            if let Some(creator) = creator {
                if creator == user {
                    return Ok(AccessGrant::Owner);
                }
                match chain.has_subscription(user, creator).await {
                    Ok(true) => return Ok(AccessGrant::ActiveSubscription),
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(%error, "subscription check failed during authorization");
                        degraded = true;
                    }
                }
            }
        }
    }

    Err(if degraded {
        AccessDenial::VerificationFailed
    } else {
        AccessDenial::PaymentRequired
    })
}
