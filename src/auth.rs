//! Caller identity.
//!
//! Payment endpoints are authenticated: the bearer token names a user, and
//! the wallet a request claims to pay from must belong to that user. The
//! actual token verification lives behind [`IdentityProvider`] so the HTTP
//! layer can be exercised with a canned implementation in tests; the real
//! one defers to the platform's identity service over HTTP.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::types::EvmAddress;

/// An authenticated user and the wallets linked to their account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub wallets: Vec<EvmAddress>,
}

impl Identity {
    /// Whether `wallet` is linked to this user's account.
    pub fn owns_wallet(&self, wallet: EvmAddress) -> bool {
        self.wallets.contains(&wallet)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The token is missing, malformed, expired, or revoked.
    #[error("Unauthorized")]
    Unauthorized,
    /// The identity service could not be reached or answered garbage.
    #[error("identity service unavailable: {0}")]
    Upstream(String),
}

/// Verifies bearer tokens and resolves them to an [`Identity`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, bearer_token: &str) -> Result<Identity, AuthError>;
}

/// Wire shape of the identity service's verification response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    user_id: String,
    #[serde(default)]
    wallets: Vec<String>,
}

/// [`IdentityProvider`] backed by the platform identity service.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    verify_url: Url,
}

impl HttpIdentityProvider {
    pub fn new(verify_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            verify_url,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, bearer_token: &str) -> Result<Identity, AuthError> {
        let response = self
            .http
            .get(self.verify_url.clone())
            .bearer_auth(bearer_token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(AuthError::Upstream(format!(
                "identity service returned {}",
                response.status()
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        // Wallets the identity service reports in a shape we cannot parse
        // are dropped rather than failing the whole login.
        let wallets = body
            .wallets
            .iter()
            .filter_map(|w| w.parse().ok())
            .collect();
        Ok(Identity {
            user_id: body.user_id,
            wallets,
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! Canned [`IdentityProvider`] for HTTP-layer tests.

    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct StaticIdentityProvider {
        tokens: HashMap<String, Identity>,
    }

    impl StaticIdentityProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_user(
            mut self,
            token: &str,
            user_id: &str,
            wallets: Vec<EvmAddress>,
        ) -> Self {
            self.tokens.insert(
                token.to_string(),
                Identity {
                    user_id: user_id.to_string(),
                    wallets,
                },
            );
            self
        }
    }

    #[async_trait]
    impl IdentityProvider for StaticIdentityProvider {
        async fn authenticate(&self, bearer_token: &str) -> Result<Identity, AuthError> {
            self.tokens
                .get(bearer_token)
                .cloned()
                .ok_or(AuthError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn wallet_ownership_matches_linked_wallets_only() {
        let mine = EvmAddress(address!("0x1111111111111111111111111111111111111111"));
        let other = EvmAddress(address!("0x2222222222222222222222222222222222222222"));
        let identity = Identity {
            user_id: "user-1".to_string(),
            wallets: vec![mine],
        };
        assert!(identity.owns_wallet(mine));
        assert!(!identity.owns_wallet(other));
    }

    #[test]
    fn verify_response_tolerates_missing_wallets() {
        let body: VerifyResponse = serde_json::from_str(r#"{"userId":"user-1"}"#).unwrap();
        assert_eq!(body.user_id, "user-1");
        assert!(body.wallets.is_empty());
    }

    #[test]
    fn unparseable_wallets_are_dropped_not_fatal() {
        let body: VerifyResponse = serde_json::from_str(
            r#"{"userId":"user-1","wallets":["0x1111111111111111111111111111111111111111","not-an-address"]}"#,
        )
        .unwrap();
        let wallets: Vec<EvmAddress> = body.wallets.iter().filter_map(|w| w.parse().ok()).collect();
        assert_eq!(wallets.len(), 1);
    }
}
