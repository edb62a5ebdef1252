//! HTTP endpoints implemented by the payment gate.
//!
//! Three protocol endpoints carry the whole flow: `POST /x402/content` and
//! `POST /x402/subscribe` issue 402 challenges and verify settlement
//! proofs, and `POST /content/{id}/authorize` turns an existing grant into
//! a signed fetch instruction. `POST /upload` proxies creator uploads to
//! the storage network so the API key stays server-side.
//!
//! Error strings are part of the wire contract with the client SDK; tests
//! pin the ones clients branch on.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::auth::{AuthError, Identity, IdentityProvider};
use crate::authorizer::authorize_access;
use crate::chain::ContentChain;
use crate::from_env::GateConfig;
use crate::idempotency::IdempotencyStore;
use crate::network::{Network, UsdcDeployment};
use crate::rate_limit::RateLimiter;
use crate::signing::FetchInstruction;
use crate::storage::StorageClient;
use crate::types::{
    ActivationStatus, AuthorizeRequest, ContentActivation, ContentChargeRequest, ErrorResponse,
    EvmAddress, PaymentMetadata, PaymentParameter, PurchaseAction, SubscribeAction,
    SubscribeChargeRequest, SubscriptionActivation, SubscriptionRecord, SubscriptionStatus,
    TransactionHash, UploadKeyQuery, X_PAYMENT_HEADER,
};
use crate::validation;
use crate::verifier::{ExpectedSettlement, PaymentIntent, verify_payment};

/// How long a settled subscription stays active.
const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<dyn ContentChain>,
    pub identity: Arc<dyn IdentityProvider>,
    pub storage: Option<Arc<StorageClient>>,
    pub idempotency: Arc<IdempotencyStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub network: Network,
    pub hub_address: EvmAddress,
    pub signing_secret: Option<String>,
    pub production: bool,
}

impl AppState {
    pub fn new(
        config: &GateConfig,
        chain: Arc<dyn ContentChain>,
        identity: Arc<dyn IdentityProvider>,
        storage: Option<Arc<StorageClient>>,
    ) -> Self {
        Self {
            chain,
            identity,
            storage,
            idempotency: Arc::new(IdempotencyStore::default()),
            rate_limiter: Arc::new(RateLimiter::default()),
            network: config.network,
            hub_address: config.hub_address,
            signing_secret: config.signing_secret.clone(),
            production: config.production,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/x402/content", post(post_content_charge))
        .route("/x402/subscribe", post(post_subscribe_charge))
        .route("/content/{id}/authorize", post(post_authorize))
        .route("/upload", post(post_upload))
        .route("/upload/key", get(get_upload_key))
}

/// Request failures, mapped onto the status codes and bodies clients
/// branch on.
#[derive(Debug)]
pub enum GateError {
    BadRequest(ErrorResponse),
    Unauthorized,
    Forbidden(ErrorResponse),
    NotFound(ErrorResponse),
    TooManyRequests { retry_after: u64 },
    Internal(ErrorResponse),
}

impl GateError {
    fn bad_request(message: &str) -> Self {
        GateError::BadRequest(ErrorResponse::new(message))
    }

    fn bad_request_with(message: &str, details: impl Into<String>) -> Self {
        GateError::BadRequest(ErrorResponse::with_details(message, details))
    }

    fn internal(message: &str) -> Self {
        GateError::Internal(ErrorResponse::new(message))
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::BadRequest(body) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
            GateError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Unauthorized")),
            )
                .into_response(),
            GateError::Forbidden(body) => (StatusCode::FORBIDDEN, Json(body)).into_response(),
            GateError::NotFound(body) => (StatusCode::NOT_FOUND, Json(body)).into_response(),
            GateError::TooManyRequests { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(ErrorResponse::with_details(
                    "Too many requests",
                    "Please wait before trying again",
                )),
            )
                .into_response(),
            GateError::Internal(body) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

/// `GET /`: greeting, mostly useful as a deployment smoke check.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "network": state.network.to_string(),
    }))
}

/// Resolves the bearer token to an authenticated user.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, GateError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(GateError::Unauthorized)?;
    match state.identity.authenticate(token).await {
        Ok(identity) => Ok(identity),
        Err(AuthError::Unauthorized) => Err(GateError::Unauthorized),
        Err(AuthError::Upstream(message)) => {
            tracing::error!(error = %message, "identity service failure");
            Err(GateError::internal("Authentication service unavailable"))
        }
    }
}

/// Pulls the settlement proof from the `X-PAYMENT` header.
///
/// Format is checked here, before any chain read: a malformed hash must be
/// rejected without touching the RPC.
fn extract_payment_proof(headers: &HeaderMap) -> Result<Option<TransactionHash>, GateError> {
    let Some(value) = headers.get(X_PAYMENT_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| GateError::bad_request("Invalid transaction hash format"))?;
    if !validation::is_valid_transaction_hash(raw) {
        return Err(GateError::bad_request("Invalid transaction hash format"));
    }
    let hash = raw
        .parse()
        .map_err(|_| GateError::bad_request("Invalid transaction hash format"))?;
    Ok(Some(hash))
}

/// Builds the 402 challenge response: metadata body plus mirror headers.
fn payment_challenge(metadata: PaymentMetadata) -> Response {
    let headers = [
        ("X-Accept-Payment", "erc20-transfer".to_string()),
        ("X-Payment-Chain-Id", metadata.chain_id.to_string()),
        ("X-Payment-Token", metadata.token_address.to_string()),
        ("X-Payment-Amount", metadata.amount.to_string()),
        ("X-Payment-Recipient", metadata.recipient.to_string()),
    ];
    (StatusCode::PAYMENT_REQUIRED, headers, Json(metadata)).into_response()
}

fn verification_failure(production: bool, error: crate::verifier::PaymentInvalid) -> GateError {
    tracing::warn!(%error, "payment verification failed");
    if production {
        GateError::bad_request("Payment verification failed")
    } else {
        GateError::bad_request_with("Payment verification failed", error.to_string())
    }
}

/// `POST /x402/content`: challenge/settle for renting or buying content.
///
/// Without an `X-PAYMENT` header the response is a 402 carrying payment
/// metadata priced from the live on-chain listing. With one, the referenced
/// transaction is verified and the activation result is returned.
#[instrument(skip_all)]
pub async fn post_content_charge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ContentChargeRequest>, JsonRejection>,
) -> Result<Response, GateError> {
    let identity = authenticate(&state, &headers).await?;
    if !state.rate_limiter.check(&identity.user_id) {
        return Err(GateError::TooManyRequests {
            retry_after: state.rate_limiter.retry_after(),
        });
    }

    let Json(body) = body.map_err(|_| GateError::bad_request("Invalid request body"))?;
    let (Some(content_id), Some(action), Some(wallet_address)) =
        (body.content_id, body.action, body.wallet_address)
    else {
        return Err(GateError::bad_request(
            "contentId, action and walletAddress are required",
        ));
    };

    if !validation::is_numeric_id(&content_id) {
        return Err(GateError::bad_request("contentId must be a numeric string"));
    }
    let numeric_id = content_id
        .parse::<alloy::primitives::U256>()
        .map_err(|_| GateError::bad_request("contentId must be a numeric string"))?;

    let action = match action.as_str() {
        "rent" => PurchaseAction::Rent,
        "buy" => PurchaseAction::Buy,
        _ => return Err(GateError::bad_request("action must be rent or buy")),
    };

    if !validation::is_valid_wallet_address(&wallet_address) {
        return Err(GateError::bad_request("Invalid wallet address format"));
    }
    let wallet: EvmAddress = wallet_address
        .parse()
        .map_err(|_| GateError::bad_request("Invalid wallet address format"))?;
    if !identity.owns_wallet(wallet) {
        return Err(GateError::Forbidden(ErrorResponse::new(
            "walletAddress does not belong to authenticated user",
        )));
    }

    let proof = extract_payment_proof(&headers)?;

    // Replays are served from the idempotency store without re-verifying
    // or touching the chain.
    if proof.is_some() {
        if let Some(key) = body.idempotency_key.as_deref() {
            if let Some(cached) = state.idempotency.get(key) {
                return Ok((StatusCode::OK, Json(cached)).into_response());
            }
        }
    }

    let listing = state
        .chain
        .content_listing(numeric_id)
        .await
        .map_err(|error| {
            tracing::error!(%error, content_id = %numeric_id, "content listing read failed");
            GateError::internal("Failed to fetch content pricing")
        })?;
    if !listing.active {
        return Err(GateError::bad_request("Content is not active"));
    }
    if listing.is_free {
        return Err(GateError::bad_request(
            "Content is free and does not require payment",
        ));
    }
    let usdc = UsdcDeployment::by_network(state.network);
    if listing.payment_token != usdc.address {
        return Err(GateError::bad_request(
            "Content is not configured for USDC x402 payments",
        ));
    }
    let price = match action {
        PurchaseAction::Rent => listing.rent_price,
        PurchaseAction::Buy => listing.full_price,
    };
    if price.is_zero() {
        return Err(GateError::bad_request(
            "Requested payment type is not available for this content",
        ));
    }

    let Some(hash) = proof else {
        let metadata = PaymentMetadata {
            chain_id: state.network.chain_id(),
            token_address: usdc.address,
            amount: price,
            recipient: state.hub_address,
            payment_parameter: PaymentParameter::Content {
                content_id: content_id.clone(),
                purchase_type: action,
                action,
            },
        };
        return Ok(payment_challenge(metadata));
    };

    let intent = match action {
        PurchaseAction::Rent => PaymentIntent::Rent {
            content_id: numeric_id,
        },
        PurchaseAction::Buy => PaymentIntent::Buy {
            content_id: numeric_id,
        },
    };
    let expected = ExpectedSettlement::HubCall {
        hub: state.hub_address,
        intent,
    };
    verify_payment(state.chain.as_ref(), hash, wallet, &expected)
        .await
        .map_err(|error| verification_failure(state.production, error))?;

    let activation = ContentActivation {
        status: ActivationStatus::Activated,
        action,
        content_id,
        transaction_hash: hash,
    };
    let result = serde_json::to_value(&activation)
        .map_err(|_| GateError::internal("Failed to encode response"))?;
    if let Some(key) = body.idempotency_key {
        state.idempotency.insert(key, result.clone());
    }
    Ok((StatusCode::OK, Json(result)).into_response())
}

/// `POST /x402/subscribe`: challenge/settle for a creator subscription.
#[instrument(skip_all)]
pub async fn post_subscribe_charge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SubscribeChargeRequest>, JsonRejection>,
) -> Result<Response, GateError> {
    let identity = authenticate(&state, &headers).await?;
    if !state.rate_limiter.check(&identity.user_id) {
        return Err(GateError::TooManyRequests {
            retry_after: state.rate_limiter.retry_after(),
        });
    }

    let Json(body) = body.map_err(|_| GateError::bad_request("Invalid request body"))?;
    let (Some(creator_address), Some(tier_id), Some(wallet_address)) =
        (body.creator_address, body.tier_id, body.wallet_address)
    else {
        return Err(GateError::bad_request_with(
            "Missing required fields",
            "creatorAddress, tierId, and walletAddress are required",
        ));
    };

    if !validation::is_valid_tier_id(tier_id) {
        return Err(GateError::bad_request_with(
            "Invalid tier ID",
            "Tier ID must be a number between 0 and 10",
        ));
    }
    if !validation::is_valid_wallet_address(&creator_address) {
        return Err(GateError::bad_request("Invalid creator address format"));
    }
    let creator: EvmAddress = creator_address
        .parse()
        .map_err(|_| GateError::bad_request("Invalid creator address format"))?;
    if !validation::is_valid_wallet_address(&wallet_address) {
        return Err(GateError::bad_request("Invalid wallet address format"));
    }
    let wallet: EvmAddress = wallet_address
        .parse()
        .map_err(|_| GateError::bad_request("Invalid wallet address format"))?;
    if !identity.owns_wallet(wallet) {
        return Err(GateError::Forbidden(ErrorResponse::new(
            "walletAddress does not belong to authenticated user",
        )));
    }
    if let Some(key) = body.idempotency_key.as_deref() {
        if !validation::is_valid_idempotency_key(key) {
            return Err(GateError::bad_request("Invalid idempotency key format"));
        }
    }

    let proof = extract_payment_proof(&headers)?;
    if proof.is_some() {
        if let Some(key) = body.idempotency_key.as_deref() {
            if let Some(cached) = state.idempotency.get(key) {
                return Ok((StatusCode::OK, Json(cached)).into_response());
            }
        }
    }

    let profile = state.chain.creator_profile(creator).await.map_err(|error| {
        tracing::error!(%error, %creator, "creator profile read failed");
        GateError::internal("Failed to fetch creator pricing")
    })?;
    if !profile.registered {
        return Err(GateError::NotFound(ErrorResponse::new(
            "Creator not registered",
        )));
    }
    if profile.subscription_price.is_zero() {
        return Err(GateError::bad_request(
            "Creator subscription price is invalid",
        ));
    }

    let usdc = UsdcDeployment::by_network(state.network);
    let Some(hash) = proof else {
        let metadata = PaymentMetadata {
            chain_id: state.network.chain_id(),
            token_address: usdc.address,
            amount: profile.subscription_price,
            recipient: state.hub_address,
            payment_parameter: PaymentParameter::Subscription {
                creator_address: creator,
                action: SubscribeAction::Subscribe,
            },
        };
        return Ok(payment_challenge(metadata));
    };

    let expected = ExpectedSettlement::HubCall {
        hub: state.hub_address,
        intent: PaymentIntent::Subscribe { creator },
    };
    verify_payment(state.chain.as_ref(), hash, wallet, &expected)
        .await
        .map_err(|error| verification_failure(state.production, error))?;

    let starts_at = Utc::now();
    let activation = SubscriptionActivation {
        status: ActivationStatus::Activated,
        subscription: SubscriptionRecord {
            id: format!("sub_{}", uuid::Uuid::new_v4()),
            creator_address: creator,
            tier_id,
            status: SubscriptionStatus::Active,
            starts_at,
            expires_at: starts_at + chrono::Duration::days(SUBSCRIPTION_PERIOD_DAYS),
            transaction_hash: hash,
        },
    };
    let result = serde_json::to_value(&activation)
        .map_err(|_| GateError::internal("Failed to encode response"))?;
    if let Some(key) = body.idempotency_key {
        state.idempotency.insert(key, result.clone());
    }
    Ok((StatusCode::OK, Json(result)).into_response())
}

/// `POST /content/{id}/authorize`: exchanges an existing access grant for a
/// signed, short-lived fetch instruction.
#[instrument(skip_all, fields(content_id = %id))]
pub async fn post_authorize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<AuthorizeRequest>, JsonRejection>,
) -> Result<Response, GateError> {
    let content = validation::parse_content_id(&id)
        .ok_or_else(|| GateError::bad_request("Invalid content ID format"))?;
    let identity = authenticate(&state, &headers).await?;
    let Some(secret) = state.signing_secret.as_deref() else {
        return Err(GateError::Internal(ErrorResponse::with_details(
            "Service configuration error",
            "Signing secret not configured",
        )));
    };
    let Json(body) = body.map_err(|_| GateError::bad_request("Invalid JSON body"))?;

    let wallet: EvmAddress = body
        .wallet_address
        .as_deref()
        .filter(|w| validation::is_valid_wallet_address(w))
        .and_then(|w| w.parse().ok())
        .ok_or_else(|| {
            GateError::bad_request("walletAddress is required and must be a valid EVM address")
        })?;
    if !identity.owns_wallet(wallet) {
        return Err(GateError::Forbidden(ErrorResponse::new(
            "walletAddress does not belong to authenticated user",
        )));
    }
    let creator: Option<EvmAddress> = match body.creator_address.as_deref() {
        None => None,
        Some(raw) if validation::is_valid_wallet_address(raw) => raw.parse().ok(),
        Some(_) => {
            return Err(GateError::bad_request("Invalid creator address format"));
        }
    };

    match authorize_access(state.chain.as_ref(), wallet, &content, creator).await {
        Ok(grant) => {
            let instruction =
                FetchInstruction::issue(content.to_string(), wallet.to_string(), secret)
                    .map_err(|_| GateError::internal("Failed to issue fetch instruction"))?;
            Ok((
                StatusCode::OK,
                Json(json!({
                    "authorized": true,
                    "accessReason": grant.reason(),
                    "fetchInstruction": instruction,
                })),
            )
                .into_response())
        }
        Err(denial) => Err(GateError::Forbidden(ErrorResponse::with_details(
            "Access denied",
            denial.reason(),
        ))),
    }
}

/// `POST /upload`: proxies a creator upload to the storage network.
#[instrument(skip_all)]
pub async fn post_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, GateError> {
    authenticate(&state, &headers).await?;
    let Some(storage) = state.storage.as_ref() else {
        return Err(GateError::internal("Storage not configured"));
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| GateError::bad_request("Invalid multipart body"))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|_| GateError::bad_request("Invalid multipart body"))?;
            let cid = storage
                .upload(file_name, data.to_vec())
                .await
                .map_err(|error| {
                    tracing::error!(%error, "storage upload failed");
                    GateError::internal("Upload failed")
                })?;
            return Ok((StatusCode::OK, Json(json!({ "cid": cid }))).into_response());
        }
    }
    Err(GateError::bad_request("file field is required"))
}

/// `GET /upload/key`: releases the storage API key to a registered creator
/// so large uploads can go to the storage network directly.
///
/// Creator status is read live from `creators(address)`; anyone else gets a
/// 403 and the key never leaves the server.
#[instrument(skip_all)]
pub async fn get_upload_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UploadKeyQuery>,
) -> Result<Response, GateError> {
    let identity = authenticate(&state, &headers).await?;
    let wallet: EvmAddress = query
        .wallet_address
        .as_deref()
        .filter(|w| validation::is_valid_wallet_address(w))
        .and_then(|w| w.parse().ok())
        .ok_or_else(|| {
            GateError::bad_request("walletAddress is required and must be a valid EVM address")
        })?;
    if !identity.owns_wallet(wallet) {
        return Err(GateError::Forbidden(ErrorResponse::new(
            "walletAddress does not belong to authenticated user",
        )));
    }
    let Some(storage) = state.storage.as_ref() else {
        return Err(GateError::internal("Storage not configured"));
    };

    let profile = state.chain.creator_profile(wallet).await.map_err(|error| {
        tracing::error!(%error, %wallet, "creator registration check failed");
        GateError::internal("Failed to verify creator registration")
    })?;
    if !profile.registered {
        return Err(GateError::Forbidden(ErrorResponse::new(
            "Creator access required",
        )));
    }

    Ok((StatusCode::OK, Json(json!({ "apiKey": storage.api_key() }))).into_response())
}
