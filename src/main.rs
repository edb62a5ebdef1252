//! Payment gate HTTP entrypoint.
//!
//! Launches the Axum server that fronts paid content access:
//! - `POST /x402/content` – 402 challenge / settlement for rent and buy
//! - `POST /x402/subscribe` – 402 challenge / settlement for subscriptions
//! - `POST /content/{id}/authorize` – signed fetch instruction for granted access
//! - `POST /upload` – storage upload proxy
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `NETWORK`, `RPC_URL_*`, `CREATOR_HUB_ADDRESS` select the chain
//! - `HOST`, `PORT` control binding address
//! - `OTEL_*` variables enable tracing export

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::set_header::SetResponseHeaderLayer;

use hubgate::auth::HttpIdentityProvider;
use hubgate::chain::evm::EvmChainReader;
use hubgate::from_env::GateConfig;
use hubgate::handlers::{self, AppState};
use hubgate::sig_down::SigDown;
use hubgate::storage::StorageClient;
use hubgate::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let _telemetry = telemetry::init(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = match GateConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Abort early if the chain is unreachable
    let chain =
        match EvmChainReader::connect(&config.rpc_url, config.hub_address, config.network).await {
            Ok(chain) => chain,
            Err(e) => {
                tracing::error!("Failed to connect chain reader: {}", e);
                std::process::exit(1);
            }
        };

    let identity = HttpIdentityProvider::new(config.identity_verify_url.clone());
    let storage = if config.storage_api_key.is_empty() {
        tracing::warn!("STORAGE_API_KEY not set, /upload is disabled");
        None
    } else {
        Some(Arc::new(StorageClient::new(
            config.storage_upload_url.clone(),
            config.storage_api_key.clone(),
        )))
    };

    let state = AppState::new(&config, Arc::new(chain), Arc::new(identity), storage);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(telemetry::http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(network = %config.network, "Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
