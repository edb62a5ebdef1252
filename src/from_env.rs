//! Process configuration from environment variables.

use std::env;
use std::net::IpAddr;
use url::Url;

use crate::network::Network;
use crate::types::EvmAddress;

pub const ENV_NETWORK: &str = "NETWORK";
pub const ENV_RPC_BASE: &str = "RPC_URL_BASE";
pub const ENV_RPC_BASE_SEPOLIA: &str = "RPC_URL_BASE_SEPOLIA";
pub const ENV_CREATOR_HUB_ADDRESS: &str = "CREATOR_HUB_ADDRESS";
pub const ENV_CONTENT_SIGNING_SECRET: &str = "CONTENT_SIGNING_SECRET";
pub const ENV_DEPLOYMENT_ENV: &str = "DEPLOYMENT_ENV";
pub const ENV_IDENTITY_VERIFY_URL: &str = "IDENTITY_VERIFY_URL";
pub const ENV_STORAGE_UPLOAD_URL: &str = "STORAGE_UPLOAD_URL";
pub const ENV_STORAGE_API_KEY: &str = "STORAGE_API_KEY";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";

const DEFAULT_STORAGE_UPLOAD_URL: &str = "https://node.lighthouse.storage/api/v0/add";

pub fn rpc_env_name_from_network(network: Network) -> &'static str {
    match network {
        Network::Base => ENV_RPC_BASE,
        Network::BaseSepolia => ENV_RPC_BASE_SEPOLIA,
    }
}

/// Everything the gate needs to run, resolved once at startup.
///
/// The signing secret stays optional here: the authorize endpoint reports
/// its absence as a service configuration error at request time instead of
/// refusing to boot, so payment endpoints keep working without it.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub network: Network,
    pub rpc_url: String,
    pub hub_address: EvmAddress,
    pub signing_secret: Option<String>,
    pub production: bool,
    pub identity_verify_url: Url,
    pub storage_upload_url: Url,
    pub storage_api_key: String,
    pub host: IpAddr,
    pub port: u16,
}

impl GateConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let network = match env::var(ENV_NETWORK) {
            Ok(name) => name.parse::<Network>()?,
            Err(_) => Network::BaseSepolia,
        };

        let rpc_env = rpc_env_name_from_network(network);
        let rpc_url = env::var(rpc_env).map_err(|_| format!("env {rpc_env} not set"))?;

        let hub_address = match env::var(ENV_CREATOR_HUB_ADDRESS) {
            Ok(raw) => raw
                .parse()
                .map_err(|_| format!("env {ENV_CREATOR_HUB_ADDRESS} is not a valid address"))?,
            Err(_) => EvmAddress(crate::network::DEFAULT_CREATOR_HUB_ADDRESS),
        };

        let signing_secret = env::var(ENV_CONTENT_SIGNING_SECRET)
            .ok()
            .filter(|s| !s.is_empty());

        let production = env::var(ENV_DEPLOYMENT_ENV)
            .map(|v| v == "production")
            .unwrap_or(false);

        let identity_verify_url = env::var(ENV_IDENTITY_VERIFY_URL)
            .map_err(|_| format!("env {ENV_IDENTITY_VERIFY_URL} not set"))?
            .parse::<Url>()
            .map_err(|_| format!("env {ENV_IDENTITY_VERIFY_URL} is not a valid URL"))?;

        let storage_upload_url = env::var(ENV_STORAGE_UPLOAD_URL)
            .unwrap_or_else(|_| DEFAULT_STORAGE_UPLOAD_URL.to_string())
            .parse::<Url>()
            .map_err(|_| format!("env {ENV_STORAGE_UPLOAD_URL} is not a valid URL"))?;
        let storage_api_key = env::var(ENV_STORAGE_API_KEY).unwrap_or_default();

        let host = env::var(ENV_HOST)
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse::<IpAddr>()
            .map_err(|_| format!("env {ENV_HOST} is not a valid IP address"))?;
        let port = env::var(ENV_PORT)
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| format!("env {ENV_PORT} is not a valid port"))?;

        Ok(Self {
            network,
            rpc_url,
            hub_address,
            signing_secret,
            production,
            identity_verify_url,
            storage_upload_url,
            storage_api_key,
            host,
            port,
        })
    }
}
