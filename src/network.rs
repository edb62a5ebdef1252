//! Supported networks and the canonical contract deployments on each.
//!
//! The marketplace settles on Base (production) and Base Sepolia (testnet).
//! Every payment is denominated in the canonical USDC deployment of the
//! selected network and routed through the `CreatorHub` contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::EvmAddress;

/// Networks this gateway can verify payments on.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
}

impl Network {
    /// Numeric chain id used in transactions and payment metadata.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
        }
    }

    pub fn variants() -> &'static [Network] {
        &[Network::Base, Network::BaseSepolia]
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Network::Base),
            "base-sepolia" => Ok(Network::BaseSepolia),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}

/// Canonical USDC deployment for a network.
///
/// Content prices and subscription prices are stored on-chain in USDC base
/// units (6 decimals), and the 402 challenge advertises this token address.
pub struct UsdcDeployment {
    pub address: EvmAddress,
    pub decimals: u8,
}

impl UsdcDeployment {
    pub fn by_network(network: Network) -> &'static UsdcDeployment {
        static USDC_BASE: UsdcDeployment = UsdcDeployment {
            address: EvmAddress(alloy::primitives::address!(
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
            )),
            decimals: 6,
        };
        static USDC_BASE_SEPOLIA: UsdcDeployment = UsdcDeployment {
            address: EvmAddress(alloy::primitives::address!(
                "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
            )),
            decimals: 6,
        };
        match network {
            Network::Base => &USDC_BASE,
            Network::BaseSepolia => &USDC_BASE_SEPOLIA,
        }
    }
}

/// Default `CreatorHub` deployment on Base Sepolia.
///
/// Can be overridden via `CREATOR_HUB_ADDRESS`; see [`crate::from_env`].
pub const DEFAULT_CREATOR_HUB_ADDRESS: alloy::primitives::Address =
    alloy::primitives::address!("0xc567c6112720d8190caa4e93086cd36e2ae01d37");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_match_canonical_values() {
        assert_eq!(Network::Base.chain_id(), 8453);
        assert_eq!(Network::BaseSepolia.chain_id(), 84532);
    }

    #[test]
    fn network_round_trips_through_str() {
        for network in Network::variants() {
            let parsed: Network = network.to_string().parse().expect("parses");
            assert_eq!(parsed, *network);
        }
    }

    #[test]
    fn usdc_deployments_are_distinct_per_network() {
        let mainnet = UsdcDeployment::by_network(Network::Base);
        let testnet = UsdcDeployment::by_network(Network::BaseSepolia);
        assert_ne!(mainnet.address, testnet.address);
        assert_eq!(mainnet.decimals, 6);
        assert_eq!(testnet.decimals, 6);
    }
}
