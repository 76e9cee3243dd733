//! Supported networks.

use crate::ChainConfig;
use alloy_chains::NamedChain;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A network with a built-in [`ChainConfig`].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    /// Ethereum mainnet.
    #[default]
    Mainnet,
    /// The Sepolia testnet.
    Sepolia,
    /// The Holesky testnet.
    Holesky,
}

/// A network name or chain id that does not match a supported network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported network: {0}")]
pub struct NetworkParseError(pub String);

impl Network {
    /// Returns the execution chain id.
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Mainnet => NamedChain::Mainnet as u64,
            Self::Sepolia => NamedChain::Sepolia as u64,
            Self::Holesky => NamedChain::Holesky as u64,
        }
    }

    /// Looks up a network by chain id.
    pub const fn from_chain_id(id: u64) -> Option<Self> {
        match id {
            id if id == Self::Mainnet.chain_id() => Some(Self::Mainnet),
            id if id == Self::Sepolia.chain_id() => Some(Self::Sepolia),
            id if id == Self::Holesky.chain_id() => Some(Self::Holesky),
            _ => None,
        }
    }

    /// Returns the built-in configuration of this network.
    pub fn config(&self) -> ChainConfig {
        match self {
            Self::Mainnet => ChainConfig::mainnet(),
            Self::Sepolia => ChainConfig::sepolia(),
            Self::Holesky => ChainConfig::holesky(),
        }
    }
}

impl FromStr for Network {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "sepolia" => Ok(Self::Sepolia),
            "holesky" => Ok(Self::Holesky),
            other => other
                .parse::<u64>()
                .ok()
                .and_then(Self::from_chain_id)
                .ok_or_else(|| NetworkParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("mainnet", Network::Mainnet)]
    #[case("Sepolia", Network::Sepolia)]
    #[case("holesky", Network::Holesky)]
    #[case("1", Network::Mainnet)]
    #[case("11155111", Network::Sepolia)]
    #[case("17000", Network::Holesky)]
    fn test_parse_network(#[case] input: &str, #[case] expected: Network) {
        assert_eq!(input.parse::<Network>().unwrap(), expected);
    }

    #[rstest]
    #[case("goerli")]
    #[case("10")]
    #[case("")]
    fn test_parse_unsupported(#[case] input: &str) {
        let err = input.parse::<Network>().unwrap_err();
        assert_eq!(err, NetworkParseError(input.to_string()));
    }

    #[test]
    fn test_display_roundtrips() {
        for network in [Network::Mainnet, Network::Sepolia, Network::Holesky] {
            assert_eq!(network.to_string().parse::<Network>().unwrap(), network);
            assert_eq!(network.config().network, network);
        }
    }
}
