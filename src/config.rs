//! Escrow Service Configuration
//!
//! Per-network ledger gateway endpoints and contract addresses. Supports
//! loading from environment variables with ESCROW_ prefix. Networks are an
//! open set of configuration entries so tests can inject fake networks
//! without code changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::error::{EscrowError, EscrowResult};

/// Configuration for one ledger network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Short identifier used in API calls (e.g. "sepolia")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Chain identifier, checked against the gateway on connect
    pub chain_id: u64,
    /// Ledger gateway RPC endpoint URL
    pub rpc_url: String,
    /// Deployed escrow contract address
    pub escrow_contract: String,
    /// Key reference for privileged submissions; absence fails fast before
    /// any network call
    pub operator_key: Option<String>,
    /// Token symbol -> token contract address
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl NetworkConfig {
    /// Fail fast on a network entry that cannot back any adapter call
    pub fn validate(&self) -> EscrowResult<()> {
        if self.id.trim().is_empty() {
            return Err(EscrowError::Configuration(
                "network id must not be empty".to_string(),
            ));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(EscrowError::Configuration(format!(
                "network '{}' has no RPC URL",
                self.id
            )));
        }
        if self.escrow_contract.trim().is_empty() {
            return Err(EscrowError::Configuration(format!(
                "network '{}' has no escrow contract address",
                self.id
            )));
        }
        if self.chain_id == 0 {
            return Err(EscrowError::Configuration(format!(
                "network '{}' has chain id 0",
                self.id
            )));
        }
        Ok(())
    }

    /// Token contract address for a configured symbol
    pub fn token_contract(&self, symbol: &str) -> EscrowResult<&str> {
        self.tokens.get(symbol).map(String::as_str).ok_or_else(|| {
            EscrowError::Validation(format!(
                "token '{}' is not configured on network '{}'",
                symbol, self.id
            ))
        })
    }

    /// Operator key for privileged submissions
    pub fn require_operator_key(&self) -> EscrowResult<&str> {
        self.operator_key.as_deref().ok_or_else(|| {
            EscrowError::Configuration(format!(
                "no operator key configured for network '{}'",
                self.id
            ))
        })
    }
}

/// Static network description exposed to read-only callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub chain_id: u64,
}

/// Retry policy for read-side ledger calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Configured ledger networks
    pub networks: Vec<NetworkConfig>,
    /// Read-call retry policy
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl EscrowConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - ESCROW_NETWORKS: comma-separated network ids
    ///
    /// Per network `<ID>` (uppercased):
    /// - ESCROW_<ID>_NAME: display name (defaults to the id)
    /// - ESCROW_<ID>_CHAIN_ID: chain identifier
    /// - ESCROW_<ID>_RPC_URL: gateway endpoint URL
    /// - ESCROW_<ID>_CONTRACT: escrow contract address
    /// - ESCROW_<ID>_OPERATOR_KEY: key reference for privileged submissions
    /// - ESCROW_<ID>_TOKENS: comma-separated SYMBOL=address pairs
    /// - ESCROW_<ID>_TIMEOUT: request timeout in seconds
    pub fn from_env() -> Self {
        let ids = env::var("ESCROW_NETWORKS").unwrap_or_default();
        let networks = ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(network_from_env)
            .collect();

        Self {
            networks,
            retry: RetryPolicy::default(),
        }
    }

    /// Single local development network against a gateway on localhost
    pub fn development() -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(
            "USDC".to_string(),
            "0x0000000000000000000000000000000000000100".to_string(),
        );
        Self {
            networks: vec![NetworkConfig {
                id: "localhost".to_string(),
                name: "Local Devnet".to_string(),
                chain_id: 31_337,
                rpc_url: "http://127.0.0.1:8545".to_string(),
                escrow_contract: "0x0000000000000000000000000000000000000042".to_string(),
                operator_key: Some("dev-operator".to_string()),
                tokens,
                timeout_secs: 10,
            }],
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
            },
        }
    }

    /// Validate all configured networks, rejecting duplicates
    pub fn validate(&self) -> EscrowResult<()> {
        if self.networks.is_empty() {
            return Err(EscrowError::Configuration(
                "no ledger networks configured".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for network in &self.networks {
            network.validate()?;
            if !seen.insert(network.id.as_str()) {
                return Err(EscrowError::Configuration(format!(
                    "duplicate network id '{}'",
                    network.id
                )));
            }
        }
        Ok(())
    }

    /// Lookup a network entry by id
    pub fn network(&self, id: &str) -> EscrowResult<&NetworkConfig> {
        self.networks.iter().find(|n| n.id == id).ok_or_else(|| {
            EscrowError::Configuration(format!("unknown network '{}'", id))
        })
    }

    /// Static configuration listing, no ledger call
    pub fn supported_networks(&self) -> Vec<NetworkInfo> {
        self.networks
            .iter()
            .map(|n| NetworkInfo {
                id: n.id.clone(),
                name: n.name.clone(),
                chain_id: n.chain_id,
            })
            .collect()
    }
}

fn network_from_env(id: &str) -> NetworkConfig {
    let upper = id.to_uppercase().replace('-', "_");
    let var = |suffix: &str| env::var(format!("ESCROW_{}_{}", upper, suffix)).ok();

    let tokens = var("TOKENS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|pair| {
            let (symbol, address) = pair.split_once('=')?;
            let symbol = symbol.trim();
            let address = address.trim();
            if symbol.is_empty() || address.is_empty() {
                return None;
            }
            Some((symbol.to_string(), address.to_string()))
        })
        .collect();

    NetworkConfig {
        id: id.to_string(),
        name: var("NAME").unwrap_or_else(|| id.to_string()),
        chain_id: var("CHAIN_ID").and_then(|s| s.parse().ok()).unwrap_or(0),
        rpc_url: var("RPC_URL").unwrap_or_default(),
        escrow_contract: var("CONTRACT").unwrap_or_default(),
        operator_key: var("OPERATOR_KEY"),
        tokens,
        timeout_secs: var("TIMEOUT").and_then(|s| s.parse().ok()).unwrap_or(30),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_config_is_valid() {
        let config = EscrowConfig::development();
        config.validate().unwrap();
        assert_eq!(config.networks.len(), 1);
        assert_eq!(config.networks[0].chain_id, 31_337);
    }

    #[test]
    fn test_validate_rejects_missing_rpc_url() {
        let mut config = EscrowConfig::development();
        config.networks[0].rpc_url = String::new();
        assert!(matches!(
            config.validate(),
            Err(EscrowError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut config = EscrowConfig::development();
        let dup = config.networks[0].clone();
        config.networks.push(dup);
        assert!(matches!(
            config.validate(),
            Err(EscrowError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_network_list() {
        let config = EscrowConfig {
            networks: vec![],
            retry: RetryPolicy::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_lookup() {
        let config = EscrowConfig::development();
        assert!(config.network("localhost").is_ok());
        assert!(matches!(
            config.network("mainnet"),
            Err(EscrowError::Configuration(_))
        ));
    }

    #[test]
    fn test_supported_networks_is_static() {
        let config = EscrowConfig::development();
        let networks = config.supported_networks();
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].id, "localhost");
        assert_eq!(networks[0].chain_id, 31_337);
    }

    #[test]
    fn test_token_contract_lookup() {
        let config = EscrowConfig::development();
        let network = config.network("localhost").unwrap();
        assert!(network.token_contract("USDC").is_ok());
        assert!(matches!(
            network.token_contract("DAI"),
            Err(EscrowError::Validation(_))
        ));
    }

    #[test]
    fn test_require_operator_key() {
        let mut config = EscrowConfig::development();
        assert!(config.networks[0].require_operator_key().is_ok());
        config.networks[0].operator_key = None;
        assert!(matches!(
            config.networks[0].require_operator_key(),
            Err(EscrowError::Configuration(_))
        ));
    }
}
