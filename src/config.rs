//! Typed configuration for `aibtc-wallet-core`.
//!
//! The core never reaches into the environment itself — see the REDESIGN
//! FLAGS note on "environment-variable configuration": the embedding
//! application (CLI, MCP server, whatever) collects configuration and hands
//! this crate a fully-built [`Config`]. `Config::from_env` is provided only
//! as a convenience constructor for that embedding application; nothing
//! inside this crate calls it.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// The two chains this crate's addresses/signatures are bound to are always
/// derived together from a single network tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(ConfigError::InvalidValue(
                "network".to_string(),
                format!("unknown network: {other}"),
            )),
        }
    }
}

impl Network {
    /// SIP-018 / Stacks transaction chain-id, per spec: mainnet 1, testnet
    /// 0x80000000.
    pub fn stacks_chain_id(&self) -> u32 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 0x8000_0000,
        }
    }

    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        }
    }

    /// c32check address version byte for a standard single-sig Stacks
    /// address on this network.
    pub fn stacks_address_version(&self) -> u8 {
        match self {
            Network::Mainnet => 22,
            Network::Testnet => 26,
        }
    }
}

/// HTTP deadlines named explicitly in the specification's concurrency model.
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    /// x402 settlement calls: 120s (settlement can be slow).
    pub x402: Duration,
    /// Price-impact quoter pool reads: 5s per call.
    pub pool_read: Duration,
    /// sBTC deposit status polling interval (default 30s) and overall cap
    /// (2h), kept here as ambient config even though the deposit service
    /// itself is out of scope for this crate.
    pub deposit_poll_interval: Duration,
    pub deposit_poll_max: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            x402: Duration::from_secs(120),
            pool_read: Duration::from_secs(5),
            deposit_poll_interval: Duration::from_secs(30),
            deposit_poll_max: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// KDF selection + parameters for the encryption primitive (§4.A).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KdfParams {
    Argon2id {
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    },
    Pbkdf2Sha512 {
        iterations: u32,
    },
}

impl Default for KdfParams {
    fn default() -> Self {
        // argon2's documented interactive defaults.
        KdfParams::Argon2id {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Main configuration struct handed to every service constructor.
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    /// Root directory under which `wallets.json`, `wallets/`,
    /// `signing-keys.json`, `signing-keys/`, and `config.json` live.
    pub data_dir: PathBuf,
    /// 0 disables auto-lock.
    pub auto_lock_timeout_minutes: u32,
    pub http_timeouts: HttpTimeouts,
    pub kdf: KdfParams,
    pub log_level: String,
}

impl Config {
    pub fn new(network: Network, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            network,
            data_dir: data_dir.into(),
            auto_lock_timeout_minutes: 15,
            http_timeouts: HttpTimeouts::default(),
            kdf: KdfParams::default(),
            log_level: "info".to_string(),
        }
    }

    /// Convenience constructor for embedding binaries; never called
    /// internally by this crate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("AIBTC_NETWORK")
            .unwrap_or_else(|_| "mainnet".to_string())
            .parse()?;

        let data_dir = env::var("AIBTC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let auto_lock_timeout_minutes = env::var("AIBTC_AUTO_LOCK_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);

        let log_level = env::var("AIBTC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mut config = Config::new(network, data_dir);
        config.auto_lock_timeout_minutes = auto_lock_timeout_minutes;
        config.log_level = log_level;
        Ok(config)
    }
}

fn default_data_dir() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".aibtc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert!(matches!("mainnet".parse::<Network>(), Ok(Network::Mainnet)));
        assert!(matches!("testnet".parse::<Network>(), Ok(Network::Testnet)));
        assert!("invalid".parse::<Network>().is_err());
    }

    #[test]
    fn test_chain_ids() {
        assert_eq!(Network::Mainnet.stacks_chain_id(), 1);
        assert_eq!(Network::Testnet.stacks_chain_id(), 2147483648);
    }

    #[test]
    fn test_address_versions() {
        assert_eq!(Network::Mainnet.stacks_address_version(), 22);
        assert_eq!(Network::Testnet.stacks_address_version(), 26);
    }
}
