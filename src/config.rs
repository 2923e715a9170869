//! Configuration loader: per-network protocol addresses and orchestrator settings.

use crate::errors::{AppError, Result};
use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// ERC20 token metadata for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Protocol addresses and token metadata for one network.
///
/// Resolved once and handed to sequence builders; never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    #[serde(default)]
    pub lending_pool_addresses_provider: Option<Address>,
    #[serde(default)]
    pub swap_router: Option<Address>,
    #[serde(default)]
    pub position_manager: Option<Address>,
    /// Chainlink-style feeds keyed by upper-case pair name, e.g. "DAI/ETH".
    #[serde(default)]
    pub price_feeds: HashMap<String, Address>,
    /// Tokens keyed by upper-case symbol.
    #[serde(default)]
    pub tokens: HashMap<String, TokenInfo>,
}

impl NetworkConfig {
    pub fn token(&self, symbol: &str) -> Result<&TokenInfo> {
        self.tokens.get(&symbol.to_uppercase()).ok_or_else(|| {
            AppError::Configuration(format!("token {symbol} not configured for {}", self.name))
        })
    }

    pub fn price_feed(&self, pair: &str) -> Result<Address> {
        self.price_feeds.get(&pair.to_uppercase()).copied().ok_or_else(|| {
            AppError::Configuration(format!("price feed {pair} not configured for {}", self.name))
        })
    }

    pub fn lending_pool_addresses_provider(&self) -> Result<Address> {
        self.require(self.lending_pool_addresses_provider, "lending pool addresses provider")
    }

    pub fn swap_router(&self) -> Result<Address> {
        self.require(self.swap_router, "swap router")
    }

    pub fn position_manager(&self) -> Result<Address> {
        self.require(self.position_manager, "position manager")
    }

    fn require(&self, value: Option<Address>, what: &str) -> Result<Address> {
        value.ok_or_else(|| {
            AppError::Configuration(format!(
                "{what} not configured for {} (chain {})",
                self.name, self.chain_id
            ))
        })
    }
}

/// All known networks keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: HashMap<u64, NetworkConfig>,
}

impl NetworkRegistry {
    /// Networks shipped with the crate: a mainnet fork on localhost and goerli.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert(localhost());
        registry.insert(goerli());
        registry
    }

    /// Load a JSON array of `NetworkConfig`s.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let networks: Vec<NetworkConfig> = serde_json::from_str(raw)?;
        let mut registry = Self::default();
        for network in networks {
            registry.insert(network);
        }
        Ok(registry)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Add or replace a network. Token and feed keys are upper-cased so that
    /// lookups are case-insensitive whatever the source file used.
    pub fn insert(&mut self, mut network: NetworkConfig) {
        network.tokens = network
            .tokens
            .into_iter()
            .map(|(symbol, info)| (symbol.to_uppercase(), info))
            .collect();
        network.price_feeds = network
            .price_feeds
            .into_iter()
            .map(|(pair, feed)| (pair.to_uppercase(), feed))
            .collect();
        self.networks.insert(network.chain_id, network);
    }

    /// Resolve the immutable configuration for `chain_id`.
    pub fn resolve(&self, chain_id: u64) -> Result<NetworkConfig> {
        self.networks
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("no network configured for chain {chain_id}")))
    }
}

fn token(symbol: &str, address: Address, decimals: u8) -> (String, TokenInfo) {
    (
        symbol.to_string(),
        TokenInfo {
            address,
            symbol: symbol.to_string(),
            decimals,
        },
    )
}

fn localhost() -> NetworkConfig {
    NetworkConfig {
        chain_id: 31337,
        name: "localhost".into(),
        lending_pool_addresses_provider: Some(address!("B53C1a33016B2DC2fF3653530bfF1848a515c8c5")),
        swap_router: Some(address!("E592427A0AEce92De3Edee1F18E0157C05861564")),
        position_manager: Some(address!("C36442b4a4522E871399CD717aBDD847Ab11FE88")),
        price_feeds: HashMap::from([(
            "DAI/ETH".to_string(),
            address!("773616E4d11A78F511299002da57A0a94577F1f4"),
        )]),
        tokens: HashMap::from([
            token("WETH", address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), 18),
            token("DAI", address!("6b175474e89094c44da98b954eedeac495271d0f"), 18),
            token("USDC", address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), 6),
            token("UNI", address!("1f9840a85d5aF5bf1D1762F925BDADdC4201F984"), 18),
        ]),
    }
}

fn goerli() -> NetworkConfig {
    NetworkConfig {
        chain_id: 5,
        name: "goerli".into(),
        lending_pool_addresses_provider: Some(address!("5E52dEc931FFb32f609681B8438A51c675cc232d")),
        swap_router: None,
        position_manager: None,
        price_feeds: HashMap::from([
            (
                "ETH/USD".to_string(),
                address!("D4a33860578De61DBAbDc8BFdb98FD742fA7028e"),
            ),
            (
                "DAI/ETH".to_string(),
                address!("b4c4a493AB6356497713A78FFA6c60FB53517c63"),
            ),
        ]),
        tokens: HashMap::from([
            token("WETH", address!("B4FBF271143F4FBf7B91A5ded31805e42b2208d6"), 18),
            token("DAI", address!("326C977E6efc84E512bB9C30f76E30c160eD06FB"), 18),
        ]),
    }
}

/// Execution settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Confirmations awaited before a step counts as final.
    pub confirmations: usize,
    /// Upper bound on a single confirmation wait.
    pub confirmation_timeout: Duration,
    /// Attempts for transient failures, including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Lifetime of swap and mint deadlines.
    pub deadline_ttl: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confirmations: 1,
            confirmation_timeout: Duration::from_secs(120),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
            deadline_ttl: Duration::from_secs(600),
        }
    }
}

impl OrchestratorSettings {
    /// Load settings from environment variables (and a `.env` file if present),
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let settings = Self {
            confirmations: env_or("CONFIRMATIONS", defaults.confirmations)?,
            confirmation_timeout: Duration::from_secs(env_or(
                "CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout.as_secs(),
            )?),
            max_attempts: env_or("MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_backoff: Duration::from_millis(env_or(
                "INITIAL_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(env_or(
                "MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )?),
            deadline_ttl: Duration::from_secs(env_or(
                "DEADLINE_TTL_SECS",
                defaults.deadline_ttl.as_secs(),
            )?),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirmations == 0 {
            return Err(AppError::Configuration("CONFIRMATIONS must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Configuration("MAX_ATTEMPTS must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("{key} has an invalid value: {raw}"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}
