use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Rootstock testnet chain id. Swaps on this network are simulated locally.
pub const RSK_TESTNET_CHAIN_ID: u64 = 31;

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default = "default_rpc_url")]
    pub url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_rpc_url() -> String {
    "https://public-node.testnet.rsk.co".to_string()
}
fn default_chain_id() -> u64 {
    RSK_TESTNET_CHAIN_ID
}
fn default_request_timeout_ms() -> u64 {
    8_000
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            chain_id: default_chain_id(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Deployed contract addresses. Kept as strings so a half-configured
/// deployment still loads; they are parsed where they are used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Contracts {
    #[serde(default)]
    pub factory: String,
    #[serde(default)]
    pub router: String,
    #[serde(default)]
    pub rebalancer: String,
    #[serde(default)]
    pub wrbtc: String,
}

impl Contracts {
    pub fn factory_address(&self) -> Option<Address> {
        parse_address(&self.factory)
    }

    /// Every configured contract as `(name, raw address)`, in a stable order.
    pub fn named(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("factory", self.factory.as_str()),
            ("router", self.router.as_str()),
            ("rebalancer", self.rebalancer.as_str()),
            ("wrbtc", self.wrbtc.as_str()),
        ]
    }
}

fn parse_address(raw: &str) -> Option<Address> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Address::from_str(trimmed).ok()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    Absolute,
    Relative,
}

impl Default for ThresholdKind {
    fn default() -> Self {
        ThresholdKind::Absolute
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rebalance {
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,
    #[serde(default)]
    pub threshold_policy: ThresholdKind,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_price_impact_pct")]
    pub max_price_impact_pct: f64,
    #[serde(default = "default_gas_limit")]
    pub default_gas_limit: u64,
}

fn default_target_ratio() -> f64 {
    1.0
}
fn default_threshold() -> f64 {
    0.1
}
fn default_max_price_impact_pct() -> f64 {
    5.0
}
fn default_gas_limit() -> u64 {
    200_000
}

impl Default for Rebalance {
    fn default() -> Self {
        Self {
            target_ratio: default_target_ratio(),
            threshold_policy: ThresholdKind::default(),
            threshold: default_threshold(),
            max_price_impact_pct: default_max_price_impact_pct(),
            default_gas_limit: default_gas_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Aggregator {
    #[serde(default = "default_aggregator_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_aggregator_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_aggregator_base_url() -> String {
    "https://api.1inch.dev".to_string()
}
fn default_aggregator_timeout_ms() -> u64 {
    5_000
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            base_url: default_aggregator_base_url(),
            api_key: None,
            timeout_ms: default_aggregator_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Registry {
    /// JSON snapshot location. `None` keeps the registry purely in memory.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub autosave: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Discovery {
    #[serde(default = "default_discovery_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_max_pairs")]
    pub max_pairs: u64,
    /// Where the last successful initialization timestamp is kept.
    #[serde(default)]
    pub state_path: Option<String>,
}

fn default_discovery_interval() -> u64 {
    300
}
fn default_cooldown_seconds() -> u64 {
    600
}
fn default_max_pairs() -> u64 {
    500
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            interval_seconds: default_discovery_interval(),
            cooldown_seconds: default_cooldown_seconds(),
            max_pairs: default_max_pairs(),
            state_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Prometheus listener, only used with the `observability` feature.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            metrics_addr: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub contracts: Contracts,
    #[serde(default)]
    pub rebalance: Rebalance,
    #[serde(default)]
    pub aggregator: Aggregator,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads the TOML file at `path` (optional) and applies environment
    /// overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_string("RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(raw) = env_string("CHAIN_ID") {
            match raw.parse() {
                Ok(id) => self.rpc.chain_id = id,
                Err(e) => eprintln!("Ignoring CHAIN_ID={}: {}", raw, e),
            }
        }
        if let Some(addr) = env_string("FACTORY_ADDRESS") {
            self.contracts.factory = addr;
        }
        if let Some(addr) = env_string("ROUTER_ADDRESS") {
            self.contracts.router = addr;
        }
        if let Some(addr) = env_string("REBALANCER_ADDRESS") {
            self.contracts.rebalancer = addr;
        }
        if let Some(addr) = env_string("WRBTC_ADDRESS") {
            self.contracts.wrbtc = addr;
        }
        if let Some(key) = env_string("ONEINCH_API_KEY") {
            self.aggregator.api_key = Some(key);
        }
        if let Some(url) = env_string("AGGREGATOR_BASE_URL") {
            self.aggregator.base_url = url;
        }
        if let Some(path) = env_string("REGISTRY_PATH") {
            self.registry.path = Some(path);
        }
        if let Some(addr) = env_string("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.rebalance;
        if !(r.target_ratio > 0.0) {
            return Err(ConfigError::Message(format!(
                "rebalance.target_ratio must be positive, got {}",
                r.target_ratio
            )));
        }
        if r.threshold < 0.0 || !r.threshold.is_finite() {
            return Err(ConfigError::Message(format!(
                "rebalance.threshold must be a non-negative number, got {}",
                r.threshold
            )));
        }
        if !(r.max_price_impact_pct > 0.0 && r.max_price_impact_pct <= 100.0) {
            return Err(ConfigError::Message(format!(
                "rebalance.max_price_impact_pct must be in (0, 100], got {}",
                r.max_price_impact_pct
            )));
        }
        Ok(())
    }

    pub fn is_mock_network(&self) -> bool {
        self.rpc.chain_id == RSK_TESTNET_CHAIN_ID
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.rebalance.threshold, 0.1);
        assert_eq!(settings.rebalance.max_price_impact_pct, 5.0);
        assert_eq!(settings.rebalance.default_gas_limit, 200_000);
        assert_eq!(settings.discovery.cooldown_seconds, 600);
        assert!(settings.is_mock_network());
    }

    #[test]
    fn rejects_non_positive_target() {
        let mut settings = Settings::default();
        settings.rebalance.target_ratio = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_impact_ceiling_out_of_range() {
        let mut settings = Settings::default();
        settings.rebalance.max_price_impact_pct = 150.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn blank_contract_addresses_parse_to_none() {
        let mut contracts = Contracts {
            factory: "  ".to_string(),
            ..Default::default()
        };
        assert!(contracts.factory_address().is_none());
        contracts.factory = "0x00000000000000000000000000000000000000aa".to_string();
        assert!(contracts.factory_address().is_some());
    }
}
