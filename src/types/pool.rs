use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// One side of a pool: the token address plus what is needed to display and
/// normalize its reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// A discovered liquidity pool as tracked by the registry.
///
/// `current_ratio` is `reserve_a / reserve_b` in token units, or `0` when
/// `reserve_b` is zero. Reserves and total supply are raw on-chain integers
/// kept as base-10 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub address: Address,
    pub token_a: TokenRef,
    pub token_b: TokenRef,
    pub reserve_a: String,
    pub reserve_b: String,
    pub total_supply: String,
    pub current_ratio: f64,
    pub target_ratio: f64,
    pub needs_rebalancing: bool,
    pub tvl: f64,
    pub volume_24h: f64,
    pub fees_24h: f64,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub rebalance_count: u64,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Pool {
    /// A freshly discovered pool with empty reserves.
    pub fn new(address: Address, token_a: TokenRef, token_b: TokenRef, target_ratio: f64, now: DateTime<Utc>) -> Self {
        Self {
            address,
            token_a,
            token_b,
            reserve_a: "0".to_string(),
            reserve_b: "0".to_string(),
            total_supply: "0".to_string(),
            current_ratio: 0.0,
            target_ratio,
            needs_rebalancing: false,
            tvl: 0.0,
            volume_24h: 0.0,
            fees_24h: 0.0,
            last_rebalance: None,
            rebalance_count: 0,
            created_at: now,
            is_active: true,
        }
    }

    pub fn holds(&self, token: Address) -> bool {
        self.token_a.address == token || self.token_b.address == token
    }
}

/// Partial update merged into an existing [`Pool`]. Only `Some` fields are
/// written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUpdate {
    pub reserve_a: Option<String>,
    pub reserve_b: Option<String>,
    pub total_supply: Option<String>,
    pub current_ratio: Option<f64>,
    pub target_ratio: Option<f64>,
    pub needs_rebalancing: Option<bool>,
    pub tvl: Option<f64>,
    pub volume_24h: Option<f64>,
    pub fees_24h: Option<f64>,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub rebalance_count: Option<u64>,
    pub is_active: Option<bool>,
}

impl PoolUpdate {
    pub fn apply(self, pool: &mut Pool) {
        if let Some(v) = self.reserve_a {
            pool.reserve_a = v;
        }
        if let Some(v) = self.reserve_b {
            pool.reserve_b = v;
        }
        if let Some(v) = self.total_supply {
            pool.total_supply = v;
        }
        if let Some(v) = self.current_ratio {
            pool.current_ratio = v;
        }
        if let Some(v) = self.target_ratio {
            pool.target_ratio = v;
        }
        if let Some(v) = self.needs_rebalancing {
            pool.needs_rebalancing = v;
        }
        if let Some(v) = self.tvl {
            pool.tvl = v;
        }
        if let Some(v) = self.volume_24h {
            pool.volume_24h = v;
        }
        if let Some(v) = self.fees_24h {
            pool.fees_24h = v;
        }
        if let Some(v) = self.last_rebalance {
            pool.last_rebalance = Some(v);
        }
        if let Some(v) = self.rebalance_count {
            pool.rebalance_count = v;
        }
        if let Some(v) = self.is_active {
            pool.is_active = v;
        }
    }
}
