//! # Contract Accessor
//!
//! Typed read access to the Factory / Pair / ERC20 contracts of the
//! deployment. The [`ChainReader`] trait is the seam every other component
//! reads the chain through:
//!
//! - [`rpc::RpcAccessor`] talks JSON-RPC to a Rootstock node via ethers.
//! - [`memory::InMemoryChain`] serves fixture state for tests and offline runs.
//!
//! Reads are never retried here; failures surface to the caller with context.

pub mod memory;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::Serialize;

use crate::settings::Contracts;
use crate::types::conversions::string_to_address;

pub use memory::InMemoryChain;
pub use rpc::RpcAccessor;

/// Live state of a Uniswap V2-style pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairState {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub total_supply: U256,
}

/// ERC20 metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    async fn gas_price(&self) -> Result<U256>;

    /// `false` when the address holds no bytecode.
    async fn has_code(&self, address: Address) -> Result<bool>;

    async fn all_pairs_length(&self) -> Result<u64>;

    async fn pair_at(&self, index: u64) -> Result<Address>;

    /// The pair for two tokens, `None` if the factory has none.
    async fn get_pair(&self, token_a: Address, token_b: Address) -> Result<Option<Address>>;

    async fn pair_state(&self, pair: Address) -> Result<PairState>;

    async fn token_info(&self, token: Address) -> Result<TokenInfo>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;

    /// The factory a router was deployed against.
    async fn router_factory(&self, router: Address) -> Result<Address>;
}

/// Result of checking one configured contract address for bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDiagnostic {
    pub name: String,
    pub address: String,
    pub deployed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Checks every configured contract for deployed bytecode.
///
/// Missing or undeployed contracts are reported, never treated as fatal.
pub async fn diagnose_contracts(reader: &dyn ChainReader, contracts: &Contracts) -> Vec<ContractDiagnostic> {
    let mut out = Vec::new();
    for (name, raw) in contracts.named() {
        let mut diag = ContractDiagnostic {
            name: name.to_string(),
            address: raw.trim().to_string(),
            deployed: false,
            error: None,
        };
        if raw.trim().is_empty() {
            diag.error = Some("not configured".to_string());
            out.push(diag);
            continue;
        }
        match string_to_address(raw) {
            Ok(address) => match reader.has_code(address).await {
                Ok(true) => {
                    diag.deployed = true;
                    if name == "router" {
                        diag.error = check_router_factory(reader, address, contracts).await;
                    }
                }
                Ok(false) => diag.error = Some("no bytecode at address".to_string()),
                Err(e) => {
                    log::warn!("Bytecode check for {} at {:?} failed: {:#}", name, address, e);
                    diag.error = Some(format!("{:#}", e));
                }
            },
            Err(e) => diag.error = Some(e.to_string()),
        }
        out.push(diag);
    }
    out
}

/// `None` when the router's `factory()` matches the configured factory or no
/// factory is configured.
async fn check_router_factory(reader: &dyn ChainReader, router: Address, contracts: &Contracts) -> Option<String> {
    let expected = contracts.factory_address()?;
    match reader.router_factory(router).await {
        Ok(actual) if actual == expected => None,
        Ok(actual) => Some(format!("router uses factory {:?}, expected {:?}", actual, expected)),
        Err(e) => Some(format!("factory() failed: {:#}", e)),
    }
}
