use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{ChainReader, PairState, TokenInfo};

#[derive(Default)]
struct ChainState {
    block_number: u64,
    gas_price: Option<U256>,
    code: HashSet<Address>,
    pairs: IndexMap<Address, PairState>,
    tokens: HashMap<Address, TokenInfo>,
    balances: HashMap<(Address, Address), U256>,
    routers: HashMap<Address, Address>,
}

/// Fixture-backed [`ChainReader`].
///
/// Pairs are returned by `pair_at` in the order they were added, mirroring
/// the factory's `allPairs` array. `fail_reads(true)` makes every read fail
/// as if the node were unreachable.
pub struct InMemoryChain {
    chain_id: u64,
    state: RwLock<ChainState>,
    failing: AtomicBool,
}

impl InMemoryChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: RwLock::new(ChainState::default()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn deploy(&self, address: Address) {
        self.write().code.insert(address);
    }

    pub fn add_token(&self, address: Address, symbol: &str, decimals: u8) {
        let info = TokenInfo {
            address,
            name: format!("{} Token", symbol),
            symbol: symbol.to_string(),
            decimals,
            total_supply: U256::zero(),
        };
        let mut state = self.write();
        state.code.insert(address);
        state.tokens.insert(address, info);
    }

    pub fn add_pair(&self, pair: Address, token0: Address, token1: Address, reserve0: U256, reserve1: U256) {
        let mut state = self.write();
        state.code.insert(pair);
        state.pairs.insert(
            pair,
            PairState {
                address: pair,
                token0,
                token1,
                reserve0,
                reserve1,
                total_supply: U256::zero(),
            },
        );
    }

    pub fn add_router(&self, router: Address, factory: Address) {
        let mut state = self.write();
        state.code.insert(router);
        state.routers.insert(router, factory);
    }

    pub fn set_reserves(&self, pair: Address, reserve0: U256, reserve1: U256) {
        if let Some(p) = self.write().pairs.get_mut(&pair) {
            p.reserve0 = reserve0;
            p.reserve1 = reserve1;
        }
    }

    pub fn set_gas_price(&self, gas_price: Option<U256>) {
        self.write().gas_price = gas_price;
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.write().balances.insert((token, owner), amount);
    }

    pub fn set_block_number(&self, block: u64) {
        self.write().block_number = block;
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChainReader for InMemoryChain {
    async fn chain_id(&self) -> Result<u64> {
        self.check()?;
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64> {
        self.check()?;
        Ok(self.read().block_number)
    }

    async fn gas_price(&self) -> Result<U256> {
        self.check()?;
        self.read().gas_price.ok_or_else(|| anyhow!("eth_gasPrice unavailable"))
    }

    async fn has_code(&self, address: Address) -> Result<bool> {
        self.check()?;
        Ok(self.read().code.contains(&address))
    }

    async fn all_pairs_length(&self) -> Result<u64> {
        self.check()?;
        Ok(self.read().pairs.len() as u64)
    }

    async fn pair_at(&self, index: u64) -> Result<Address> {
        self.check()?;
        self.read()
            .pairs
            .get_index(index as usize)
            .map(|(addr, _)| *addr)
            .ok_or_else(|| anyhow!("allPairs({}) reverted", index))
    }

    async fn get_pair(&self, token_a: Address, token_b: Address) -> Result<Option<Address>> {
        self.check()?;
        Ok(self
            .read()
            .pairs
            .values()
            .find(|p| {
                (p.token0 == token_a && p.token1 == token_b) || (p.token0 == token_b && p.token1 == token_a)
            })
            .map(|p| p.address))
    }

    async fn pair_state(&self, pair: Address) -> Result<PairState> {
        self.check()?;
        self.read()
            .pairs
            .get(&pair)
            .cloned()
            .ok_or_else(|| anyhow!("no pair contract at {:?}", pair))
    }

    async fn token_info(&self, token: Address) -> Result<TokenInfo> {
        self.check()?;
        self.read()
            .tokens
            .get(&token)
            .cloned()
            .ok_or_else(|| anyhow!("no token contract at {:?}", token))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.check()?;
        let state = self.read();
        if !state.tokens.contains_key(&token) {
            return Err(anyhow!("no token contract at {:?}", token));
        }
        Ok(state.balances.get(&(token, owner)).copied().unwrap_or_default())
    }

    async fn router_factory(&self, router: Address) -> Result<Address> {
        self.check()?;
        self.read()
            .routers
            .get(&router)
            .copied()
            .ok_or_else(|| anyhow!("no router contract at {:?}", router))
    }
}
