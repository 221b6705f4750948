use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::middleware::Middleware;
use ethers::prelude::{Http, Provider};
use ethers::types::{Address, U256};
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::{ChainReader, PairState, TokenInfo};
use crate::contracts::{Erc20, IUniswapV2Factory, IUniswapV2Pair, IUniswapV2Router};
use crate::settings::Settings;

/// [`ChainReader`] backed by an HTTP JSON-RPC provider.
#[derive(Clone)]
pub struct RpcAccessor {
    provider: Arc<Provider<Http>>,
    factory: Option<Address>,
    request_timeout: Duration,
}

impl RpcAccessor {
    pub fn new(provider: Arc<Provider<Http>>, factory: Option<Address>, request_timeout: Duration) -> Self {
        Self { provider, factory, request_timeout }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = Provider::<Http>::try_from(settings.rpc.url.as_str())
            .with_context(|| format!("invalid RPC url {}", settings.rpc.url))?;
        let factory = settings.contracts.factory_address();
        if factory.is_none() {
            warn!("No factory address configured; pair discovery is unavailable");
        }
        Ok(Self::new(
            Arc::new(provider),
            factory,
            Duration::from_millis(settings.rpc.request_timeout_ms),
        ))
    }

    fn factory(&self) -> Result<IUniswapV2Factory<Provider<Http>>> {
        let address = self.factory.ok_or_else(|| anyhow!("factory address not configured"))?;
        Ok(IUniswapV2Factory::new(address, Arc::clone(&self.provider)))
    }

    /// Runs one RPC read under the configured timeout.
    async fn bounded<T, E, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context(format!("{} failed", what))),
            Err(_) => Err(anyhow!("{} timed out after {:?}", what, self.request_timeout)),
        }
    }
}

#[async_trait]
impl ChainReader for RpcAccessor {
    async fn chain_id(&self) -> Result<u64> {
        let id = self.bounded("eth_chainId", self.provider.get_chainid()).await?;
        Ok(id.as_u64())
    }

    async fn block_number(&self) -> Result<u64> {
        let block = self.bounded("eth_blockNumber", self.provider.get_block_number()).await?;
        Ok(block.as_u64())
    }

    async fn gas_price(&self) -> Result<U256> {
        self.bounded("eth_gasPrice", self.provider.get_gas_price()).await
    }

    async fn has_code(&self, address: Address) -> Result<bool> {
        let code = self.bounded("eth_getCode", self.provider.get_code(address, None)).await?;
        Ok(!code.as_ref().is_empty())
    }

    async fn all_pairs_length(&self) -> Result<u64> {
        let factory = self.factory()?;
        let len = self.bounded("allPairsLength", factory.all_pairs_length().call()).await?;
        Ok(len.low_u64())
    }

    async fn pair_at(&self, index: u64) -> Result<Address> {
        let factory = self.factory()?;
        self.bounded("allPairs", factory.all_pairs(U256::from(index)).call()).await
    }

    async fn get_pair(&self, token_a: Address, token_b: Address) -> Result<Option<Address>> {
        let factory = self.factory()?;
        let pair = self.bounded("getPair", factory.get_pair(token_a, token_b).call()).await?;
        Ok((!pair.is_zero()).then_some(pair))
    }

    async fn pair_state(&self, pair: Address) -> Result<PairState> {
        let contract = IUniswapV2Pair::new(pair, Arc::clone(&self.provider));
        let token0_call = contract.method::<_, Address>("token0", ())?;
        let token1_call = contract.method::<_, Address>("token1", ())?;
        let reserves_call = contract.get_reserves();
        let supply_call = contract.total_supply();

        let (token0, token1, (reserve0, reserve1, _ts), total_supply) = tokio::try_join!(
            self.bounded("token0", token0_call.call()),
            self.bounded("token1", token1_call.call()),
            self.bounded("getReserves", reserves_call.call()),
            self.bounded("totalSupply", supply_call.call()),
        )
        .with_context(|| format!("reading pair {:?}", pair))?;

        debug!("pair {:?}: reserves {} / {}", pair, reserve0, reserve1);
        Ok(PairState {
            address: pair,
            token0,
            token1,
            reserve0: U256::from(reserve0),
            reserve1: U256::from(reserve1),
            total_supply,
        })
    }

    async fn token_info(&self, token: Address) -> Result<TokenInfo> {
        let contract = Erc20::new(token, Arc::clone(&self.provider));
        let name_call = contract.name();
        let symbol_call = contract.symbol();
        let decimals_call = contract.decimals();
        let supply_call = contract.total_supply();

        let (name, symbol, decimals, total_supply) = tokio::join!(
            self.bounded("name", name_call.call()),
            self.bounded("symbol", symbol_call.call()),
            self.bounded("decimals", decimals_call.call()),
            self.bounded("totalSupply", supply_call.call()),
        );

        // Reserve math needs decimals; name and symbol are cosmetic.
        let decimals = decimals.with_context(|| format!("reading token {:?}", token))?;
        let name = name.unwrap_or_else(|e| {
            warn!("name() failed for token {:?}: {:#}", token, e);
            "Unknown".to_string()
        });
        let symbol = symbol.unwrap_or_else(|e| {
            warn!("symbol() failed for token {:?}: {:#}", token, e);
            short_address(token)
        });
        let total_supply = total_supply.unwrap_or_else(|e| {
            warn!("totalSupply() failed for token {:?}: {:#}", token, e);
            U256::zero()
        });

        Ok(TokenInfo { address: token, name, symbol, decimals, total_supply })
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let contract = Erc20::new(token, Arc::clone(&self.provider));
        self.bounded("balanceOf", contract.balance_of(owner).call()).await
    }

    async fn router_factory(&self, router: Address) -> Result<Address> {
        let contract = IUniswapV2Router::new(router, Arc::clone(&self.provider));
        self.bounded("factory", contract.factory().call()).await
    }
}

fn short_address(address: Address) -> String {
    let full = format!("{:?}", address);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_address_keeps_prefix_and_suffix() {
        let addr: Address = "0x1234567890abcdef1234567890abcdef12345678".parse().unwrap();
        assert_eq!(short_address(addr), "0x1234…5678");
    }

    #[tokio::test]
    async fn unreachable_node_surfaces_an_error() {
        let provider = Provider::<Http>::try_from("http://127.0.0.1:9").unwrap();
        let accessor = RpcAccessor::new(Arc::new(provider), None, Duration::from_millis(500));
        assert!(accessor.block_number().await.is_err());
        assert!(accessor.all_pairs_length().await.is_err());
    }
}
