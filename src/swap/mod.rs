//! # Swap routing
//!
//! Quotes and executes swaps. On the platform's own network (chain id 31)
//! everything is simulated locally: quotes come from the mock generator and
//! "executions" return a fabricated transaction hash with status `pending`,
//! flagged `mock: true`. Elsewhere the external aggregator is asked first and
//! any failure (or a missing API key) silently falls back to the mock path.

pub mod aggregator;
pub mod mock;

use ethers::types::{Address, U256};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::accessor::ChainReader;
use crate::metrics;
use crate::registry::PoolRegistry;
use crate::settings::{Settings, RSK_TESTNET_CHAIN_ID};
use crate::types::conversions::parse_raw_amount;
use crate::utils::mock_tx_hash;

pub use aggregator::AggregatorClient;

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("invalid swap request: {0}")]
    InvalidRequest(String),
}

fn default_slippage() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub from_token: Address,
    pub to_token: Address,
    /// Raw amount of `from_token` in base units, base-10.
    pub amount: String,
    #[serde(default)]
    pub from_address: Option<Address>,
    /// Percent.
    #[serde(default = "default_slippage")]
    pub slippage: f64,
}

impl SwapRequest {
    /// Validates the request and returns the parsed input amount.
    pub fn validate(&self) -> Result<U256, SwapError> {
        if self.from_token == self.to_token {
            return Err(SwapError::InvalidRequest("fromToken and toToken are the same".to_string()));
        }
        let amount = parse_raw_amount(&self.amount).map_err(|e| SwapError::InvalidRequest(e.to_string()))?;
        if amount.is_zero() {
            return Err(SwapError::InvalidRequest("amount must be greater than zero".to_string()));
        }
        if !(0.0..=50.0).contains(&self.slippage) {
            return Err(SwapError::InvalidRequest(format!(
                "slippage {} is outside 0..=50",
                self.slippage
            )));
        }
        Ok(amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Aggregator,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub from_token: Address,
    pub to_token: Address,
    pub amount_in: String,
    pub amount_out: String,
    pub estimated_gas: u64,
    pub source: QuoteSource,
}

/// Unsigned transaction returned by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxPayload {
    pub from: Address,
    pub to: Address,
    pub data: String,
    pub value: String,
    pub gas: u64,
    pub gas_price: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Submitted (or, for mocks, pretending to be).
    Pending,
    /// Built by the aggregator, waiting for the caller to sign.
    Unsigned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapExecution {
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub mock: bool,
    pub quote: SwapQuote,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMatch {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub source: QuoteSource,
}

pub struct SwapRouter {
    chain_id: u64,
    aggregator: Option<AggregatorClient>,
    registry: Arc<PoolRegistry>,
    reader: Option<Arc<dyn ChainReader>>,
}

impl SwapRouter {
    pub fn new(chain_id: u64, aggregator: Option<AggregatorClient>, registry: Arc<PoolRegistry>) -> Self {
        Self {
            chain_id,
            aggregator,
            registry,
            reader: None,
        }
    }

    /// Lets mock quotes price pairs the registry has not discovered yet by
    /// asking the factory for them.
    pub fn with_reader(mut self, reader: Arc<dyn ChainReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn from_settings(settings: &Settings, registry: Arc<PoolRegistry>) -> anyhow::Result<Self> {
        let aggregator = AggregatorClient::from_settings(&settings.aggregator, settings.rpc.chain_id)?;
        if aggregator.is_none() && settings.rpc.chain_id != RSK_TESTNET_CHAIN_ID {
            warn!("No aggregator API key configured; swaps on chain {} use mock quotes", settings.rpc.chain_id);
        }
        Ok(Self::new(settings.rpc.chain_id, aggregator, registry))
    }

    pub fn is_mock_network(&self) -> bool {
        self.chain_id == RSK_TESTNET_CHAIN_ID
    }

    pub fn aggregator_configured(&self) -> bool {
        self.aggregator.is_some()
    }

    /// The aggregator to try, or `None` when the mock path is mandatory.
    fn live_aggregator(&self) -> Option<&AggregatorClient> {
        if self.is_mock_network() {
            None
        } else {
            self.aggregator.as_ref()
        }
    }

    pub async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote, SwapError> {
        let amount_in = request.validate()?;
        if let Some(client) = self.live_aggregator() {
            match client.quote(request, amount_in).await {
                Ok(quote) => return Ok(quote),
                Err(e) => {
                    warn!("Aggregator quote failed, using mock quote: {:#}", e);
                    metrics::increment_aggregator_fallback("quote");
                }
            }
        }
        let reserves = self.reserves_for(request).await;
        Ok(mock::mock_quote(request, amount_in, reserves))
    }

    pub async fn execute(&self, request: &SwapRequest) -> Result<SwapExecution, SwapError> {
        let amount_in = request.validate()?;
        if let (Some(client), Some(from)) = (self.live_aggregator(), request.from_address) {
            match client.swap(request, amount_in, from).await {
                Ok((quote, tx)) => {
                    return Ok(SwapExecution {
                        tx_hash: None,
                        status: TxStatus::Unsigned,
                        mock: false,
                        quote,
                        tx: Some(tx),
                    })
                }
                Err(e) => {
                    warn!("Aggregator swap failed, simulating locally: {:#}", e);
                    metrics::increment_aggregator_fallback("swap");
                }
            }
        }

        let reserves = self.reserves_for(request).await;
        let quote = mock::mock_quote(request, amount_in, reserves);
        let tx_hash = mock_tx_hash();
        info!(
            "Simulated swap {} {:?} -> {:?}: {}",
            quote.amount_in, request.from_token, request.to_token, tx_hash
        );
        Ok(SwapExecution {
            tx_hash: Some(tx_hash),
            status: TxStatus::Pending,
            mock: true,
            quote,
            tx: None,
        })
    }

    /// `(reserve_in, reserve_out)` for the request's tokens: a registered pool
    /// first, then the factory's pair read live. `None` if neither exists.
    async fn reserves_for(&self, request: &SwapRequest) -> Option<(U256, U256)> {
        if let Some(pool) = self.registry.find_pool_for_tokens(request.from_token, request.to_token) {
            let reserve_a = parse_raw_amount(&pool.reserve_a).ok()?;
            let reserve_b = parse_raw_amount(&pool.reserve_b).ok()?;
            return Some(if pool.token_a.address == request.from_token {
                (reserve_a, reserve_b)
            } else {
                (reserve_b, reserve_a)
            });
        }

        let reader = self.reader.as_ref()?;
        let pair = match reader.get_pair(request.from_token, request.to_token).await {
            Ok(Some(pair)) => pair,
            Ok(None) => return None,
            Err(e) => {
                debug!("getPair lookup for mock quote failed: {:#}", e);
                return None;
            }
        };
        match reader.pair_state(pair).await {
            Ok(state) if state.token0 == request.from_token => Some((state.reserve0, state.reserve1)),
            Ok(state) => Some((state.reserve1, state.reserve0)),
            Err(e) => {
                debug!("Reading pair {:?} for mock quote failed: {:#}", pair, e);
                None
            }
        }
    }

    /// Token search through the aggregator, falling back to the tokens of
    /// registered pools.
    pub async fn search_tokens(&self, query: &str, limit: usize) -> Vec<TokenMatch> {
        if let Some(client) = self.live_aggregator() {
            match client.search_tokens(query, limit).await {
                Ok(found) => return found,
                Err(e) => {
                    warn!("Aggregator token search failed, searching known tokens: {:#}", e);
                    metrics::increment_aggregator_fallback("search");
                }
            }
        }

        let needle = query.trim().to_lowercase();
        self.registry
            .known_tokens()
            .into_iter()
            .filter(|t| {
                needle.is_empty()
                    || t.symbol.to_lowercase().contains(&needle)
                    || format!("{:?}", t.address).starts_with(&needle)
            })
            .take(limit)
            .map(|t| TokenMatch {
                address: t.address,
                name: t.symbol.clone(),
                symbol: t.symbol,
                decimals: t.decimals,
                source: QuoteSource::Mock,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::InMemoryChain;
    use crate::types::{Pool, TokenRef};
    use chrono::Utc;

    fn request(amount: &str) -> SwapRequest {
        SwapRequest {
            from_token: Address::from_low_u64_be(1),
            to_token: Address::from_low_u64_be(2),
            amount: amount.to_string(),
            from_address: None,
            slippage: 0.5,
        }
    }

    fn registry_with_pool() -> Arc<PoolRegistry> {
        let registry = Arc::new(PoolRegistry::new());
        let mut pool = Pool::new(
            Address::from_low_u64_be(0x12),
            TokenRef { address: Address::from_low_u64_be(1), symbol: "WRBTC".into(), decimals: 18 },
            TokenRef { address: Address::from_low_u64_be(2), symbol: "RIF".into(), decimals: 18 },
            1.0,
            Utc::now(),
        );
        pool.reserve_a = "1000".to_string();
        pool.reserve_b = "2000".to_string();
        registry.insert_pool(pool);
        registry
    }

    #[test]
    fn validation_rejects_bad_requests() {
        assert!(request("100").validate().is_ok());
        assert!(request("0").validate().is_err());
        assert!(request("1.5").validate().is_err());
        let mut same = request("100");
        same.to_token = same.from_token;
        assert!(same.validate().is_err());
    }

    #[tokio::test]
    async fn testnet_execution_is_mocked() {
        let router = SwapRouter::new(RSK_TESTNET_CHAIN_ID, None, Arc::new(PoolRegistry::new()));
        let exec = router.execute(&request("1000")).await.unwrap();

        let hash = exec.tx_hash.unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);
        assert_eq!(exec.status, TxStatus::Pending);
        assert!(exec.mock);
        assert_eq!(exec.quote.amount_out, "997");
    }

    #[tokio::test]
    async fn mock_quote_uses_registered_reserves() {
        let router = SwapRouter::new(RSK_TESTNET_CHAIN_ID, None, registry_with_pool());
        // 10 in against 1000/2000: 10*997*2000 / (1000*1000 + 9970) = 19
        let quote = router.quote(&request("10")).await.unwrap();
        assert_eq!(quote.amount_out, "19");
        assert_eq!(quote.source, QuoteSource::Mock);
    }

    #[tokio::test]
    async fn mock_quote_reads_undiscovered_pair_from_factory() {
        let chain = Arc::new(InMemoryChain::new(RSK_TESTNET_CHAIN_ID));
        let (a, b) = (Address::from_low_u64_be(1), Address::from_low_u64_be(2));
        chain.add_token(a, "WRBTC", 18);
        chain.add_token(b, "RIF", 18);
        // token1 is the input: reserves come back swapped
        chain.add_pair(Address::from_low_u64_be(0x21), b, a, U256::from(2000), U256::from(1000));

        let router = SwapRouter::new(RSK_TESTNET_CHAIN_ID, None, Arc::new(PoolRegistry::new())).with_reader(chain);
        let quote = router.quote(&request("10")).await.unwrap();
        assert_eq!(quote.amount_out, "19");

        let mut unknown = request("1000");
        unknown.to_token = Address::from_low_u64_be(3);
        assert_eq!(router.quote(&unknown).await.unwrap().amount_out, "997");
    }

    #[tokio::test]
    async fn token_search_falls_back_to_known_tokens() {
        let router = SwapRouter::new(RSK_TESTNET_CHAIN_ID, None, registry_with_pool());
        let found = router.search_tokens("ri", 10).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "RIF");
        assert_eq!(router.search_tokens("", 10).await.len(), 2);
    }
}
