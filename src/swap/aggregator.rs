use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{QuoteSource, SwapQuote, SwapRequest, TokenMatch, TxPayload};
use crate::settings::Aggregator as AggregatorSettings;

/// REST client for a 1inch-compatible swap aggregator.
#[derive(Clone)]
pub struct AggregatorClient {
    http: Client,
    base_url: Url,
    api_key: String,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    dst_amount: String,
    #[serde(default)]
    gas: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    dst_amount: String,
    tx: RawTx,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTx {
    from: Address,
    to: Address,
    data: String,
    value: String,
    gas: u64,
    gas_price: String,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    address: Address,
    symbol: String,
    #[serde(default)]
    name: String,
    decimals: u8,
}

impl AggregatorClient {
    pub fn new(base_url: &str, api_key: String, chain_id: u64, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid aggregator url {}", base_url))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            chain_id,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_settings(cfg: &AggregatorSettings, chain_id: u64) -> Result<Option<Self>> {
        match cfg.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(Some(Self::new(
                &cfg.base_url,
                key.to_string(),
                chain_id,
                Duration::from_millis(cfg.timeout_ms),
            )?)),
            _ => Ok(None),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("building aggregator url for {}", path))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        debug!("aggregator GET {}", url);
        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("aggregator returned {}: {}", status, body));
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding response of {}", url))
    }

    pub async fn quote(&self, request: &SwapRequest, amount_in: U256) -> Result<SwapQuote> {
        let url = self.endpoint(&format!("/swap/v6.0/{}/quote", self.chain_id))?;
        let query = [
            ("src", format!("{:?}", request.from_token)),
            ("dst", format!("{:?}", request.to_token)),
            ("amount", amount_in.to_string()),
            ("includeGas", "true".to_string()),
        ];
        let resp: QuoteResponse = self.get(url, &query).await?;
        Ok(SwapQuote {
            from_token: request.from_token,
            to_token: request.to_token,
            amount_in: amount_in.to_string(),
            amount_out: resp.dst_amount,
            estimated_gas: resp.gas.unwrap_or(super::mock::MOCK_SWAP_GAS),
            source: QuoteSource::Aggregator,
        })
    }

    /// Builds the unsigned swap transaction for `request`.
    pub async fn swap(&self, request: &SwapRequest, amount_in: U256, from: Address) -> Result<(SwapQuote, TxPayload)> {
        let url = self.endpoint(&format!("/swap/v6.0/{}/swap", self.chain_id))?;
        let query = [
            ("src", format!("{:?}", request.from_token)),
            ("dst", format!("{:?}", request.to_token)),
            ("amount", amount_in.to_string()),
            ("from", format!("{:?}", from)),
            ("slippage", request.slippage.to_string()),
        ];
        let resp: SwapResponse = self.get(url, &query).await?;
        let quote = SwapQuote {
            from_token: request.from_token,
            to_token: request.to_token,
            amount_in: amount_in.to_string(),
            amount_out: resp.dst_amount,
            estimated_gas: resp.tx.gas,
            source: QuoteSource::Aggregator,
        };
        let tx = TxPayload {
            from: resp.tx.from,
            to: resp.tx.to,
            data: resp.tx.data,
            value: resp.tx.value,
            gas: resp.tx.gas,
            gas_price: resp.tx.gas_price,
        };
        Ok((quote, tx))
    }

    pub async fn search_tokens(&self, query: &str, limit: usize) -> Result<Vec<TokenMatch>> {
        let url = self.endpoint(&format!("/token/v1.2/{}/search", self.chain_id))?;
        let params = [("query", query.to_string()), ("limit", limit.to_string())];
        let tokens: Vec<RawToken> = self.get(url, &params).await?;
        Ok(tokens
            .into_iter()
            .map(|t| TokenMatch {
                address: t.address,
                symbol: t.symbol,
                name: t.name,
                decimals: t.decimals,
                source: QuoteSource::Aggregator,
            })
            .collect())
    }
}
