//! # HTTP API
//!
//! axum router over the shared services. Every handler answers with the
//! [`ApiResponse`] envelope; failures map to 400 (bad input), 404 (unknown
//! pool) or 500 (RPC and other internal failures).

pub mod debug;
pub mod error;
pub mod pools;
pub mod rebalance;
pub mod response;
pub mod swap;
pub mod system;
pub mod tokens;

use anyhow::{Context, Result};
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use ethers::types::Address;
use log::info;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::accessor::ChainReader;
use crate::discovery::{
    Clock, CooldownStore, FileCooldownStore, InitializationService, MemoryCooldownStore, PoolDiscovery, SystemClock,
};
use crate::estimator::RebalanceEstimator;
use crate::evaluator::ThresholdPolicy;
use crate::executor::RebalanceExecutor;
use crate::metrics;
use crate::registry::PoolRegistry;
use crate::settings::{Contracts, Settings};
use crate::swap::SwapRouter;
use crate::types::conversions::{f64_to_decimal, string_to_address};

pub use error::ApiError;
pub use response::ApiResponse;

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub chain_id: u64,
    pub reader: Arc<dyn ChainReader>,
    pub registry: Arc<PoolRegistry>,
    pub estimator: Arc<RebalanceEstimator>,
    pub executor: Arc<RebalanceExecutor>,
    pub swaps: Arc<SwapRouter>,
    pub init: Arc<InitializationService>,
    pub contracts: Contracts,
    pub policy: ThresholdPolicy,
    pub rpc_timeout: Duration,
}

impl AppState {
    /// Wires the services from settings around an existing chain reader and
    /// registry.
    pub fn build(settings: &Settings, reader: Arc<dyn ChainReader>, registry: Arc<PoolRegistry>) -> Result<Self> {
        let estimator = Arc::new(RebalanceEstimator::from_settings(reader.clone(), &settings.rebalance)?);
        let swaps = Arc::new(SwapRouter::from_settings(settings, registry.clone())?.with_reader(reader.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let executor = Arc::new(RebalanceExecutor::new(
            estimator.clone(),
            swaps.clone(),
            registry.clone(),
            clock.clone(),
        ));

        let store: Arc<dyn CooldownStore> = match &settings.discovery.state_path {
            Some(path) => Arc::new(FileCooldownStore::new(PathBuf::from(path))),
            None => Arc::new(MemoryCooldownStore::default()),
        };
        let policy = estimator.policy();
        let discovery = Arc::new(PoolDiscovery::new(
            reader.clone(),
            registry.clone(),
            clock.clone(),
            policy,
            f64_to_decimal(settings.rebalance.target_ratio)?,
            settings.discovery.max_pairs,
        ));
        let init = Arc::new(InitializationService::new(
            discovery,
            registry.clone(),
            clock,
            store,
            Duration::from_secs(settings.discovery.cooldown_seconds),
        ));

        Ok(Self {
            chain_id: settings.rpc.chain_id,
            reader,
            registry,
            estimator,
            executor,
            swaps,
            init,
            contracts: settings.contracts.clone(),
            policy,
            rpc_timeout: Duration::from_millis(settings.rpc.request_timeout_ms),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/pools", get(pools::list_pools))
        .route("/api/pools/discover", post(pools::discover))
        .route("/api/pools/evaluate", get(pools::evaluate))
        .route("/api/pools/{address}", get(pools::get_pool))
        .route("/api/pools/{address}/metrics", get(pools::get_metrics))
        .route("/api/pools/{address}/metrics/reset", post(pools::reset_metrics))
        .route("/api/pools/{address}/refresh", post(pools::refresh))
        .route("/api/rebalance/{address}/estimate", get(rebalance::estimate))
        .route("/api/rebalance/{address}/execute", post(rebalance::execute))
        .route("/api/tokens/search", get(tokens::search))
        .route("/api/tokens/{address}", get(tokens::token_info))
        .route("/api/tokens/{address}/balance/{owner}", get(tokens::balance))
        .route("/api/swap/quote", post(swap::quote))
        .route("/api/swap/execute", post(swap::execute))
        .route("/api/system/initialize", post(system::initialize))
        .route("/api/system/status", get(system::status))
        .route("/api/debug/contracts", get(debug::contracts))
        .route("/api/debug/rpc", get(debug::rpc))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Binds `addr` and serves the API until the process stops.
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("API listening on http://{}", listener.local_addr()?);
    system::mark_started();
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let resp = next.run(req).await;
    metrics::increment_api_request(&route, resp.status().as_u16());
    resp
}

pub(crate) fn parse_address(raw: &str) -> Result<Address, ApiError> {
    string_to_address(raw).map_err(|_| ApiError::BadRequest(format!("invalid address: {}", raw)))
}

/// Decodes a JSON body, reporting malformed input inside the envelope rather
/// than through axum's plain-text rejection.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}
