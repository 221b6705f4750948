//! # RSK Rebalancer
//!
//! Monitoring and rebalancing service for Uniswap V2-style liquidity pools on
//! Rootstock.
//!
//! ## Overview
//!
//! - **Discovery**: walks the factory's pair list and registers every pool
//! - **Evaluation**: reserve ratio, TVL and imbalance against a target ratio
//! - **Estimation**: sizes the one-sided swap that moves a pool back toward
//!   its target, with price impact and gas cost
//! - **Swap routing**: aggregator quotes with a local mock fallback; chain id
//!   31 is always simulated
//! - **HTTP API**: JSON envelope over all of the above
//!
//! ## Architecture
//!
//! Every chain read goes through the [`accessor::ChainReader`] trait, backed by
//! JSON-RPC in production and by [`accessor::InMemoryChain`] in tests. Pool
//! state lives in the [`registry::PoolRegistry`]; estimates are derived on each
//! call and never stored.

// Core Types
/// Pools, metrics series and numeric conversions
pub mod types;
/// Smart contract ABIs (Factory, Pair, ERC20, Router)
pub mod contracts;

// Chain access
/// Typed contract reads and bytecode diagnostics
pub mod accessor;

// Pool logic
/// Ratio, TVL and imbalance evaluation
pub mod evaluator;
/// Rebalance sizing and price impact
pub mod estimator;
/// Executes allowed rebalances through the swap router
pub mod executor;
/// Pool and metrics store with optional JSON persistence
pub mod registry;
/// Factory scanning and the guarded initialization service
pub mod discovery;

// Swaps
/// Aggregator client and mock quote generator
pub mod swap;

// Infrastructure
/// HTTP JSON API
pub mod api;
/// Metrics and observability
pub mod metrics;
/// Configuration management
pub mod settings;
/// General utilities
pub mod utils;

// Re-exports for convenience
pub use accessor::{ChainReader, InMemoryChain, RpcAccessor};
pub use discovery::{InitializationService, PoolDiscovery};
pub use estimator::{RebalanceEstimate, RebalanceEstimator};
pub use evaluator::ThresholdPolicy;
pub use registry::PoolRegistry;
pub use settings::Settings;
pub use swap::SwapRouter;
pub use types::Pool;
