//! Shared data types: registry records, metrics series and amount conversions.

pub mod conversions;
pub mod metrics;
pub mod pool;

pub use metrics::{HistoricalPoint, PerformanceSummary, PoolMetrics, RebalanceEvent, SwapDirection};
pub use pool::{Pool, PoolUpdate, TokenRef};
