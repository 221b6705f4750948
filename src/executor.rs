//! Turns an allowed [`RebalanceEstimate`] into a swap and records the event
//! against the pool.

use ethers::types::Address;
use log::info;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::discovery::Clock;
use crate::estimator::{RebalanceEstimate, RebalanceEstimator};
use crate::registry::{PoolRegistry, RegistryError};
use crate::swap::{SwapError, SwapExecution, SwapRequest, SwapRouter};
use crate::types::conversions::{decimal_to_f64, decimal_to_u256};
use crate::types::{Pool, RebalanceEvent};

#[derive(Debug, thiserror::Error)]
pub enum RebalanceError {
    #[error("pool {0:?} is not registered")]
    UnknownPool(Address),
    #[error("pool {0:?} is within its threshold")]
    NotNeeded(Address),
    #[error("rebalance rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Swap(#[from] SwapError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RegistryError> for RebalanceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownPool(addr) => RebalanceError::UnknownPool(addr),
            other => RebalanceError::Other(other.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceOutcome {
    pub estimate: RebalanceEstimate,
    pub execution: SwapExecution,
    pub pool: Pool,
}

pub struct RebalanceExecutor {
    estimator: Arc<RebalanceEstimator>,
    router: Arc<SwapRouter>,
    registry: Arc<PoolRegistry>,
    clock: Arc<dyn Clock>,
}

impl RebalanceExecutor {
    pub fn new(
        estimator: Arc<RebalanceEstimator>,
        router: Arc<SwapRouter>,
        registry: Arc<PoolRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            estimator,
            router,
            registry,
            clock,
        }
    }

    /// Re-estimates `pair` against live reserves and, when the swap is
    /// allowed, routes it and appends a rebalance event to the pool's history.
    pub async fn execute(
        &self,
        pair: Address,
        target: Option<Decimal>,
        from_address: Option<Address>,
    ) -> Result<RebalanceOutcome, RebalanceError> {
        let pool = self
            .registry
            .get_pool(&pair)
            .ok_or(RebalanceError::UnknownPool(pair))?;
        let target = match target {
            Some(t) => t,
            None => crate::types::conversions::f64_to_decimal(pool.target_ratio).map_err(anyhow::Error::from)?,
        };

        let estimate = self.estimator.estimate(pair, Some(target)).await?;
        if !estimate.is_rebalance_needed {
            return Err(RebalanceError::NotNeeded(pair));
        }
        if !estimate.can_rebalance {
            return Err(RebalanceError::Rejected(
                estimate.reason.clone().unwrap_or_else(|| "rebalance not allowed".to_string()),
            ));
        }
        let (from, to, amount) = estimate
            .swap_leg()
            .ok_or_else(|| RebalanceError::Rejected("no swap proposed".to_string()))?;

        let amount = Decimal::from_str(amount).map_err(|e| anyhow::anyhow!("bad swap amount {}: {}", amount, e))?;
        let raw = decimal_to_u256(amount, from.decimals).map_err(anyhow::Error::from)?;
        if raw.is_zero() {
            return Err(RebalanceError::Rejected("swap amount rounds to zero".to_string()));
        }

        let request = SwapRequest {
            from_token: from.address,
            to_token: to.address,
            amount: raw.to_string(),
            from_address,
            slippage: 0.5,
        };
        let execution = self.router.execute(&request).await?;

        let event = RebalanceEvent {
            timestamp: self.clock.now(),
            direction: estimate.direction.unwrap_or(crate::types::SwapDirection::AToB),
            amount_in: amount.normalize().to_string(),
            ratio_before: decimal_to_f64(estimate.current_ratio),
            target_ratio: decimal_to_f64(estimate.target_ratio),
            price_impact_pct: decimal_to_f64(estimate.price_impact_pct),
            tx_hash: execution.tx_hash.clone(),
            mock: execution.mock,
        };
        let pool = self.registry.record_rebalance(&pair, event)?;
        info!(
            "Rebalanced {:?}: sold {} {} (mock: {})",
            pair, amount, from.symbol, execution.mock
        );

        Ok(RebalanceOutcome {
            estimate,
            execution,
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::InMemoryChain;
    use crate::evaluator::ThresholdPolicy;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::sync::Mutex;
    use crate::types::{SwapDirection, TokenRef};
    use ethers::types::U256;

    struct StepClock(Mutex<DateTime<Utc>>);

    impl StepClock {
        fn advance(&self, secs: i64) {
            let mut t = self.0.lock().unwrap();
            *t = *t + ChronoDuration::seconds(secs);
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn setup(r0: u64, r1: u64) -> (RebalanceExecutor, Arc<PoolRegistry>, Address) {
        let (executor, registry, pair, _) = setup_with_clock(r0, r1);
        (executor, registry, pair)
    }

    fn setup_with_clock(r0: u64, r1: u64) -> (RebalanceExecutor, Arc<PoolRegistry>, Address, Arc<StepClock>) {
        let chain = Arc::new(InMemoryChain::new(31));
        let a = Address::from_low_u64_be(0xa);
        let b = Address::from_low_u64_be(0xb);
        let pair = Address::from_low_u64_be(0xab);
        chain.add_token(a, "WRBTC", 18);
        chain.add_token(b, "RIF", 18);
        let e18 = U256::exp10(18);
        chain.add_pair(pair, a, b, e18 * r0, e18 * r1);

        let registry = Arc::new(PoolRegistry::new());
        registry.insert_pool(Pool::new(
            pair,
            TokenRef { address: a, symbol: "WRBTC".into(), decimals: 18 },
            TokenRef { address: b, symbol: "RIF".into(), decimals: 18 },
            1.0,
            Utc::now(),
        ));

        let estimator = Arc::new(RebalanceEstimator::new(
            chain,
            ThresholdPolicy::Absolute(Decimal::new(5, 2)),
            Decimal::ONE,
            Decimal::from(5),
            200_000,
        ));
        let router = Arc::new(SwapRouter::new(31, None, registry.clone()));
        let clock = Arc::new(StepClock(Mutex::new(Utc::now())));
        (
            RebalanceExecutor::new(estimator, router, registry.clone(), clock.clone()),
            registry,
            pair,
            clock,
        )
    }

    #[tokio::test]
    async fn executes_and_records_mock_rebalance() {
        // ratio 1.08: sell 43.2 WRBTC at 4% impact
        let (executor, registry, pair) = setup(1080, 1000);
        let outcome = executor.execute(pair, None, None).await.unwrap();

        assert!(outcome.execution.mock);
        assert_eq!(outcome.execution.quote.amount_in, "43200000000000000000");
        assert_eq!(outcome.pool.rebalance_count, 1);

        let metrics = registry.get_pool_metrics(&pair).unwrap();
        let event = &metrics.rebalance_history[0];
        assert_eq!(event.direction, SwapDirection::AToB);
        assert_eq!(event.amount_in, "43.2");
        assert_eq!(event.ratio_before, 1.08);
    }

    #[tokio::test]
    async fn event_times_come_from_the_clock() {
        let (executor, registry, pair, clock) = setup_with_clock(1080, 1000);
        let first = executor.execute(pair, None, None).await.unwrap();
        clock.advance(120);
        executor.execute(pair, None, None).await.unwrap();
        clock.advance(60);
        let last = executor.execute(pair, None, None).await.unwrap();

        let metrics = registry.get_pool_metrics(&pair).unwrap();
        assert_eq!(metrics.rebalance_history.len(), 3);
        assert_eq!(metrics.performance.avg_time_between_rebalances, 90.0);
        assert_eq!(
            last.pool.last_rebalance.unwrap() - metrics.rebalance_history[0].timestamp,
            ChronoDuration::seconds(180)
        );
        assert_eq!(first.pool.rebalance_count, 1);
        assert_eq!(last.pool.rebalance_count, 3);
    }

    #[tokio::test]
    async fn balanced_pool_is_not_rebalanced() {
        let (executor, registry, pair) = setup(1000, 1000);
        assert!(matches!(
            executor.execute(pair, None, None).await,
            Err(RebalanceError::NotNeeded(_))
        ));
        assert_eq!(registry.get_pool(&pair).unwrap().rebalance_count, 0);
    }

    #[tokio::test]
    async fn high_impact_is_rejected() {
        let (executor, _, pair) = setup(1500, 1000);
        assert!(matches!(
            executor.execute(pair, None, None).await,
            Err(RebalanceError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unregistered_pool_is_unknown() {
        let (executor, _, _) = setup(1080, 1000);
        assert!(matches!(
            executor.execute(Address::from_low_u64_be(0xdead), None, None).await,
            Err(RebalanceError::UnknownPool(_))
        ));
    }
}
