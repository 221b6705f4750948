//! # Rebalance Estimator
//!
//! Works out the one-sided swap that moves a pair toward its target ratio.
//!
//! The amount is a heuristic, not a solution of the constant-product
//! invariant: half of the ratio excess, scaled by the reserve being sold.
//!
//! - ratio above target: sell `(ratio - target) * reserve_a * 0.5` of token A
//! - ratio below target: sell `(target - ratio) * reserve_b * 0.5` of token B
//!
//! Price impact is the sold amount relative to the reserve it comes from, in
//! percent. A rebalance is only allowed when it is needed and the impact stays
//! strictly under the configured ceiling (5 % by default).

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use log::debug;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::accessor::ChainReader;
use crate::evaluator::{self, Evaluation, ThresholdPolicy};
use crate::metrics;
use crate::settings::Rebalance;
use crate::types::conversions::{f64_to_decimal, u256_to_decimal};
use crate::types::{SwapDirection, TokenRef};

/// Gas budget used when nothing better is known.
pub const DEFAULT_REBALANCE_GAS: u64 = 200_000;

/// Outcome of the pure sizing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapPlan {
    pub evaluation: Evaluation,
    pub direction: Option<SwapDirection>,
    /// Token A to sell, in token units.
    pub swap_amount0: Decimal,
    /// Token B to sell, in token units.
    pub swap_amount1: Decimal,
    pub price_impact_pct: Decimal,
    pub can_rebalance: bool,
}

/// Sizes the rebalancing swap for reserves expressed in token units.
pub fn plan_rebalance(
    reserve_a: Decimal,
    reserve_b: Decimal,
    target: Decimal,
    policy: ThresholdPolicy,
    max_price_impact_pct: Decimal,
) -> SwapPlan {
    let evaluation = evaluator::evaluate(reserve_a, reserve_b, target, policy);
    let half = Decimal::new(5, 1);

    if !evaluation.needs_rebalancing {
        return SwapPlan {
            evaluation,
            direction: None,
            swap_amount0: Decimal::ZERO,
            swap_amount1: Decimal::ZERO,
            price_impact_pct: Decimal::ZERO,
            can_rebalance: false,
        };
    }

    let (direction, amount, reserve_in) = if evaluation.ratio > target {
        let excess = evaluation.ratio - target;
        (SwapDirection::AToB, mul(mul(excess, reserve_a), half), reserve_a)
    } else {
        let deficit = target - evaluation.ratio;
        (SwapDirection::BToA, mul(mul(deficit, reserve_b), half), reserve_b)
    };

    // Selling out of an empty reserve cannot be priced.
    let price_impact_pct = if reserve_in.is_zero() {
        Decimal::ONE_HUNDRED
    } else {
        mul(
            amount.checked_div(reserve_in).unwrap_or(Decimal::MAX),
            Decimal::ONE_HUNDRED,
        )
    };

    let (swap_amount0, swap_amount1) = match direction {
        SwapDirection::AToB => (amount, Decimal::ZERO),
        SwapDirection::BToA => (Decimal::ZERO, amount),
    };

    SwapPlan {
        evaluation,
        direction: Some(direction),
        swap_amount0: swap_amount0.normalize(),
        swap_amount1: swap_amount1.normalize(),
        price_impact_pct: price_impact_pct.normalize(),
        can_rebalance: price_impact_pct < max_price_impact_pct && !amount.is_zero(),
    }
}

fn mul(a: Decimal, b: Decimal) -> Decimal {
    a.checked_mul(b).unwrap_or(Decimal::MAX)
}

/// Rebalance proposal for one live pair. Derived on every call, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceEstimate {
    pub pool: Address,
    pub token_a: TokenRef,
    pub token_b: TokenRef,
    pub is_rebalance_needed: bool,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub target_ratio: Decimal,
    pub direction: Option<SwapDirection>,
    pub swap_amount0: String,
    pub swap_amount1: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_impact_pct: Decimal,
    pub estimated_gas: u64,
    /// Wei per gas, when the node answered `eth_gasPrice`.
    pub gas_price: Option<String>,
    pub estimated_cost_wei: Option<String>,
    pub can_rebalance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RebalanceEstimate {
    fn from_plan(
        pool: Address,
        token_a: TokenRef,
        token_b: TokenRef,
        plan: SwapPlan,
        max_price_impact_pct: Decimal,
        estimated_gas: u64,
        gas_price: Option<U256>,
    ) -> Self {
        let reason = if !plan.evaluation.needs_rebalancing {
            Some("ratio within threshold".to_string())
        } else if !plan.can_rebalance {
            Some(format!(
                "price impact {}% is not below the {}% ceiling",
                plan.price_impact_pct.round_dp(4),
                max_price_impact_pct
            ))
        } else {
            None
        };

        Self {
            pool,
            token_a,
            token_b,
            is_rebalance_needed: plan.evaluation.needs_rebalancing,
            current_ratio: plan.evaluation.ratio,
            target_ratio: plan.evaluation.target_ratio,
            direction: plan.direction,
            swap_amount0: plan.swap_amount0.to_string(),
            swap_amount1: plan.swap_amount1.to_string(),
            price_impact_pct: plan.price_impact_pct,
            estimated_gas,
            gas_price: gas_price.map(|p| p.to_string()),
            estimated_cost_wei: gas_price.map(|p| p.saturating_mul(U256::from(estimated_gas)).to_string()),
            can_rebalance: plan.can_rebalance,
            reason,
        }
    }

    /// Amount to sell and the token it is sold from, if a swap is proposed.
    pub fn swap_leg(&self) -> Option<(&TokenRef, &TokenRef, &str)> {
        match self.direction? {
            SwapDirection::AToB => Some((&self.token_a, &self.token_b, self.swap_amount0.as_str())),
            SwapDirection::BToA => Some((&self.token_b, &self.token_a, self.swap_amount1.as_str())),
        }
    }
}

/// Reads live reserves through a [`ChainReader`] and sizes the rebalance.
pub struct RebalanceEstimator {
    reader: Arc<dyn ChainReader>,
    policy: ThresholdPolicy,
    default_target: Decimal,
    max_price_impact_pct: Decimal,
    gas_limit: u64,
}

impl RebalanceEstimator {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        policy: ThresholdPolicy,
        default_target: Decimal,
        max_price_impact_pct: Decimal,
        gas_limit: u64,
    ) -> Self {
        Self {
            reader,
            policy,
            default_target,
            max_price_impact_pct,
            gas_limit,
        }
    }

    pub fn from_settings(reader: Arc<dyn ChainReader>, cfg: &Rebalance) -> Result<Self> {
        Ok(Self::new(
            reader,
            ThresholdPolicy::from_settings(cfg)?,
            f64_to_decimal(cfg.target_ratio)?,
            f64_to_decimal(cfg.max_price_impact_pct)?,
            cfg.default_gas_limit,
        ))
    }

    pub fn policy(&self) -> ThresholdPolicy {
        self.policy
    }

    pub fn default_target(&self) -> Decimal {
        self.default_target
    }

    /// Estimates the rebalance for `pair`. Reserve and token reads fail the
    /// call; a missing gas price only drops the cost estimate.
    pub async fn estimate(&self, pair: Address, target: Option<Decimal>) -> Result<RebalanceEstimate> {
        let target = target.unwrap_or(self.default_target);
        let state = self.reader.pair_state(pair).await?;
        let (info_a, info_b) = tokio::try_join!(
            self.reader.token_info(state.token0),
            self.reader.token_info(state.token1),
        )?;

        let reserve_a = u256_to_decimal(state.reserve0, info_a.decimals)
            .with_context(|| format!("normalizing reserve0 of {:?}", pair))?;
        let reserve_b = u256_to_decimal(state.reserve1, info_b.decimals)
            .with_context(|| format!("normalizing reserve1 of {:?}", pair))?;

        let plan = plan_rebalance(reserve_a, reserve_b, target, self.policy, self.max_price_impact_pct);

        let gas_price = match self.reader.gas_price().await {
            Ok(p) => Some(p),
            Err(e) => {
                debug!("gas price unavailable, keeping placeholder estimate: {:#}", e);
                None
            }
        };

        let decision = match (plan.evaluation.needs_rebalancing, plan.can_rebalance) {
            (false, _) => "not_needed",
            (true, false) => "rejected",
            (true, true) => "allowed",
        };
        metrics::increment_rebalance_decision(decision);

        let token_a = TokenRef {
            address: info_a.address,
            symbol: info_a.symbol,
            decimals: info_a.decimals,
        };
        let token_b = TokenRef {
            address: info_b.address,
            symbol: info_b.symbol,
            decimals: info_b.decimals,
        };

        Ok(RebalanceEstimate::from_plan(
            pair,
            token_a,
            token_b,
            plan,
            self.max_price_impact_pct,
            self.gas_limit,
            gas_price,
        ))
    }
}
