//! # Ratio / Imbalance Evaluator
//!
//! Pure functions turning a pair's reserves into its current ratio, TVL and an
//! imbalance flag. Reserves are normalized by token decimals into
//! [`Decimal`] so comparisons against the threshold are exact: a deviation
//! that lands exactly on the threshold does not count as imbalanced.
//!
//! Degenerate reserves are not errors. A zero `reserve_b` yields a ratio of
//! `0`, and empty pools have a TVL of `0`.

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::settings::{Rebalance, ThresholdKind};
use crate::types::conversions::{f64_to_decimal, parse_raw_amount, u256_to_decimal, ConversionError};

/// How far the current ratio may drift from the target before the pool is
/// flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdPolicy {
    /// `|ratio - target| > threshold`
    Absolute(Decimal),
    /// `|ratio - target| / target > threshold`
    Relative(Decimal),
}

impl ThresholdPolicy {
    pub fn from_settings(cfg: &Rebalance) -> Result<Self, ConversionError> {
        let threshold = f64_to_decimal(cfg.threshold)?;
        Ok(match cfg.threshold_policy {
            ThresholdKind::Absolute => ThresholdPolicy::Absolute(threshold),
            ThresholdKind::Relative => ThresholdPolicy::Relative(threshold),
        })
    }

    pub fn threshold(&self) -> Decimal {
        match self {
            ThresholdPolicy::Absolute(t) | ThresholdPolicy::Relative(t) => *t,
        }
    }

    /// Deviation of `ratio` from `target` in the unit the threshold is
    /// expressed in.
    pub fn deviation(&self, ratio: Decimal, target: Decimal) -> Decimal {
        let diff = (ratio - target).abs();
        match self {
            ThresholdPolicy::Absolute(_) => diff,
            ThresholdPolicy::Relative(_) => {
                if target.is_zero() {
                    diff
                } else {
                    diff.checked_div(target.abs()).unwrap_or(Decimal::MAX)
                }
            }
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::Absolute(Decimal::new(1, 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    #[serde(with = "rust_decimal::serde::float")]
    pub ratio: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tvl: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub target_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub deviation: Decimal,
    pub needs_rebalancing: bool,
}

/// `reserve_a / reserve_b`, or zero when `reserve_b` is zero.
pub fn ratio(reserve_a: Decimal, reserve_b: Decimal) -> Decimal {
    if reserve_b.is_zero() {
        return Decimal::ZERO;
    }
    reserve_a.checked_div(reserve_b).unwrap_or(Decimal::MAX)
}

/// Sum of both reserves in token units.
pub fn tvl(reserve_a: Decimal, reserve_b: Decimal) -> Decimal {
    reserve_a.checked_add(reserve_b).unwrap_or(Decimal::MAX)
}

pub fn needs_rebalancing(current: Decimal, target: Decimal, policy: ThresholdPolicy) -> bool {
    policy.deviation(current, target) > policy.threshold()
}

/// Evaluates reserves already expressed in token units.
pub fn evaluate(reserve_a: Decimal, reserve_b: Decimal, target: Decimal, policy: ThresholdPolicy) -> Evaluation {
    let current = ratio(reserve_a, reserve_b);
    let deviation = policy.deviation(current, target);
    Evaluation {
        ratio: current,
        tvl: tvl(reserve_a, reserve_b),
        target_ratio: target,
        deviation,
        needs_rebalancing: deviation > policy.threshold(),
    }
}

/// Evaluates raw on-chain reserves, normalizing each side by its decimals.
pub fn evaluate_reserves(
    reserve_a: U256,
    reserve_b: U256,
    decimals_a: u8,
    decimals_b: u8,
    target: Decimal,
    policy: ThresholdPolicy,
) -> Result<Evaluation, ConversionError> {
    let a = u256_to_decimal(reserve_a, decimals_a)?;
    let b = u256_to_decimal(reserve_b, decimals_b)?;
    Ok(evaluate(a, b, target, policy))
}

/// Evaluates reserves given as base-10 integer strings.
pub fn evaluate_raw(
    reserve_a: &str,
    reserve_b: &str,
    decimals_a: u8,
    decimals_b: u8,
    target: Decimal,
    policy: ThresholdPolicy,
) -> Result<Evaluation, ConversionError> {
    let a = parse_raw_amount(reserve_a)?;
    let b = parse_raw_amount(reserve_b)?;
    evaluate_reserves(a, b, decimals_a, decimals_b, target, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn ratio_divides_reserves() {
        assert_eq!(ratio(dec(150), dec(100)), Decimal::new(15, 1));
        assert_eq!(ratio(dec(1), dec(3)).round_dp(6), Decimal::new(333333, 6));
    }

    #[test]
    fn zero_reserve_b_gives_zero_ratio() {
        assert_eq!(ratio(dec(150), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(ratio(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn empty_side_is_imbalanced_not_an_error() {
        let eval = evaluate(Decimal::ZERO, dec(100), Decimal::ONE, ThresholdPolicy::default());
        assert_eq!(eval.ratio, Decimal::ZERO);
        assert_eq!(eval.tvl, dec(100));
        assert!(eval.needs_rebalancing);

        let empty = evaluate(Decimal::ZERO, Decimal::ZERO, Decimal::ONE, ThresholdPolicy::default());
        assert_eq!(empty.tvl, Decimal::ZERO);
    }

    #[test]
    fn deviation_exactly_at_threshold_is_balanced() {
        let policy = ThresholdPolicy::Absolute(Decimal::new(1, 1));
        let eval = evaluate(dec(110), dec(100), Decimal::ONE, policy);
        assert_eq!(eval.deviation, Decimal::new(1, 1));
        assert!(!eval.needs_rebalancing);

        let eval = evaluate(dec(111), dec(100), Decimal::ONE, policy);
        assert!(eval.needs_rebalancing);
    }

    #[test]
    fn relative_policy_scales_by_target() {
        let policy = ThresholdPolicy::Relative(Decimal::new(1, 2));
        // ratio 2.02 vs target 2.0 -> 1% relative, exactly on the threshold
        assert!(!needs_rebalancing(Decimal::new(202, 2), dec(2), policy));
        assert!(needs_rebalancing(Decimal::new(203, 2), dec(2), policy));
        // the same drift is large in absolute terms but fine relatively
        let abs = ThresholdPolicy::Absolute(Decimal::new(1, 2));
        assert!(needs_rebalancing(Decimal::new(203, 2), dec(2), abs));
    }

    #[test]
    fn raw_reserves_are_normalized_by_decimals() {
        let eval = evaluate_raw(
            "150000000000000000000",
            "100000000",
            18,
            6,
            Decimal::ONE,
            ThresholdPolicy::default(),
        )
        .unwrap();
        assert_eq!(eval.ratio, Decimal::new(15, 1));
        assert_eq!(eval.tvl, dec(250));
        assert!(eval.needs_rebalancing);
    }

    #[test]
    fn malformed_reserve_strings_are_rejected() {
        assert!(evaluate_raw("abc", "100", 0, 0, Decimal::ONE, ThresholdPolicy::default()).is_err());
    }

    #[test]
    fn policy_from_settings() {
        let mut cfg = Rebalance::default();
        assert_eq!(
            ThresholdPolicy::from_settings(&cfg).unwrap(),
            ThresholdPolicy::Absolute(Decimal::new(1, 1))
        );
        cfg.threshold_policy = ThresholdKind::Relative;
        cfg.threshold = 0.01;
        assert_eq!(
            ThresholdPolicy::from_settings(&cfg).unwrap(),
            ThresholdPolicy::Relative(Decimal::new(1, 2))
        );
    }
}
