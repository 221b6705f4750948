use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Which token is sold to move a pool back toward its target ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    /// Sell token A for token B (ratio above target).
    AToB,
    /// Sell token B for token A (ratio below target).
    BToA,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalPoint {
    pub timestamp: DateTime<Utc>,
    pub ratio: f64,
    pub tvl: f64,
    pub volume: f64,
    pub fees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceEvent {
    pub timestamp: DateTime<Utc>,
    pub direction: SwapDirection,
    /// Amount sold, in token units of the input side.
    pub amount_in: String,
    pub ratio_before: f64,
    pub target_ratio: f64,
    pub price_impact_pct: f64,
    pub tx_hash: Option<String>,
    pub mock: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_rebalances: u64,
    /// Mean gap between consecutive rebalances, in seconds.
    pub avg_time_between_rebalances: f64,
    pub total_volume: f64,
    pub total_fees: f64,
    /// Percentage (<= 0) a passive holder would have lost versus holding,
    /// from the first to the last recorded ratio.
    pub impermanent_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    pub address: Address,
    pub historical_data: Vec<HistoricalPoint>,
    pub rebalance_history: Vec<RebalanceEvent>,
    pub performance: PerformanceSummary,
}

impl PoolMetrics {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            historical_data: Vec::new(),
            rebalance_history: Vec::new(),
            performance: PerformanceSummary::default(),
        }
    }

    pub fn reset(&mut self) {
        self.historical_data.clear();
        self.rebalance_history.clear();
        self.performance = PerformanceSummary::default();
    }

    pub fn recompute_performance(&mut self) {
        let total_volume = self.historical_data.iter().map(|p| p.volume).sum();
        let total_fees = self.historical_data.iter().map(|p| p.fees).sum();

        let gaps: Vec<f64> = self
            .rebalance_history
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
            .collect();
        let avg_gap = if gaps.is_empty() {
            0.0
        } else {
            gaps.iter().sum::<f64>() / gaps.len() as f64
        };

        let impermanent_loss = match (self.historical_data.first(), self.historical_data.last()) {
            (Some(first), Some(last)) => impermanent_loss_pct(first.ratio, last.ratio),
            _ => 0.0,
        };

        self.performance = PerformanceSummary {
            total_rebalances: self.rebalance_history.len() as u64,
            avg_time_between_rebalances: avg_gap,
            total_volume,
            total_fees,
            impermanent_loss,
        };
    }
}

/// Constant-product impermanent loss, in percent, for a price moving from
/// `start_ratio` to `end_ratio`. Zero when either ratio is not positive.
pub fn impermanent_loss_pct(start_ratio: f64, end_ratio: f64) -> f64 {
    if start_ratio <= 0.0 || end_ratio <= 0.0 {
        return 0.0;
    }
    let k = end_ratio / start_ratio;
    (2.0 * k.sqrt() / (1.0 + k) - 1.0) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn point(ts: DateTime<Utc>, ratio: f64, volume: f64, fees: f64) -> HistoricalPoint {
        HistoricalPoint { timestamp: ts, ratio, tvl: 0.0, volume, fees }
    }

    fn event(ts: DateTime<Utc>) -> RebalanceEvent {
        RebalanceEvent {
            timestamp: ts,
            direction: SwapDirection::AToB,
            amount_in: "1".to_string(),
            ratio_before: 1.2,
            target_ratio: 1.0,
            price_impact_pct: 1.0,
            tx_hash: None,
            mock: true,
        }
    }

    #[test]
    fn no_price_move_means_no_impermanent_loss() {
        assert_eq!(impermanent_loss_pct(1.5, 1.5), 0.0);
        assert_eq!(impermanent_loss_pct(0.0, 1.5), 0.0);
    }

    #[test]
    fn doubling_price_loses_about_five_point_seven_percent() {
        let il = impermanent_loss_pct(1.0, 2.0);
        assert!((il + 5.719).abs() < 0.01, "got {}", il);
    }

    #[test]
    fn aggregates_volume_fees_and_rebalance_gaps() {
        let t0 = Utc::now();
        let mut metrics = PoolMetrics::new(Address::zero());
        metrics.historical_data.push(point(t0, 1.0, 10.0, 0.03));
        metrics.historical_data.push(point(t0, 1.0, 5.0, 0.015));
        metrics.rebalance_history.push(event(t0));
        metrics.rebalance_history.push(event(t0 + Duration::seconds(60)));
        metrics.rebalance_history.push(event(t0 + Duration::seconds(180)));

        metrics.recompute_performance();

        assert_eq!(metrics.performance.total_rebalances, 3);
        assert_eq!(metrics.performance.total_volume, 15.0);
        assert!((metrics.performance.total_fees - 0.045).abs() < 1e-12);
        assert_eq!(metrics.performance.avg_time_between_rebalances, 90.0);
        assert_eq!(metrics.performance.impermanent_loss, 0.0);
    }
}
