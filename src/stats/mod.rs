// Aggregate performance of closed positions
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::execution::position_manager::{ExitReason, PositionClosed};

/// Receives one record per closed position
pub trait StatsSink: Send + Sync {
    fn record(&self, closed: &PositionClosed);
}

/// Win/loss statistics over every recorded close
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64, // percent

    pub total_pnl_pct: f64,
    pub avg_pnl_pct: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub profit_factor: f64, // Total wins / Total losses

    pub avg_holding_hours: f64,
    pub exits_by_reason: BTreeMap<String, usize>,
}

impl PerformanceSummary {
    fn empty() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl_pct: 0.0,
            avg_pnl_pct: 0.0,
            avg_win_pct: 0.0,
            avg_loss_pct: 0.0,
            best_trade_pct: 0.0,
            worst_trade_pct: 0.0,
            profit_factor: 0.0,
            avg_holding_hours: 0.0,
            exits_by_reason: BTreeMap::new(),
        }
    }

    pub fn from_trades(trades: &[PositionClosed]) -> Self {
        let total_trades = trades.len();
        if total_trades == 0 {
            return Self::empty();
        }

        let wins: Vec<f64> = trades
            .iter()
            .map(|t| t.pnl_pct)
            .filter(|p| *p > 0.0)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .map(|t| t.pnl_pct)
            .filter(|p| *p <= 0.0)
            .collect();

        let total_pnl_pct: f64 = trades.iter().map(|t| t.pnl_pct).sum();
        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().sum::<f64>().abs();

        let avg = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut exits_by_reason = BTreeMap::new();
        for trade in trades {
            *exits_by_reason.entry(trade.reason.to_string()).or_insert(0) += 1;
        }

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / total_trades as f64 * 100.0,
            total_pnl_pct,
            avg_pnl_pct: total_pnl_pct / total_trades as f64,
            avg_win_pct: avg(&wins),
            avg_loss_pct: avg(&losses),
            best_trade_pct: trades.iter().map(|t| t.pnl_pct).fold(f64::MIN, f64::max),
            worst_trade_pct: trades.iter().map(|t| t.pnl_pct).fold(f64::MAX, f64::min),
            profit_factor,
            avg_holding_hours: trades.iter().map(|t| t.holding_hours()).sum::<f64>()
                / total_trades as f64,
            exits_by_reason,
        }
    }

    pub fn exits_for(&self, reason: ExitReason) -> usize {
        self.exits_by_reason
            .get(&reason.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn log(&self) {
        tracing::info!(
            trades = self.total_trades,
            win_rate = %format!("{:.1}%", self.win_rate),
            total_pnl_pct = %format!("{:+.2}", self.total_pnl_pct),
            avg_pnl_pct = %format!("{:+.2}", self.avg_pnl_pct),
            avg_holding_hours = %format!("{:.1}", self.avg_holding_hours),
            "Performance summary"
        );
    }
}

/// In-memory stats collector
#[derive(Debug, Default)]
pub struct PerformanceStats {
    trades: Mutex<Vec<PositionClosed>>,
}

impl PerformanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> PerformanceSummary {
        let trades = self.trades.lock().unwrap_or_else(PoisonError::into_inner);
        PerformanceSummary::from_trades(&trades)
    }

    pub fn trade_count(&self) -> usize {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl StatsSink for PerformanceStats {
    fn record(&self, closed: &PositionClosed) {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(closed.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn closed(pnl_pct: f64, hours: i64, reason: ExitReason) -> PositionClosed {
        let entry_time = Utc::now();
        PositionClosed {
            position_id: Uuid::new_v4(),
            asset: "BTC/USD".to_string(),
            entry_price: 100.0,
            exit_price: 100.0 + pnl_pct,
            entry_time,
            exit_time: entry_time + Duration::hours(hours),
            reason,
            pnl_pct,
            high_watermark: 100.0_f64.max(100.0 + pnl_pct),
        }
    }

    #[test]
    fn test_empty_summary() {
        let stats = PerformanceStats::new();
        let summary = stats.summary();

        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
    }

    #[test]
    fn test_summary_metrics() {
        let stats = PerformanceStats::new();
        stats.record(&closed(10.0, 4, ExitReason::TakeProfit));
        stats.record(&closed(20.0, 8, ExitReason::TakeProfit));
        stats.record(&closed(-5.0, 12, ExitReason::StopLoss));
        stats.record(&closed(-5.0, 72, ExitReason::TimeLimit));

        let summary = stats.summary();

        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.winning_trades, 2);
        assert_eq!(summary.losing_trades, 2);
        assert_eq!(summary.win_rate, 50.0);
        assert_eq!(summary.total_pnl_pct, 20.0);
        assert_eq!(summary.avg_pnl_pct, 5.0);
        assert_eq!(summary.avg_win_pct, 15.0);
        assert_eq!(summary.avg_loss_pct, -5.0);
        assert_eq!(summary.best_trade_pct, 20.0);
        assert_eq!(summary.worst_trade_pct, -5.0);
        assert_eq!(summary.profit_factor, 3.0);
        assert_eq!(summary.avg_holding_hours, 24.0);
        assert_eq!(summary.exits_for(ExitReason::TakeProfit), 2);
        assert_eq!(summary.exits_for(ExitReason::TrailingStop), 0);
    }

    #[test]
    fn test_all_wins_profit_factor() {
        let summary = PerformanceSummary::from_trades(&[closed(3.0, 1, ExitReason::AiBearish)]);
        assert!(summary.profit_factor.is_infinite());
        assert_eq!(summary.win_rate, 100.0);
    }
}
