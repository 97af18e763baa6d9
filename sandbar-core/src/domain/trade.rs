//! TradeRecord — a completed round-trip trade.

use super::position::PositionSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Strategy closed or reversed the position.
    Signal,
    StopLoss,
    TakeProfit,
    /// Still open on the last bar and closed at its close.
    EndOfData,
}

/// A complete round-trip trade record: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: PositionSide,

    // ── Entry ──
    pub entry_bar: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_bar: usize,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    /// Units traded (always positive).
    pub quantity: f64,

    // ── PnL ──
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,

    pub bars_held: usize,
}

impl TradeRecord {
    /// Return on the trade as a fraction of entry cost.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.quantity == 0.0 {
            return 0.0;
        }
        self.net_pnl / (self.entry_price * self.quantity)
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }

    /// Wall-clock holding time.
    pub fn duration(&self) -> chrono::Duration {
        self.exit_time - self.entry_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> TradeRecord {
        TradeRecord {
            side: PositionSide::Long,
            entry_bar: 4,
            entry_time: DateTime::from_timestamp(1_704_412_800, 0).unwrap(),
            entry_price: 100.0,
            exit_bar: 8,
            exit_time: DateTime::from_timestamp(1_704_931_200, 0).unwrap(),
            exit_price: 110.0,
            exit_reason: ExitReason::Signal,
            quantity: 50.0,
            gross_pnl: 500.0,
            commission: 10.0,
            net_pnl: 490.0,
            bars_held: 4,
        }
    }

    #[test]
    fn return_pct_calculation() {
        let trade = sample_trade();
        let expected = 490.0 / (100.0 * 50.0);
        assert!((trade.return_pct() - expected).abs() < 1e-10);
    }

    #[test]
    fn is_winner() {
        assert!(sample_trade().is_winner());
    }

    #[test]
    fn duration_in_days() {
        assert_eq!(sample_trade().duration().num_days(), 6);
    }

    #[test]
    fn exit_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ExitReason::TakeProfit).unwrap();
        assert_eq!(json, "\"take_profit\"");
    }
}
