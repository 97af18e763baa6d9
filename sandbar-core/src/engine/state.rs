//! Engine settings and the result of a single backtest run.

use crate::domain::TradeRecord;
use serde::{Deserialize, Serialize};

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Starting cash.
    pub cash: f64,
    /// Commission as a fraction of notional, charged on every fill.
    pub commission: f64,
    /// Fill orders at the close of the bar they were placed on instead of
    /// the next bar's open.
    pub trade_on_close: bool,
    /// Close any position still open at the last bar's close.
    pub close_open_position_at_end: bool,
}

impl EngineSettings {
    pub fn new(cash: f64, commission: f64) -> Self {
        Self {
            cash,
            commission,
            trade_on_close: false,
            close_open_position_at_end: true,
        }
    }

    pub fn validate(&self) -> Result<(), super::EngineError> {
        if !self.cash.is_finite() || self.cash <= 0.0 {
            return Err(super::EngineError::InvalidSettings(format!(
                "cash must be a positive number, got {}",
                self.cash
            )));
        }
        if !self.commission.is_finite() || !(0.0..1.0).contains(&self.commission) {
            return Err(super::EngineError::InvalidSettings(format!(
                "commission must be in [0, 1), got {}",
                self.commission
            )));
        }
        Ok(())
    }
}

/// Everything the bar loop produced.
#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub strategy_name: String,
    /// Equity at each bar's close (one value per bar).
    pub equity_curve: Vec<f64>,
    pub trades: Vec<TradeRecord>,
    pub commissions: f64,
    /// First bar on which the strategy's `next` ran.
    pub first_trading_bar: usize,
    /// Orders refused at fill time.
    pub cancelled_orders: usize,
    /// Orders still queued when the data ran out.
    pub dropped_orders: usize,
    /// Set when equity fell to zero or below and trading stopped.
    pub bankrupt_at: Option<usize>,
}
