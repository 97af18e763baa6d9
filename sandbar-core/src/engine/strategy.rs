//! The seam between the engine and a strategy implementation.
//!
//! A strategy has two phases:
//! - `init` runs once with the full history and registers indicators
//! - `next` runs once per tradable bar and places orders
//!
//! The engine never hands a strategy data beyond the current bar: the
//! `BarContext` only exposes the bar index, the broker's view of the
//! position, and order placement.

use super::broker::Broker;
use crate::domain::{Bar, OrderError, OrderRequest, OrderSide, OrderSize, PendingOrder, PositionSnapshot};
use crate::indicators::warmup_len;
use thiserror::Error;

/// Errors raised by a strategy while it runs.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("illegal order: {0}")]
    Order(#[from] OrderError),

    #[error("indicator '{name}' has length {actual}, expected {expected} (one value per bar)")]
    IndicatorLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Failure inside the strategy's own logic.
    #[error(transparent)]
    Runtime(Box<dyn std::error::Error + Send + Sync>),
}

/// A trading strategy driven by the engine's bar loop.
pub trait Strategy {
    fn name(&self) -> &str;

    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), StrategyError>;

    fn next(&mut self, ctx: &mut BarContext<'_>) -> Result<(), StrategyError>;
}

// ─── Init phase ──────────────────────────────────────────────────────

/// Context for the one-off initialization phase.
pub struct InitContext<'a> {
    bars: &'a [Bar],
    warmup: usize,
    registered: Vec<String>,
}

impl<'a> InitContext<'a> {
    pub fn new(bars: &'a [Bar]) -> Self {
        Self {
            bars,
            warmup: 0,
            registered: Vec::new(),
        }
    }

    pub fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    /// Register an indicator series for warm-up detection.
    ///
    /// The series must have exactly one value per bar. `next` is not called
    /// before every registered series has a defined (non-NaN) value.
    pub fn register_indicator(&mut self, name: &str, values: &[f64]) -> Result<(), StrategyError> {
        if values.len() != self.bars.len() {
            return Err(StrategyError::IndicatorLength {
                name: name.to_string(),
                expected: self.bars.len(),
                actual: values.len(),
            });
        }
        self.warmup = self.warmup.max(warmup_len(values));
        self.registered.push(name.to_string());
        Ok(())
    }

    /// First bar on which `next` may run.
    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn registered(&self) -> &[String] {
        &self.registered
    }
}

// ─── Per-bar phase ───────────────────────────────────────────────────

/// Context for a single call of `Strategy::next`.
pub struct BarContext<'a> {
    index: usize,
    bar: &'a Bar,
    broker: &'a mut Broker,
}

impl<'a> BarContext<'a> {
    pub(crate) fn new(index: usize, bar: &'a Bar, broker: &'a mut Broker) -> Self {
        Self { index, bar, broker }
    }

    /// Index of the current bar; data up to and including it is visible.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bar(&self) -> &Bar {
        self.bar
    }

    pub fn position(&self) -> PositionSnapshot {
        PositionSnapshot::of(self.broker.position(), self.bar.close)
    }

    /// Cash plus open position value at the current close.
    pub fn equity(&self) -> f64 {
        self.broker.equity(self.bar.close)
    }

    pub fn closed_trade_count(&self) -> usize {
        self.broker.trades().len()
    }

    pub fn buy(
        &mut self,
        size: Option<f64>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), StrategyError> {
        self.submit(OrderSide::Buy, size, stop_loss, take_profit)
    }

    pub fn sell(
        &mut self,
        size: Option<f64>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), StrategyError> {
        self.submit(OrderSide::Sell, size, stop_loss, take_profit)
    }

    /// Queue a close of `portion` of the open position. No-op when flat.
    pub fn close_position(&mut self, portion: f64) -> Result<(), StrategyError> {
        let order = PendingOrder::close(portion, self.index)?;
        if self.broker.position().is_some() {
            self.broker.queue(order);
        }
        Ok(())
    }

    fn submit(
        &mut self,
        side: OrderSide,
        size: Option<f64>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), StrategyError> {
        let size = match size {
            Some(s) => OrderSize::parse(s)?,
            None => OrderSize::ALL_IN,
        };
        let request = OrderRequest {
            side,
            size,
            stop_loss,
            take_profit,
            placed_bar: self.index,
        };
        // Market orders are checked against the latest known price.
        request.validate_brackets(self.bar.close)?;
        self.broker.queue(PendingOrder::Entry(request));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                timestamp: DateTime::from_timestamp(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 0.0,
            })
            .collect()
    }

    #[test]
    fn warmup_is_latest_first_valid() {
        let data = bars(5);
        let mut ctx = InitContext::new(&data);
        ctx.register_indicator("a", &[f64::NAN, 1.0, 1.0, 1.0, 1.0]).unwrap();
        ctx.register_indicator("b", &[f64::NAN, f64::NAN, f64::NAN, 1.0, 1.0]).unwrap();
        assert_eq!(ctx.warmup(), 3);
        assert_eq!(ctx.registered(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn indicator_length_mismatch_rejected() {
        let data = bars(5);
        let mut ctx = InitContext::new(&data);
        let err = ctx.register_indicator("short", &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            StrategyError::IndicatorLength {
                expected: 5,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn invalid_size_is_illegal_order() {
        let data = bars(2);
        let mut broker = Broker::new(10_000.0, 0.0);
        let mut ctx = BarContext::new(0, &data[0], &mut broker);
        let err = ctx.buy(Some(2.5), None, None).unwrap_err();
        assert!(err.to_string().starts_with("illegal order"));
    }

    #[test]
    fn close_when_flat_queues_nothing() {
        let data = bars(2);
        let mut broker = Broker::new(10_000.0, 0.0);
        let mut ctx = BarContext::new(0, &data[0], &mut broker);
        ctx.close_position(1.0).unwrap();
        assert_eq!(broker.pending_count(), 0);
    }
}
