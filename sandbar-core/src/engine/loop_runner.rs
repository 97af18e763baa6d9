//! Bar-by-bar event loop — the heart of the backtesting engine.
//!
//! Per bar:
//! 1. Start-of-bar: fill queued orders at the open
//! 2. Intrabar: check stop-loss / take-profit against the bar's range
//! 3. Decision: call the strategy (once warm-up is over)
//! 4. End-of-bar: with trade-on-close, fill the new orders at the close;
//!    then mark equity to market

use super::broker::{Broker, FillPoint};
use super::state::{BacktestOutcome, EngineSettings};
use super::strategy::{BarContext, InitContext, Strategy};
use super::{EngineError, Phase};
use crate::domain::{Bar, ExitReason};

/// Run a strategy over `bars`.
pub fn run_backtest(
    bars: &[Bar],
    strategy: &mut dyn Strategy,
    settings: &EngineSettings,
) -> Result<BacktestOutcome, EngineError> {
    settings.validate()?;
    if bars.is_empty() {
        return Err(EngineError::NoData);
    }

    // ─── Init ───
    let mut init = InitContext::new(bars);
    strategy
        .init(&mut init)
        .map_err(|source| EngineError::Strategy {
            phase: Phase::Init,
            bar: None,
            source,
        })?;
    let first_trading_bar = init.warmup();
    tracing::debug!(
        strategy = strategy.name(),
        indicators = init.registered().len(),
        first_trading_bar,
        "strategy initialised"
    );

    let mut broker = Broker::new(settings.cash, settings.commission);
    let mut equity_curve = Vec::with_capacity(bars.len());
    let mut bankrupt_at = None;

    for (i, bar) in bars.iter().enumerate() {
        // ─── Start-of-bar ───
        if !settings.trade_on_close {
            broker.fill_pending(FillPoint {
                bar: i,
                time: bar.timestamp,
                price: bar.open,
            });
        }

        // ─── Intrabar ───
        broker.check_brackets(bar, i);

        // ─── Decision ───
        if i >= first_trading_bar && bankrupt_at.is_none() {
            let mut ctx = BarContext::new(i, bar, &mut broker);
            strategy
                .next(&mut ctx)
                .map_err(|source| EngineError::Strategy {
                    phase: Phase::Next,
                    bar: Some(i),
                    source,
                })?;
        }

        // ─── End-of-bar ───
        let close_point = FillPoint {
            bar: i,
            time: bar.timestamp,
            price: bar.close,
        };
        if settings.trade_on_close {
            broker.fill_pending(close_point);
        }

        if bankrupt_at.is_none() && broker.equity(bar.close) <= 0.0 {
            broker.close(1.0, close_point, ExitReason::Signal);
            broker.drop_pending();
            bankrupt_at = Some(i);
            tracing::warn!(bar = i, "equity exhausted, trading stopped");
        }

        equity_curve.push(broker.equity(bar.close));
    }

    // ─── End of data ───
    let dropped_orders = broker.drop_pending();
    if dropped_orders > 0 {
        tracing::debug!(dropped_orders, "orders still queued at end of data were dropped");
    }

    let last_index = bars.len() - 1;
    let last = &bars[last_index];
    if settings.close_open_position_at_end && broker.position().is_some() {
        broker.close(
            1.0,
            FillPoint {
                bar: last_index,
                time: last.timestamp,
                price: last.close,
            },
            ExitReason::EndOfData,
        );
        equity_curve[last_index] = broker.equity(last.close);
    }

    Ok(BacktestOutcome {
        strategy_name: strategy.name().to_string(),
        equity_curve,
        commissions: broker.commission_paid(),
        first_trading_bar,
        cancelled_orders: broker.cancelled(),
        dropped_orders,
        bankrupt_at,
        trades: broker.into_trades(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StrategyError;
    use chrono::DateTime;

    fn make_bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Bar {
                    timestamp: DateTime::from_timestamp(1_704_153_600 + i as i64 * 86_400, 0)
                        .unwrap(),
                    open,
                    high: open.max(close) + 1.0,
                    low: open.min(close) - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    /// Buys on a fixed bar, optionally closes on another.
    struct Scripted {
        buy_at: usize,
        close_at: Option<usize>,
        warmup: usize,
        next_calls: Vec<usize>,
    }

    impl Scripted {
        fn new(buy_at: usize, close_at: Option<usize>) -> Self {
            Self {
                buy_at,
                close_at,
                warmup: 0,
                next_calls: Vec::new(),
            }
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), StrategyError> {
            let n = ctx.bars().len();
            let series: Vec<f64> = (0..n)
                .map(|i| if i < self.warmup { f64::NAN } else { 1.0 })
                .collect();
            ctx.register_indicator("gate", &series)
        }

        fn next(&mut self, ctx: &mut BarContext<'_>) -> Result<(), StrategyError> {
            self.next_calls.push(ctx.index());
            if ctx.index() == self.buy_at {
                ctx.buy(Some(10.0), None, None)?;
            }
            if Some(ctx.index()) == self.close_at {
                ctx.close_position(1.0)?;
            }
            Ok(())
        }
    }

    struct Failing;

    impl Strategy for Failing {
        fn name(&self) -> &str {
            "Failing"
        }
        fn init(&mut self, _: &mut InitContext<'_>) -> Result<(), StrategyError> {
            Ok(())
        }
        fn next(&mut self, ctx: &mut BarContext<'_>) -> Result<(), StrategyError> {
            ctx.buy(Some(0.0), None, None)
        }
    }

    // ── Fill timing ──

    #[test]
    fn market_order_fills_next_open() {
        let bars = make_bars(&[100.0, 102.0, 104.0, 106.0, 108.0]);
        let mut strategy = Scripted::new(1, Some(3));
        let out = run_backtest(&bars, &mut strategy, &EngineSettings::new(10_000.0, 0.0)).unwrap();

        assert_eq!(out.trades.len(), 1);
        let trade = &out.trades[0];
        assert_eq!(trade.entry_bar, 2);
        assert_eq!(trade.entry_price, 102.0); // open of bar 2 = close of bar 1
        assert_eq!(trade.exit_bar, 4);
        assert_eq!(trade.exit_price, 106.0);
        assert_eq!(trade.exit_reason, ExitReason::Signal);
        assert_eq!(out.equity_curve.len(), bars.len());
        assert_eq!(*out.equity_curve.last().unwrap(), 10_040.0);
    }

    #[test]
    fn trade_on_close_fills_same_bar() {
        let bars = make_bars(&[100.0, 102.0, 104.0, 106.0, 108.0]);
        let mut strategy = Scripted::new(1, Some(3));
        let mut settings = EngineSettings::new(10_000.0, 0.0);
        settings.trade_on_close = true;
        let out = run_backtest(&bars, &mut strategy, &settings).unwrap();

        let trade = &out.trades[0];
        assert_eq!((trade.entry_bar, trade.entry_price), (1, 102.0));
        assert_eq!((trade.exit_bar, trade.exit_price), (3, 106.0));
    }

    // ── End of data ──

    #[test]
    fn open_position_closed_at_last_close() {
        let bars = make_bars(&[100.0, 102.0, 104.0, 106.0]);
        let mut strategy = Scripted::new(0, None);
        let out = run_backtest(&bars, &mut strategy, &EngineSettings::new(10_000.0, 0.0)).unwrap();
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].exit_reason, ExitReason::EndOfData);
        assert_eq!(out.trades[0].exit_price, 106.0);
    }

    #[test]
    fn open_position_kept_when_configured() {
        let bars = make_bars(&[100.0, 102.0, 104.0, 106.0]);
        let mut strategy = Scripted::new(0, None);
        let mut settings = EngineSettings::new(10_000.0, 0.0);
        settings.close_open_position_at_end = false;
        let out = run_backtest(&bars, &mut strategy, &settings).unwrap();
        assert!(out.trades.is_empty());
        // Marked to market: 10 units bought at 100
        assert_eq!(*out.equity_curve.last().unwrap(), 10_060.0);
    }

    #[test]
    fn order_on_last_bar_is_dropped() {
        let bars = make_bars(&[100.0, 101.0, 102.0]);
        let mut strategy = Scripted::new(2, None);
        let out = run_backtest(&bars, &mut strategy, &EngineSettings::new(10_000.0, 0.0)).unwrap();
        assert!(out.trades.is_empty());
        assert_eq!(out.dropped_orders, 1);
    }

    // ── Warm-up ──

    #[test]
    fn next_starts_after_indicator_warmup() {
        let bars = make_bars(&[100.0; 6]);
        let mut strategy = Scripted::new(99, None);
        strategy.warmup = 3;
        let out = run_backtest(&bars, &mut strategy, &EngineSettings::new(10_000.0, 0.0)).unwrap();
        assert_eq!(out.first_trading_bar, 3);
        assert_eq!(strategy.next_calls, vec![3, 4, 5]);
    }

    // ── Errors ──

    #[test]
    fn strategy_error_carries_bar() {
        let bars = make_bars(&[100.0, 101.0]);
        let err = run_backtest(&bars, &mut Failing, &EngineSettings::new(10_000.0, 0.0)).unwrap_err();
        match err {
            EngineError::Strategy { phase, bar, .. } => {
                assert_eq!(phase, Phase::Next);
                assert_eq!(bar, Some(0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_data_rejected() {
        let err = run_backtest(&[], &mut Scripted::new(0, None), &EngineSettings::new(1.0, 0.0));
        assert!(matches!(err, Err(EngineError::NoData)));
    }

    #[test]
    fn flat_strategy_keeps_cash() {
        let bars = make_bars(&[100.0, 90.0, 120.0]);
        let mut strategy = Scripted::new(99, None);
        let out = run_backtest(&bars, &mut strategy, &EngineSettings::new(5_000.0, 0.01)).unwrap();
        assert!(out.equity_curve.iter().all(|&e| e == 5_000.0));
        assert_eq!(out.commissions, 0.0);
    }
}
