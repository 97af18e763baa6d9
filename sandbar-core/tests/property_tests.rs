//! Property tests for engine and indicator invariants.
//!
//! Uses proptest to verify:
//! 1. Equity accounting — final equity equals cash plus realized PnL
//! 2. Indicator shape — output length equals input length
//! 3. Warm-up — `next` never runs before every indicator is defined

use chrono::DateTime;
use proptest::prelude::*;
use sandbar_core::domain::Bar;
use sandbar_core::engine::{
    run_backtest, BarContext, EngineSettings, InitContext, Strategy as EngineStrategy,
    StrategyError,
};
use sandbar_core::indicators::{ema, rsi, sma, stddev, warmup_len};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(10.0..500.0_f64, 2..80)
}

fn arb_actions(n: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, n)
}

fn bars_from(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: DateTime::from_timestamp(1_704_153_600 + i as i64 * 86_400, 0).unwrap(),
                open,
                high: open.max(close) * 1.01,
                low: open.min(close) * 0.99,
                close,
                volume: 0.0,
            }
        })
        .collect()
}

/// Replays a fixed action per bar: 0 = nothing, 1 = buy, 2 = sell, 3 = close.
struct Replay {
    actions: Vec<u8>,
    warmup: usize,
    earliest_next: Option<usize>,
}

impl EngineStrategy for Replay {
    fn name(&self) -> &str {
        "Replay"
    }

    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), StrategyError> {
        let n = ctx.bars().len();
        let gate: Vec<f64> = (0..n)
            .map(|i| if i < self.warmup { f64::NAN } else { 0.0 })
            .collect();
        ctx.register_indicator("gate", &gate)
    }

    fn next(&mut self, ctx: &mut BarContext<'_>) -> Result<(), StrategyError> {
        self.earliest_next.get_or_insert(ctx.index());
        match self.actions.get(ctx.index()) {
            Some(1) => ctx.buy(Some(0.5), None, None),
            Some(2) => ctx.sell(Some(0.5), None, None),
            Some(3) => ctx.close_position(1.0),
            _ => Ok(()),
        }
    }
}

proptest! {
    #[test]
    fn equity_equals_cash_plus_realized_pnl(
        (closes, actions) in arb_closes().prop_flat_map(|c| {
            let n = c.len();
            (Just(c), arb_actions(n))
        }),
        commission in 0.0..0.01_f64,
    ) {
        let bars = bars_from(&closes);
        let settings = EngineSettings::new(10_000.0, commission);
        let mut strategy = Replay { actions, warmup: 0, earliest_next: None };
        let outcome = run_backtest(&bars, &mut strategy, &settings).unwrap();

        let net: f64 = outcome.trades.iter().map(|t| t.net_pnl).sum();
        let final_equity = *outcome.equity_curve.last().unwrap();
        prop_assert!((final_equity - (10_000.0 + net)).abs() < 1e-6);
        prop_assert_eq!(outcome.equity_curve.len(), bars.len());
    }

    #[test]
    fn next_never_runs_during_warmup(closes in arb_closes(), warmup in 0usize..100) {
        let bars = bars_from(&closes);
        let mut strategy = Replay { actions: Vec::new(), warmup, earliest_next: None };
        let outcome = run_backtest(&bars, &mut strategy, &EngineSettings::new(1_000.0, 0.0)).unwrap();
        let expected = warmup.min(bars.len());
        prop_assert_eq!(outcome.first_trading_bar, expected);
        if let Some(first) = strategy.earliest_next {
            prop_assert_eq!(first, warmup);
        } else {
            prop_assert!(warmup >= bars.len());
        }
    }

    #[test]
    fn indicators_preserve_length(values in arb_closes(), period in 1usize..30) {
        for out in [
            sma(&values, period),
            ema(&values, period),
            rsi(&values, period),
            stddev(&values, period, 1.0),
        ] {
            prop_assert_eq!(out.len(), values.len());
        }
        prop_assert_eq!(warmup_len(&sma(&values, period)), (period - 1).min(values.len()));
    }
}
