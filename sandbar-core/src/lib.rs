//! Sandbar Core — the backtesting engine strategies run against.
//!
//! This crate contains:
//! - Domain types (bars, orders, positions, trades)
//! - Indicator math over plain `f64` series
//! - A single-instrument bar loop driving a `Strategy` implementation
//! - Run statistics keyed the way Python backtesting engines report them
//! - A self-contained HTML report
//!
//! It knows nothing about where strategies come from; the scripting layer
//! implements `engine::Strategy` on top of it.

pub mod domain;
pub mod engine;
pub mod indicators;
pub mod report;
pub mod stats;

pub use domain::{Bar, BarField, TradeRecord};
pub use engine::{run_backtest, BacktestOutcome, EngineError, EngineSettings, Strategy};
pub use report::{render_html, ReportOptions, RunSummary};
pub use stats::BacktestStats;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: data handed across threads by callers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::TradeRecord>();
        require_sync::<domain::TradeRecord>();
        require_send::<engine::EngineSettings>();
        require_sync::<engine::EngineSettings>();
        require_send::<engine::BacktestOutcome>();
        require_sync::<engine::BacktestOutcome>();
        require_send::<stats::BacktestStats>();
        require_sync::<stats::BacktestStats>();
        require_send::<engine::EngineError>();
        require_sync::<engine::EngineError>();
    }

    /// Architecture contract: a strategy's per-bar hook only receives a
    /// `BarContext`, which exposes no bars beyond the current one.
    #[test]
    fn next_hook_sees_only_bar_context() {
        fn _check_trait_object_builds(
            strategy: &mut dyn Strategy,
            ctx: &mut engine::BarContext<'_>,
        ) -> Result<(), engine::StrategyError> {
            strategy.next(ctx)
        }
    }
}
