//! Backtest stage: run a validated strategy over the price table and
//! produce the raw statistics document and the HTML report.

use crate::config::RunConfig;
use crate::series::{ConversionError, PriceTable};
use crate::settings::RunnerSettings;
use sandbar_core::engine::{run_backtest, BacktestOutcome, EngineError, StrategyError};
use sandbar_core::report::{render_html, RunSummary};
use sandbar_core::stats::BacktestStats;
use sandbar_script::{RuntimeError, ScriptStrategy, StrategyDefinition};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("price table could not be read back: {0}")]
    Table(#[from] ConversionError),
}

impl BacktestError {
    /// The script failure underneath, when the strategy itself failed.
    pub fn script_error(&self) -> Option<&RuntimeError> {
        match self {
            BacktestError::Engine(EngineError::Strategy {
                source: StrategyError::Runtime(inner),
                ..
            }) => inner.downcast_ref::<RuntimeError>(),
            _ => None,
        }
    }

    /// Strategy source line of the failure, when known.
    pub fn line(&self) -> Option<usize> {
        self.script_error().and_then(|e| e.line)
    }
}

/// Everything a finished backtest hands to the later stages.
#[derive(Debug)]
pub struct BacktestReport {
    pub outcome: BacktestOutcome,
    pub stats: BacktestStats,
    /// Statistics as a key/value document, keyed by display name.
    pub raw_stats: serde_json::Value,
    pub html_report: String,
}

pub fn run(
    definition: &StrategyDefinition,
    config: &RunConfig,
    table: &PriceTable,
    settings: &RunnerSettings,
    fingerprint: Option<&str>,
) -> Result<BacktestReport, BacktestError> {
    let bars = table.to_bars()?;
    let engine = settings.engine_settings(config.initial_capital, config.commission);
    let mut strategy = ScriptStrategy::new(definition, config.initial_capital);

    let outcome = run_backtest(&bars, &mut strategy, &engine)?;
    tracing::info!(
        strategy = %outcome.strategy_name,
        trades = outcome.trades.len(),
        cancelled = outcome.cancelled_orders,
        "backtest finished"
    );
    if let Some(bar) = outcome.bankrupt_at {
        tracing::warn!(bar, "equity exhausted, trading stopped");
    }

    let stats = BacktestStats::compute(&bars, &outcome, &engine);
    let summary = RunSummary {
        strategy_name: outcome.strategy_name.clone(),
        period: Some((config.start_date.to_string(), config.end_date.to_string())),
        cash: config.initial_capital,
        commission: config.commission,
        fingerprint: fingerprint.map(str::to_string),
    };
    let html_report = render_html(&bars, &outcome, &stats, &summary, &settings.report_options());

    Ok(BacktestReport {
        raw_stats: stats.to_raw(),
        stats,
        outcome,
        html_report,
    })
}
