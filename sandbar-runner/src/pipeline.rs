//! The run pipeline: config → market data → price table → strategy source
//! → compile → execute → backtest → metrics → report.
//!
//! Stages run strictly in order on one thread. The first failure stops the
//! run; nothing is retried. State is carried in an explicit [`RunContext`].

use crate::backtest;
use crate::config::{load_config, RunConfig};
use crate::error::{PipelineError, Stage};
use crate::market_data::{load_market_data, CandleSeries};
use crate::metrics::{extract_with_status, Extraction, MetricsSummary};
use crate::result::RunResult;
use crate::series::adapt;
use crate::settings::RunnerSettings;
use sandbar_script::{compile, execute};
use std::path::{Path, PathBuf};

/// Fixed name of the strategy source resource.
pub const STRATEGY_FILE: &str = "strategy.py";

/// Per-run context threaded through the stages.
#[derive(Debug, Clone)]
pub struct RunContext {
    workdir: PathBuf,
    settings: RunnerSettings,
    fingerprint: Option<String>,
}

impl RunContext {
    pub fn new(workdir: impl Into<PathBuf>, settings: RunnerSettings) -> Self {
        Self {
            workdir: workdir.into(),
            settings,
            fingerprint: None,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Set once the inputs have been read.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub html_report: String,
    pub metrics: MetricsSummary,
    pub extraction: Extraction,
    pub strategy_name: String,
    pub fingerprint: String,
}

/// BLAKE3 over the canonical config, the raw candles and the strategy source.
pub fn run_fingerprint(config: &RunConfig, candles: &CandleSeries, source: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        serde_json::to_vec(config).unwrap_or_default(),
        serde_json::to_vec(candles.candles()).unwrap_or_default(),
        source.as_bytes().to_vec(),
    ] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(&part);
    }
    hasher.finalize().to_hex().to_string()
}

fn read_strategy_source(workdir: &Path) -> Result<String, PipelineError> {
    let path = workdir.join(STRATEGY_FILE);
    if !path.is_file() {
        return Err(PipelineError::StrategySourceNotFound(path));
    }
    std::fs::read_to_string(&path).map_err(|source| PipelineError::StrategySource { path, source })
}

fn enter(stage: Stage) {
    tracing::info!(stage = stage.name(), "stage started");
}

/// Run every stage against the context's working directory.
pub fn run(ctx: &mut RunContext) -> Result<RunOutput, PipelineError> {
    enter(Stage::Config);
    let config = load_config(&ctx.workdir)?;

    enter(Stage::MarketData);
    let candles = load_market_data(&ctx.workdir)?;
    tracing::debug!(candles = candles.len(), source = ?candles.source(), "market data loaded");

    enter(Stage::Series);
    let table = adapt(&candles)?;

    enter(Stage::StrategySource);
    let source = read_strategy_source(&ctx.workdir)?;
    let fingerprint = run_fingerprint(&config, &candles, &source);
    ctx.fingerprint = Some(fingerprint.clone());

    enter(Stage::Compile);
    let unit = compile(&source, &ctx.settings.compile_options())?;

    enter(Stage::Execute);
    let definition = execute(&unit, &config.parameters, ctx.settings.limits())?;
    tracing::info!(strategy = definition.name(), "strategy contract satisfied");

    enter(Stage::Backtest);
    let report = backtest::run(&definition, &config, &table, &ctx.settings, Some(&fingerprint))?;

    enter(Stage::Metrics);
    let (metrics, extraction) = extract_with_status(&report.raw_stats);

    enter(Stage::Report);
    Ok(RunOutput {
        html_report: report.html_report,
        metrics,
        extraction,
        strategy_name: report.outcome.strategy_name,
        fingerprint,
    })
}

/// Run the pipeline and fold the outcome into the result document.
pub fn run_to_result(ctx: &mut RunContext) -> RunResult {
    let result = run(ctx);
    if let Err(err) = &result {
        tracing::error!(stage = err.stage().name(), kind = err.kind(), "run failed");
    }
    RunResult::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::DataSource;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config() -> RunConfig {
        RunConfig {
            initial_capital: 10_000.0,
            commission: 0.002,
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn fingerprint_covers_every_input() {
        let candles = CandleSeries::new(vec![json!({"timestamp": 1})], DataSource::Json).unwrap();
        let base = run_fingerprint(&config(), &candles, "x = 1\n");
        assert_eq!(base, run_fingerprint(&config(), &candles, "x = 1\n"));
        assert_eq!(base.len(), 64);

        assert_ne!(base, run_fingerprint(&config(), &candles, "x = 2\n"));
        let other = CandleSeries::new(vec![json!({"timestamp": 2})], DataSource::Json).unwrap();
        assert_ne!(base, run_fingerprint(&config(), &other, "x = 1\n"));
        let mut cheaper = config();
        cheaper.commission = 0.0;
        assert_ne!(base, run_fingerprint(&cheaper, &candles, "x = 1\n"));
    }

    #[test]
    fn missing_strategy_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_strategy_source(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "StrategySourceNotFound");
    }
}
