//! Sandbar Runner — one sandboxed backtest per working directory.
//!
//! This crate builds on `sandbar-core` and `sandbar-script` to provide:
//! - Configuration loading and validation (`config.json`)
//! - Operator settings from TOML
//! - Market data loading (`ohlcv.json`, or `ohlcv.csv`)
//! - Adaptation of candles into a polars price table
//! - The backtest stage with raw statistics and the HTML report
//! - Metrics extraction that never fails
//! - The single success/failure result document

pub mod backtest;
pub mod config;
pub mod error;
pub mod market_data;
pub mod metrics;
pub mod pipeline;
pub mod result;
pub mod series;
pub mod settings;

pub use backtest::{BacktestError, BacktestReport};
pub use config::{load_config, ConfigError, RunConfig};
pub use error::{PipelineError, Stage};
pub use market_data::{load_market_data, CandleSeries, DataError};
pub use metrics::{extract_metrics, Extraction, MetricsSummary};
pub use pipeline::{run, run_to_result, RunContext, RunOutput};
pub use result::RunResult;
pub use series::{adapt, ConversionError, PriceTable};
pub use settings::{RunnerSettings, SettingsError};
