//! Metrics extraction: the fixed summary schema read out of the raw
//! statistics document.
//!
//! Extraction never fails. Every field is read independently and falls back
//! to 0 when it is missing, null, non-finite or not coercible to a number.
//! When the document is not key-accessible at all, a degraded pass reads the
//! minimal subset from `[key, value]` pairs if it can.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TOTAL_RETURN: &str = "Return [%]";
pub const SHARPE_RATIO: &str = "Sharpe Ratio";
pub const MAX_DRAWDOWN: &str = "Max. Drawdown [%]";
pub const WIN_RATE: &str = "Win Rate [%]";
pub const TOTAL_TRADES: &str = "# Trades";
pub const PROFIT_FACTOR: &str = "Profit Factor";
pub const BEST_DAY: &str = "Best Day [%]";
pub const WORST_DAY: &str = "Worst Day [%]";
pub const AVG_TRADE: &str = "Avg. Trade [%]";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: u64,
    pub profit_factor: f64,
    pub best_day: f64,
    pub worst_day: f64,
    pub avg_trade: f64,
}

/// How the summary was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    Full,
    /// The raw document had the wrong shape; only the minimal subset was
    /// attempted.
    Degraded,
}

/// Extract the summary, logging when the degraded path was taken.
pub fn extract_metrics(raw: &Value) -> MetricsSummary {
    extract_with_status(raw).0
}

pub fn extract_with_status(raw: &Value) -> (MetricsSummary, Extraction) {
    match raw {
        Value::Object(stats) => (full(stats), Extraction::Full),
        other => {
            tracing::warn!(
                kind = "MetricsExtractionDegraded",
                shape = shape(other),
                "raw statistics are not a key/value object, returning the minimal subset"
            );
            (degraded(other), Extraction::Degraded)
        }
    }
}

fn full(stats: &Map<String, Value>) -> MetricsSummary {
    let number = |key: &str| stats.get(key).and_then(coerce).unwrap_or(0.0);
    MetricsSummary {
        total_return: number(TOTAL_RETURN),
        sharpe_ratio: number(SHARPE_RATIO),
        max_drawdown: number(MAX_DRAWDOWN),
        win_rate: number(WIN_RATE),
        total_trades: count(stats.get(TOTAL_TRADES)),
        profit_factor: number(PROFIT_FACTOR),
        best_day: number(BEST_DAY),
        worst_day: number(WORST_DAY),
        avg_trade: number(AVG_TRADE),
    }
}

/// Return, sharpe, drawdown, win rate and trade count only.
fn degraded(raw: &Value) -> MetricsSummary {
    let pairs: Map<String, Value> = match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item.as_array().map(Vec::as_slice) {
                Some([Value::String(key), value]) => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect(),
        _ => Map::new(),
    };
    let number = |key: &str| pairs.get(key).and_then(coerce).unwrap_or(0.0);
    MetricsSummary {
        total_return: number(TOTAL_RETURN),
        sharpe_ratio: number(SHARPE_RATIO),
        max_drawdown: number(MAX_DRAWDOWN),
        win_rate: number(WIN_RATE),
        total_trades: count(pairs.get(TOTAL_TRADES)),
        ..MetricsSummary::default()
    }
}

/// Numbers, numeric strings and booleans coerce; anything non-finite does not.
fn coerce(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn count(value: Option<&Value>) -> u64 {
    // Float-to-int casts saturate; negatives become 0.
    value.and_then(coerce).map_or(0, |n| n.trunc() as u64)
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
