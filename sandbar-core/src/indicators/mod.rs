//! Indicator math over plain `f64` series.
//!
//! Every function takes the full input series and returns a vector of the
//! same length, with `NaN` for positions that are still inside the
//! indicator's warm-up window. A `NaN` in the input taints the outputs whose
//! window covers it.
//!
//! The conventions follow the usual technical-analysis library defaults:
//! - EMA is seeded with the SMA of the first `period` values
//! - RSI and ATR use Wilder smoothing
//! - standard deviation is the population form (divide by N)

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod momentum;
pub mod roc;
pub mod rolling;
pub mod rsi;
pub mod sma;

pub use atr::{atr, true_range, wilder_smooth};
pub use bollinger::{bollinger, stddev, BollingerBands};
pub use ema::ema;
pub use macd::{macd, Macd};
pub use momentum::momentum;
pub use roc::roc;
pub use rolling::{rolling_max, rolling_min};
pub use rsi::rsi;
pub use sma::sma;

/// Index of the first non-NaN value, if any.
pub fn first_valid(values: &[f64]) -> Option<usize> {
    values.iter().position(|v| !v.is_nan())
}

/// Number of leading positions that are NaN (the warm-up length).
pub fn warmup_len(values: &[f64]) -> usize {
    first_valid(values).unwrap_or(values.len())
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
