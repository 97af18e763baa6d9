//! Moving Average Convergence/Divergence.
//!
//! macd = EMA(fast) - EMA(slow); signal = EMA(macd, signal_period);
//! histogram = macd - signal. All three lines share the signal line's
//! warm-up so a strategy sees them become valid together.

use super::ema::ema;

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let fast_line = ema(values, fast);
    let slow_line = ema(values, slow);
    let mut line: Vec<f64> = fast_line.iter().zip(&slow_line).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal_period);

    for (m, s) in line.iter_mut().zip(&signal) {
        if s.is_nan() {
            *m = f64::NAN;
        }
    }
    let histogram = line.iter().zip(&signal).map(|(m, s)| m - s).collect();

    Macd {
        macd: line,
        signal,
        histogram,
    }
}
