//! Bollinger Bands and rolling standard deviation.
//!
//! - Middle: SMA(x, period)
//! - Upper: middle + dev_up * stddev(x, period)
//! - Lower: middle - dev_down * stddev(x, period)
//!
//! Uses population stddev (divide by N).

use super::sma::sma;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Rolling population standard deviation, scaled by `deviations`.
pub fn stddev(values: &[f64], period: usize, deviations: f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &values[(i + 1 - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window
            .iter()
            .map(|v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / period as f64;
        result[i] = variance.sqrt() * deviations;
    }

    result
}

pub fn bollinger(values: &[f64], period: usize, dev_up: f64, dev_down: f64) -> BollingerBands {
    let middle = sma(values, period);
    let sd = stddev(values, period, 1.0);
    let upper = middle.iter().zip(&sd).map(|(m, s)| m + dev_up * s).collect();
    let lower = middle.iter().zip(&sd).map(|(m, s)| m - dev_down * s).collect();
    BollingerBands {
        upper,
        middle,
        lower,
    }
}
