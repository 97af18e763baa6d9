//! Momentum — difference over a lookback, not a percentage.
//!
//! momentum[t] = x[t] - x[t-period]

pub fn momentum(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 {
        return result;
    }

    for i in period..n {
        result[i] = values[i] - values[i - period];
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn momentum_basic() {
        let result = momentum(&[100.0, 110.0, 105.0, 115.0], 2);
        assert!(result[1].is_nan());
        assert_approx(result[2], 5.0, DEFAULT_EPSILON);
        assert_approx(result[3], 5.0, DEFAULT_EPSILON);
    }

    #[test]
    fn momentum_nan_input() {
        let result = momentum(&[100.0, f64::NAN, 105.0], 1);
        assert!(result[1].is_nan());
        assert!(result[2].is_nan());
    }
}
