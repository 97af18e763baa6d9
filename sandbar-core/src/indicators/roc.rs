//! Rate of Change (ROC).
//!
//! ROC[t] = (x[t] - x[t-period]) / x[t-period] * 100

pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 {
        return result;
    }

    for i in period..n {
        let prev = values[i - period];
        if prev != 0.0 {
            result[i] = (values[i] - prev) / prev * 100.0;
        }
    }

    result
}
