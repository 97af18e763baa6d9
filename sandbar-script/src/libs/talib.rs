//! The talib subset, backed by the core indicator math.
//!
//! Parameter names and defaults match TA-Lib's Python binding so existing
//! strategies port unchanged. Outputs are full-length arrays with NaN
//! during warm-up.

use super::{ndarray, Args, NativeFn};
use crate::error::{RtResult, RuntimeError};
use crate::interp::Interpreter;
use crate::value::Value;
use sandbar_core::indicators;

pub static FUNCTIONS: &[NativeFn] = &[
    NativeFn { name: "SMA", call: sma },
    NativeFn { name: "EMA", call: ema },
    NativeFn { name: "RSI", call: rsi },
    NativeFn { name: "ATR", call: atr },
    NativeFn { name: "MACD", call: macd },
    NativeFn { name: "BBANDS", call: bbands },
    NativeFn { name: "STDDEV", call: stddev },
    NativeFn { name: "ROC", call: roc },
    NativeFn { name: "MOM", call: mom },
    NativeFn { name: "MAX", call: max },
    NativeFn { name: "MIN", call: min },
];

/// Single-input, single-period indicator.
fn windowed(args: &Args, default_period: usize, f: fn(&[f64], usize) -> Vec<f64>) -> RtResult<Value> {
    args.expect_at_most(2, &["real", "timeperiod"])?;
    let real = args.array(0, "real")?;
    let period = args.period_or(1, "timeperiod", default_period)?;
    Ok(ndarray(f(&real, period)))
}

fn sma(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 30, indicators::sma)
}

fn ema(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 30, indicators::ema)
}

fn rsi(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 14, indicators::rsi)
}

fn roc(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 10, indicators::roc)
}

fn mom(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 10, indicators::momentum)
}

fn max(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 30, indicators::rolling_max)
}

fn min(_: &Interpreter, args: &Args) -> RtResult<Value> {
    windowed(args, 30, indicators::rolling_min)
}

fn atr(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(4, &["high", "low", "close", "timeperiod"])?;
    let high = args.array(0, "high")?;
    let low = args.array(1, "low")?;
    let close = args.array(2, "close")?;
    if high.len() != low.len() || low.len() != close.len() {
        return Err(RuntimeError::value_error(format!(
            "ATR() inputs differ in length: high {}, low {}, close {}",
            high.len(),
            low.len(),
            close.len()
        )));
    }
    let period = args.period_or(3, "timeperiod", 14)?;
    Ok(ndarray(indicators::atr(&high, &low, &close, period)))
}

/// Returns `(macd, signal, hist)`.
fn macd(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(4, &["real", "fastperiod", "slowperiod", "signalperiod"])?;
    let real = args.array(0, "real")?;
    let fast = args.period_or(1, "fastperiod", 12)?;
    let slow = args.period_or(2, "slowperiod", 26)?;
    let signal = args.period_or(3, "signalperiod", 9)?;
    let out = indicators::macd(&real, fast, slow, signal);
    Ok(Value::tuple(vec![
        ndarray(out.macd),
        ndarray(out.signal),
        ndarray(out.histogram),
    ]))
}

/// Returns `(upper, middle, lower)`.
fn bbands(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(5, &["real", "timeperiod", "nbdevup", "nbdevdn", "matype"])?;
    let real = args.array(0, "real")?;
    let period = args.period_or(1, "timeperiod", 5)?;
    let up = args.number_or(2, "nbdevup", 2.0)?;
    let down = args.number_or(3, "nbdevdn", 2.0)?;
    let matype = args.integer_or(4, "matype", 0)?;
    if matype != 0 {
        return Err(RuntimeError::value_error(format!(
            "BBANDS() supports only matype=0 (simple moving average), got {matype}"
        )));
    }
    let bands = indicators::bollinger(&real, period, up, down);
    Ok(Value::tuple(vec![
        ndarray(bands.upper),
        ndarray(bands.middle),
        ndarray(bands.lower),
    ]))
}

fn stddev(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(3, &["real", "timeperiod", "nbdev"])?;
    let real = args.array(0, "real")?;
    let period = args.period_or(1, "timeperiod", 5)?;
    let deviations = args.number_or(2, "nbdev", 1.0)?;
    Ok(ndarray(indicators::stddev(&real, period, deviations)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ArrayValue;

    fn closes(n: usize) -> Value {
        Value::Array(ArrayValue::ndarray((0..n).map(|i| 100.0 + i as f64).collect()))
    }

    #[test]
    fn default_periods_apply() {
        let interp = Interpreter::default();
        let out = sma(&interp, &Args::new("SMA", vec![closes(40)], Vec::new())).unwrap();
        let Value::Array(a) = out else { panic!("expected array") };
        assert_eq!(indicators::warmup_len(a.values()), 29);
    }

    #[test]
    fn keyword_period() {
        let interp = Interpreter::default();
        let args = Args::new(
            "RSI",
            vec![closes(20)],
            vec![("timeperiod".to_string(), Value::Number(5.0))],
        );
        let Value::Array(a) = rsi(&interp, &args).unwrap() else { panic!("expected array") };
        assert_eq!(a.len(), 20);
        assert_eq!(indicators::warmup_len(a.values()), 5);
    }

    #[test]
    fn macd_returns_three_arrays() {
        let interp = Interpreter::default();
        let out = macd(&interp, &Args::new("MACD", vec![closes(60)], Vec::new())).unwrap();
        let Value::Tuple(parts) = out else { panic!("expected tuple") };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn zero_period_rejected() {
        let interp = Interpreter::default();
        let args = Args::new("SMA", vec![closes(10), Value::Number(0.0)], Vec::new());
        assert!(sma(&interp, &args).is_err());
    }
}
