//! Attribute tables for arrays, Series, lists and rolling windows.
//!
//! Each value type exposes a fixed set of properties and methods; there is
//! no generic attribute access.

use super::{array_value, extreme, mean, std_dev, Args};
use crate::error::{RtResult, RuntimeError};
use crate::value::{ArrayKind, ArrayValue, Value};

const NDARRAY_METHODS: &[&str] = &["mean", "std", "sum", "min", "max", "any", "all", "tolist"];
const SERIES_METHODS: &[&str] = &[
    "mean", "std", "sum", "min", "max", "any", "all", "tolist", "rolling", "shift", "diff",
    "pct_change", "fillna", "abs",
];
const LIST_METHODS: &[&str] = &["append"];
const ROLLING_METHODS: &[&str] = &["mean", "std", "sum", "min", "max"];

fn method(receiver: &Value, table: &'static [&'static str], name: &str) -> Option<Value> {
    table
        .iter()
        .find(|m| **m == name)
        .map(|m| Value::Method(Box::new(receiver.clone()), m))
}

/// Resolve `value.name` for the container types.
pub fn attribute(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Array(a) => match (a.kind, name) {
            (_, "size") => Some(Value::Number(a.len() as f64)),
            (ArrayKind::NdArray, "s") => Some(Value::Array(a.with_kind(ArrayKind::Series))),
            (ArrayKind::Series, "values") => Some(Value::Array(a.with_kind(ArrayKind::NdArray))),
            (ArrayKind::Series, "iloc") => Some(Value::ILoc(a.clone())),
            (ArrayKind::NdArray, _) => method(value, NDARRAY_METHODS, name),
            (ArrayKind::Series, _) => method(value, SERIES_METHODS, name),
        },
        Value::List(_) => method(value, LIST_METHODS, name),
        Value::Rolling(..) => method(value, ROLLING_METHODS, name),
        _ => None,
    }
}

pub fn call_method(receiver: &Value, name: &'static str, args: &Args) -> RtResult<Value> {
    match receiver {
        Value::Array(a) => array_method(a, name, args),
        Value::List(items) => {
            args.expect_at_most(1, &[])?;
            let item = args.positional.first().cloned().ok_or_else(|| {
                RuntimeError::type_error("append() takes exactly one argument (0 given)")
            })?;
            items.borrow_mut().push(item);
            Ok(Value::None)
        }
        Value::Rolling(a, window) => rolling_method(a, *window, name, args),
        other => Err(RuntimeError::attribute_error(format!(
            "'{}' object has no method '{name}'",
            other.type_name()
        ))),
    }
}

fn array_method(a: &ArrayValue, name: &'static str, args: &Args) -> RtResult<Value> {
    let series = a.kind == ArrayKind::Series;
    // Series reductions skip NaN; numpy reductions propagate it.
    let reduced = |values: &[f64]| -> Vec<f64> {
        if series {
            values.iter().copied().filter(|v| !v.is_nan()).collect()
        } else {
            values.to_vec()
        }
    };
    match name {
        "mean" => {
            args.expect_at_most(0, &[])?;
            Ok(Value::Number(mean(&reduced(a.values()))))
        }
        "std" => {
            args.expect_at_most(1, &["ddof"])?;
            let ddof = args.integer_or(0, "ddof", if series { 1 } else { 0 })?.max(0) as usize;
            Ok(Value::Number(std_dev(&reduced(a.values()), ddof)))
        }
        "sum" => {
            args.expect_at_most(0, &[])?;
            Ok(Value::Number(reduced(a.values()).iter().sum()))
        }
        "min" | "max" => {
            args.expect_at_most(0, &[])?;
            match extreme(&reduced(a.values()), name == "max") {
                Some(v) => Ok(Value::Number(v)),
                None if series => Ok(Value::Number(f64::NAN)),
                None => Err(RuntimeError::value_error(format!("{name}() of a zero-size array"))),
            }
        }
        "any" => {
            args.expect_at_most(0, &[])?;
            Ok(Value::Bool(reduced(a.values()).iter().any(|v| *v != 0.0)))
        }
        "all" => {
            args.expect_at_most(0, &[])?;
            Ok(Value::Bool(reduced(a.values()).iter().all(|v| *v != 0.0)))
        }
        "tolist" => {
            args.expect_at_most(0, &[])?;
            Ok(Value::list(a.values().iter().map(|v| Value::Number(*v)).collect()))
        }
        "rolling" => {
            args.expect_at_most(1, &["window"])?;
            args.required(0, "window")?;
            let window = args.period_or(0, "window", 1)?;
            Ok(Value::Rolling(a.clone(), window))
        }
        "shift" => {
            args.expect_at_most(1, &["periods"])?;
            let periods = args.integer_or(0, "periods", 1)?;
            Ok(array_value(shift(a.values(), periods), a.kind))
        }
        "diff" | "pct_change" => {
            args.expect_at_most(1, &["periods"])?;
            let periods = args.integer_or(0, "periods", 1)?;
            let previous = shift(a.values(), periods);
            let out = a
                .values()
                .iter()
                .zip(&previous)
                .map(|(now, before)| if name == "diff" { now - before } else { now / before - 1.0 })
                .collect();
            Ok(array_value(out, a.kind))
        }
        "fillna" => {
            args.expect_at_most(1, &["value"])?;
            let fill = args.number(0, "value")?;
            let out = a.values().iter().map(|v| if v.is_nan() { fill } else { *v }).collect();
            Ok(array_value(out, a.kind))
        }
        "abs" => {
            args.expect_at_most(0, &[])?;
            Ok(array_value(a.values().iter().map(|v| v.abs()).collect(), a.kind))
        }
        _ => {
            Err(RuntimeError::attribute_error(format!(
                "'{}' object has no method '{name}'",
                Value::Array(a.clone()).type_name()
            )))
        }
    }
}

/// Shift values forward by `periods` (backward when negative), filling with NaN.
fn shift(values: &[f64], periods: i64) -> Vec<f64> {
    let n = values.len() as i64;
    (0..n)
        .map(|i| {
            let src = i - periods;
            if (0..n).contains(&src) {
                values[src as usize]
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Trailing-window statistic; a window with fewer than `window` valid values is NaN.
fn rolling_method(a: &ArrayValue, window: usize, name: &str, args: &Args) -> RtResult<Value> {
    args.expect_at_most(0, &[])?;
    let values = a.values();
    let stat = |slice: &[f64]| -> f64 {
        match name {
            "mean" => mean(slice),
            "std" => std_dev(slice, 1),
            "sum" => slice.iter().sum(),
            "min" => extreme(slice, false).unwrap_or(f64::NAN),
            _ => extreme(slice, true).unwrap_or(f64::NAN),
        }
    };
    let out = (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return f64::NAN;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else {
                stat(slice)
            }
        })
        .collect();
    Ok(array_value(out, ArrayKind::Series))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Value {
        Value::Array(ArrayValue::series(values.to_vec()))
    }

    fn call(receiver: &Value, name: &str, positional: Vec<Value>) -> Value {
        let Some(Value::Method(recv, name)) = attribute(receiver, name) else {
            panic!("no method {name}");
        };
        call_method(&recv, name, &Args::new(name, positional, Vec::new())).unwrap()
    }

    fn values(v: Value) -> Vec<f64> {
        match v {
            Value::Array(a) => a.values().to_vec(),
            other => panic!("expected array, got {other}"),
        }
    }

    #[test]
    fn series_reductions_skip_nan() {
        let s = series(&[f64::NAN, 1.0, 3.0]);
        assert_eq!(call(&s, "mean", vec![]).as_number(), Some(2.0));
        assert_eq!(call(&s, "max", vec![]).as_number(), Some(3.0));
    }

    #[test]
    fn rolling_mean_matches_window() {
        let s = series(&[1.0, 2.0, 3.0, 4.0]);
        let rolling = call(&s, "rolling", vec![Value::Number(2.0)]);
        let out = values(call(&rolling, "mean", vec![]));
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn shift_and_pct_change() {
        let s = series(&[1.0, 2.0, 4.0]);
        let shifted = values(call(&s, "shift", vec![]));
        assert!(shifted[0].is_nan());
        assert_eq!(&shifted[1..], &[1.0, 2.0]);
        let pct = values(call(&s, "pct_change", vec![]));
        assert_eq!(&pct[1..], &[1.0, 1.0]);
        let back = values(call(&s, "shift", vec![Value::Number(-1.0)]));
        assert_eq!(&back[..2], &[2.0, 4.0]);
    }

    #[test]
    fn ndarray_has_no_series_methods() {
        let arr = Value::Array(ArrayValue::ndarray(vec![1.0]));
        assert!(attribute(&arr, "rolling").is_none());
        assert!(attribute(&arr, "s").is_some());
    }

    #[test]
    fn list_append_mutates_in_place() {
        let list = Value::list(vec![]);
        call(&list, "append", vec![Value::Number(1.0)]);
        assert_eq!(list.to_string(), "[1]");
    }
}
