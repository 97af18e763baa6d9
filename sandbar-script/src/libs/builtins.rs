//! Safe builtin functions.

use super::{Args, NativeFn};
use crate::ast::BinOp;
use crate::error::{RtResult, RuntimeError};
use crate::interp::Interpreter;
use crate::ops;
use crate::value::{format_number, ArrayValue, Value};
use std::cmp::Ordering;

/// Largest sequence `range` will materialize.
pub const MAX_RANGE: usize = 1_000_000;

pub static FUNCTIONS: &[NativeFn] = &[
    NativeFn { name: "abs", call: abs },
    NativeFn { name: "min", call: min },
    NativeFn { name: "max", call: max },
    NativeFn { name: "len", call: len },
    NativeFn { name: "round", call: round },
    NativeFn { name: "int", call: int },
    NativeFn { name: "float", call: float },
    NativeFn { name: "bool", call: boolean },
    NativeFn { name: "str", call: string },
    NativeFn { name: "list", call: list },
    NativeFn { name: "tuple", call: tuple },
    NativeFn { name: "range", call: range },
    NativeFn { name: "sum", call: sum },
    NativeFn { name: "zip", call: zip },
    NativeFn { name: "sorted", call: sorted },
    NativeFn { name: "pow", call: pow },
    NativeFn { name: "print", call: print },
];

fn abs(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    match args.required(0, "x")? {
        Value::Array(a) => Ok(Value::Array(ArrayValue::new(
            a.values().iter().map(|v| v.abs()).collect(),
            a.kind,
        ))),
        other => Ok(Value::Number(other.expect_number("abs() argument")?.abs())),
    }
}

fn min(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    extreme_of(interp, args, Ordering::Less)
}

fn max(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    extreme_of(interp, args, Ordering::Greater)
}

/// `min`/`max` over either one iterable or several arguments.
fn extreme_of(interp: &Interpreter, args: &Args, wanted: Ordering) -> RtResult<Value> {
    args.expect_at_most(usize::MAX, &["default"])?;
    let items = match args.positional.as_slice() {
        [] => return Err(RuntimeError::type_error(format!("{}() expected at least 1 argument", args.func))),
        [single] => interp.iterate(single)?,
        many => many.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => {
                if order(&item, &current, args.func)? == wanted {
                    item
                } else {
                    current
                }
            }
        });
    }
    match best {
        Some(value) => Ok(value),
        None => args.get(usize::MAX, "default").cloned().ok_or_else(|| {
            RuntimeError::value_error(format!("{}() arg is an empty sequence", args.func))
        }),
    }
}

/// Ordering for min/max/sorted: numbers with numbers, strings with strings.
fn order(a: &Value, b: &Value, func: &str) -> RtResult<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => Err(RuntimeError::type_error(format!(
                "{func}() cannot compare {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn len(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    Ok(Value::Number(interp.length(args.required(0, "obj")?)? as f64))
}

fn round(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["number", "ndigits"])?;
    let x = args.number(0, "number")?;
    match args.get(1, "ndigits") {
        None => Ok(Value::Number(x.round_ties_even())),
        Some(digits) => {
            let digits = digits.expect_integer("round() ndigits")?.clamp(-308, 308) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::Number((x * scale).round_ties_even() / scale))
        }
    }
}

fn int(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    let n = match args.get(0, "x") {
        None => 0.0,
        Some(Value::Str(s)) => s.trim().replace('_', "").parse::<i64>().map_err(|_| {
            RuntimeError::value_error(format!("invalid literal for int(): '{s}'"))
        })? as f64,
        Some(other) => {
            let n = other.expect_number("int() argument")?;
            if !n.is_finite() {
                return Err(RuntimeError::value_error(format!(
                    "cannot convert float {} to integer",
                    format_number(n)
                )));
            }
            n.trunc()
        }
    };
    Ok(Value::Number(n))
}

fn float(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    let n = match args.get(0, "x") {
        None => 0.0,
        Some(Value::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RuntimeError::value_error(format!("could not convert string to float: '{s}'")))?,
        Some(other) => other.expect_number("float() argument")?,
    };
    Ok(Value::Number(n))
}

fn boolean(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    match args.get(0, "x") {
        None => Ok(Value::Bool(false)),
        Some(value) => Ok(Value::Bool(interp.truthy(value)?)),
    }
}

fn string(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    // `get` treats an explicit None as absent, so look at the raw slot.
    match args.positional.first() {
        None => Ok(Value::str("")),
        Some(value) => Ok(Value::str(&value.to_string())),
    }
}

fn list(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    match args.get(0, "iterable") {
        None => Ok(Value::list(Vec::new())),
        Some(value) => Ok(Value::list(interp.iterate(value)?)),
    }
}

fn tuple(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &[])?;
    match args.get(0, "iterable") {
        None => Ok(Value::tuple(Vec::new())),
        Some(value) => Ok(Value::tuple(interp.iterate(value)?)),
    }
}

fn range(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(3, &[])?;
    let ints: Vec<i64> = args
        .positional
        .iter()
        .map(|v| v.expect_integer("range() argument"))
        .collect::<RtResult<_>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(RuntimeError::type_error("range() expected at least 1 argument")),
    };
    if step == 0 {
        return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 { stop - start } else { start - stop };
    let count = if span <= 0 {
        0
    } else {
        ((span + step.abs() - 1) / step.abs()) as usize
    };
    if count > MAX_RANGE {
        return Err(RuntimeError::value_error(format!(
            "range() of {count} items exceeds the limit of {MAX_RANGE}"
        )));
    }
    Ok(Value::list(
        (0..count)
            .map(|i| Value::Number((start + i as i64 * step) as f64))
            .collect(),
    ))
}

fn sum(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["start"])?;
    let items = interp.iterate(args.required(0, "iterable")?)?;
    let mut total = args.number_or(1, "start", 0.0)?;
    for item in &items {
        total += item.expect_number("sum() item")?;
    }
    Ok(Value::Number(total))
}

fn zip(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(usize::MAX, &[])?;
    let columns: Vec<Vec<Value>> = args
        .positional
        .iter()
        .map(|v| interp.iterate(v))
        .collect::<RtResult<_>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

fn sorted(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["reverse"])?;
    let mut items = interp.iterate(args.required(0, "iterable")?)?;
    let reverse = match args.get(1, "reverse") {
        Some(v) => interp.truthy(v)?,
        None => false,
    };
    // Validate comparability up front; sort_by cannot fail.
    for pair in items.windows(2) {
        order(&pair[0], &pair[1], "sorted")?;
    }
    items.sort_by(|a, b| order(a, b, "sorted").unwrap_or(Ordering::Equal));
    if reverse {
        items.reverse();
    }
    Ok(Value::list(items))
}

fn pow(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["base", "exp"])?;
    ops::binary(BinOp::Pow, args.required(0, "base")?, args.required(1, "exp")?)
}

fn print(_: &Interpreter, args: &Args) -> RtResult<Value> {
    let text: Vec<String> = args.positional.iter().map(ToString::to_string).collect();
    tracing::debug!(target: "sandbar::script", output = %text.join(" "), "print");
    Ok(Value::None)
}
