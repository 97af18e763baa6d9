//! The numpy subset.

use super::{array_value, check_allocation, extreme, mean, ndarray, std_dev, Args, NativeFn};
use crate::error::{RtResult, RuntimeError};
use crate::interp::Interpreter;
use crate::value::{ArrayKind, Value};

pub static FUNCTIONS: &[NativeFn] = &[
    NativeFn { name: "array", call: array },
    NativeFn { name: "asarray", call: array },
    NativeFn { name: "mean", call: np_mean },
    NativeFn { name: "std", call: np_std },
    NativeFn { name: "sum", call: np_sum },
    NativeFn { name: "min", call: np_min },
    NativeFn { name: "max", call: np_max },
    NativeFn { name: "abs", call: np_abs },
    NativeFn { name: "sqrt", call: sqrt },
    NativeFn { name: "log", call: log },
    NativeFn { name: "exp", call: exp },
    NativeFn { name: "isnan", call: isnan },
    NativeFn { name: "sign", call: sign },
    NativeFn { name: "ones", call: ones },
    NativeFn { name: "zeros", call: zeros },
    NativeFn { name: "full", call: full },
    NativeFn { name: "arange", call: arange },
    NativeFn { name: "diff", call: diff },
    NativeFn { name: "cumsum", call: cumsum },
    NativeFn { name: "maximum", call: maximum },
    NativeFn { name: "minimum", call: minimum },
    NativeFn { name: "convolve", call: convolve },
    NativeFn { name: "where", call: np_where },
    NativeFn { name: "clip", call: clip },
];

/// Copy an array-like into a fresh ndarray.
fn array(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["object"])?;
    Ok(ndarray(args.array(0, "object")?))
}

fn reduce(args: &Args, f: impl Fn(&[f64]) -> RtResult<f64>) -> RtResult<Value> {
    let values = args.array(0, "a")?;
    Ok(Value::Number(f(&values)?))
}

fn np_mean(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["a"])?;
    reduce(args, |v| Ok(mean(v)))
}

fn np_std(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["a", "ddof"])?;
    let ddof = args.integer_or(1, "ddof", 0)?.max(0) as usize;
    reduce(args, |v| Ok(std_dev(v, ddof)))
}

fn np_sum(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["a"])?;
    reduce(args, |v| Ok(v.iter().sum()))
}

fn np_min(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["a"])?;
    reduce(args, |v| {
        extreme(v, false).ok_or_else(|| RuntimeError::value_error("min() of a zero-size array"))
    })
}

fn np_max(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["a"])?;
    reduce(args, |v| {
        extreme(v, true).ok_or_else(|| RuntimeError::value_error("max() of a zero-size array"))
    })
}

/// Apply `f` to a scalar or to every element, keeping the array flavour.
fn ufunc(args: &Args, f: impl Fn(f64) -> f64) -> RtResult<Value> {
    args.expect_at_most(1, &["x"])?;
    let x = args.required(0, "x")?;
    match x.as_number() {
        Some(n) => Ok(Value::Number(f(n))),
        None => Ok(array_value(
            x.to_f64_vec(&format!("{}() argument", args.func))?.into_iter().map(f).collect(),
            args.kind_of(0),
        )),
    }
}

fn np_abs(_: &Interpreter, args: &Args) -> RtResult<Value> {
    ufunc(args, f64::abs)
}

fn sqrt(_: &Interpreter, args: &Args) -> RtResult<Value> {
    ufunc(args, f64::sqrt)
}

fn log(_: &Interpreter, args: &Args) -> RtResult<Value> {
    ufunc(args, f64::ln)
}

fn exp(_: &Interpreter, args: &Args) -> RtResult<Value> {
    ufunc(args, f64::exp)
}

fn sign(_: &Interpreter, args: &Args) -> RtResult<Value> {
    ufunc(args, |v| {
        if v.is_nan() {
            f64::NAN
        } else if v > 0.0 {
            1.0
        } else if v < 0.0 {
            -1.0
        } else {
            0.0
        }
    })
}

fn isnan(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["x"])?;
    let x = args.required(0, "x")?;
    match x.as_number() {
        Some(n) => Ok(Value::Bool(n.is_nan())),
        None => Ok(array_value(
            x.to_f64_vec("isnan() argument")?
                .into_iter()
                .map(|v| if v.is_nan() { 1.0 } else { 0.0 })
                .collect(),
            args.kind_of(0),
        )),
    }
}

fn shape(args: &Args) -> RtResult<usize> {
    let n = args.required(0, "shape")?.expect_integer(&format!("{}() shape", args.func))?;
    if n < 0 {
        return Err(RuntimeError::value_error("negative dimensions are not allowed"));
    }
    check_allocation(args.func, n as usize)?;
    Ok(n as usize)
}

fn ones(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["shape"])?;
    Ok(ndarray(vec![1.0; shape(args)?]))
}

fn zeros(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["shape"])?;
    Ok(ndarray(vec![0.0; shape(args)?]))
}

fn full(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["shape", "fill_value"])?;
    let fill = args.number(1, "fill_value")?;
    Ok(ndarray(vec![fill; shape(args)?]))
}

fn arange(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(3, &["start", "stop", "step"])?;
    let (start, stop) = match args.get(1, "stop") {
        Some(stop) => (args.number(0, "start")?, stop.expect_number("arange() stop")?),
        None => (0.0, args.number(0, "start")?),
    };
    let step = args.number_or(2, "step", 1.0)?;
    if step == 0.0 || !step.is_finite() {
        return Err(RuntimeError::value_error("arange() step must be a finite non-zero number"));
    }
    let count = ((stop - start) / step).ceil();
    if !count.is_finite() {
        return Err(RuntimeError::value_error("arange() bounds must be finite"));
    }
    let count = count.max(0.0) as usize;
    check_allocation("arange", count)?;
    Ok(ndarray((0..count).map(|i| start + i as f64 * step).collect()))
}

fn diff(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["a", "n"])?;
    let mut values = args.array(0, "a")?;
    let n = args.integer_or(1, "n", 1)?;
    if n < 0 {
        return Err(RuntimeError::value_error(format!("diff() order must be non-negative, got {n}")));
    }
    for _ in 0..n {
        values = values.windows(2).map(|w| w[1] - w[0]).collect();
    }
    Ok(ndarray(values))
}

fn cumsum(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["a"])?;
    let mut total = 0.0;
    let values = args
        .array(0, "a")?
        .into_iter()
        .map(|v| {
            total += v;
            total
        })
        .collect();
    Ok(ndarray(values))
}

/// Elementwise binary function with scalar broadcast.
fn elementwise(args: &Args, f: impl Fn(f64, f64) -> f64) -> RtResult<Value> {
    args.expect_at_most(2, &["x1", "x2"])?;
    let (a, b) = (args.required(0, "x1")?, args.required(1, "x2")?);
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(Value::Number(f(x, y)));
    }
    let kind = match (a, b) {
        (Value::Array(x), _) if x.kind == ArrayKind::Series => ArrayKind::Series,
        (_, Value::Array(y)) if y.kind == ArrayKind::Series => ArrayKind::Series,
        _ => ArrayKind::NdArray,
    };
    let xs = args.array(0, "x1")?;
    let ys = args.array(1, "x2")?;
    let out = broadcast(args.func, &xs, &ys)?
        .map(|(x, y)| f(x, y))
        .collect();
    Ok(array_value(out, kind))
}

/// Pair up two operands where either may be a single element.
fn broadcast<'a>(
    func: &str,
    xs: &'a [f64],
    ys: &'a [f64],
) -> RtResult<impl Iterator<Item = (f64, f64)> + 'a> {
    let len = match (xs.len(), ys.len()) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        (a, b) => {
            return Err(RuntimeError::value_error(format!(
                "{func}(): operands could not be broadcast together with lengths {a} and {b}"
            )))
        }
    };
    Ok((0..len).map(move |i| {
        let x = if xs.len() == 1 { xs[0] } else { xs[i] };
        let y = if ys.len() == 1 { ys[0] } else { ys[i] };
        (x, y)
    }))
}

fn nan_aware(pick_max: bool) -> impl Fn(f64, f64) -> f64 {
    move |x, y| {
        if x.is_nan() || y.is_nan() {
            f64::NAN
        } else if pick_max {
            x.max(y)
        } else {
            x.min(y)
        }
    }
}

fn maximum(_: &Interpreter, args: &Args) -> RtResult<Value> {
    elementwise(args, nan_aware(true))
}

fn minimum(_: &Interpreter, args: &Args) -> RtResult<Value> {
    elementwise(args, nan_aware(false))
}

/// Discrete linear convolution in `full`, `same` or `valid` mode.
fn convolve(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(3, &["a", "v", "mode"])?;
    let a = args.array(0, "a")?;
    let v = args.array(1, "v")?;
    let mode = args.str_or(2, "mode", "full")?;
    if a.is_empty() || v.is_empty() {
        return Err(RuntimeError::value_error("convolve() inputs cannot be empty"));
    }
    check_allocation("convolve", a.len().saturating_mul(v.len()))?;
    let full_len = a.len() + v.len() - 1;
    let mut full = vec![0.0; full_len];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in v.iter().enumerate() {
            full[i + j] += x * y;
        }
    }
    let (long, short) = (a.len().max(v.len()), a.len().min(v.len()));
    let out = match mode.as_str() {
        "full" => full,
        "same" => {
            let start = (full_len - long) / 2;
            full[start..start + long].to_vec()
        }
        "valid" => full[short - 1..long].to_vec(),
        other => {
            return Err(RuntimeError::value_error(format!(
                "convolve() mode must be 'full', 'same' or 'valid', not '{other}'"
            )))
        }
    };
    Ok(ndarray(out))
}

/// `where(condition, x, y)`: pick from `x` where the condition holds.
fn np_where(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(3, &["condition", "x", "y"])?;
    let condition = args.required(0, "condition")?;
    if let Some(flag) = condition.as_number() {
        let picked = if flag != 0.0 { args.required(1, "x")? } else { args.required(2, "y")? };
        return Ok(picked.clone());
    }
    let mask: Vec<bool> = interp
        .iterate(condition)?
        .iter()
        .map(|v| interp.truthy(v))
        .collect::<RtResult<_>>()?;
    let xs = args.array(1, "x")?;
    let ys = args.array(2, "y")?;
    let pick = |values: &[f64], i: usize| -> RtResult<f64> {
        match values.len() {
            1 => Ok(values[0]),
            n if n == mask.len() => Ok(values[i]),
            n => Err(RuntimeError::value_error(format!(
                "where(): operand of length {n} does not match condition of length {}",
                mask.len()
            ))),
        }
    };
    let out = mask
        .iter()
        .enumerate()
        .map(|(i, &m)| if m { pick(&xs, i) } else { pick(&ys, i) })
        .collect::<RtResult<Vec<_>>>()?;
    Ok(ndarray(out))
}

fn clip(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(3, &["a", "a_min", "a_max"])?;
    let lo = args.number_or(1, "a_min", f64::NEG_INFINITY)?;
    let hi = args.number_or(2, "a_max", f64::INFINITY)?;
    let f = |v: f64| if v.is_nan() { v } else { v.max(lo).min(hi) };
    let a = args.required(0, "a")?;
    match a.as_number() {
        Some(n) => Ok(Value::Number(f(n))),
        None => Ok(array_value(
            args.array(0, "a")?.into_iter().map(f).collect(),
            args.kind_of(0),
        )),
    }
}
