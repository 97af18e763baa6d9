//! The pandas subset: one-dimensional `Series` and missing-value tests.

use super::{array_value, Args, NativeFn};
use crate::error::RtResult;
use crate::interp::Interpreter;
use crate::value::{ArrayKind, ArrayValue, Value};

pub static FUNCTIONS: &[NativeFn] = &[
    NativeFn { name: "Series", call: series },
    NativeFn { name: "isna", call: isna },
    NativeFn { name: "notna", call: notna },
];

fn series(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(1, &["data"])?;
    match args.get(0, "data") {
        None => Ok(Value::Array(ArrayValue::series(Vec::new()))),
        Some(_) => Ok(array_value(args.array(0, "data")?, ArrayKind::Series)),
    }
}

fn missing_mask(args: &Args, missing: bool) -> RtResult<Value> {
    args.expect_at_most(1, &["obj"])?;
    // An explicit None is missing, so read the raw slot.
    let Some(obj) = args.positional.first() else {
        return args.required(0, "obj").map(|_| Value::None);
    };
    if obj.is_none() {
        return Ok(Value::Bool(missing));
    }
    if let Some(n) = obj.as_number() {
        return Ok(Value::Bool(n.is_nan() == missing));
    }
    let mask = obj
        .to_f64_vec(&format!("{}() argument", args.func))?
        .into_iter()
        .map(|v| if v.is_nan() == missing { 1.0 } else { 0.0 })
        .collect();
    Ok(array_value(mask, args.kind_of(0)))
}

fn isna(_: &Interpreter, args: &Args) -> RtResult<Value> {
    missing_mask(args, true)
}

fn notna(_: &Interpreter, args: &Args) -> RtResult<Value> {
    missing_mask(args, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isna_handles_scalars_and_arrays() {
        let interp = Interpreter::default();
        let na = |v: Value| isna(&interp, &Args::new("isna", vec![v], Vec::new())).unwrap();
        assert!(matches!(na(Value::None), Value::Bool(true)));
        assert!(matches!(na(Value::Number(f64::NAN)), Value::Bool(true)));
        match na(Value::Array(ArrayValue::series(vec![1.0, f64::NAN]))) {
            Value::Array(a) => {
                assert_eq!(a.values(), &[0.0, 1.0]);
                assert_eq!(a.kind, ArrayKind::Series);
            }
            other => panic!("unexpected {other}"),
        }
    }
}
