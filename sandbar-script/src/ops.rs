//! Operators: arithmetic, comparison and unary.
//!
//! Scalars follow ordinary float arithmetic except that division by zero
//! is an error. Arrays operate elementwise with length-1 broadcasting and
//! never raise on division by zero (the result is inf or NaN). Array
//! comparisons produce 0/1 arrays. Concatenation is bounded by
//! `MAX_ALLOCATION` like every other allocation a script can trigger.

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::error::{ErrorKind, RtResult, RuntimeError};
use crate::libs::MAX_ALLOCATION;
use crate::value::{ArrayKind, ArrayValue, Value};

pub fn binary(op: BinOp, left: &Value, right: &Value) -> RtResult<Value> {
    match (left, right) {
        (Value::Array(a), Value::Array(b)) => elementwise(op, a.values(), b.values(), kind_of(a, Some(b))),
        (Value::Array(a), other) => match other.as_number() {
            Some(n) => elementwise(op, a.values(), &[n], a.kind),
            None => unsupported(op, left, right),
        },
        (other, Value::Array(b)) => match other.as_number() {
            Some(n) => elementwise(op, &[n], b.values(), b.kind),
            None => unsupported(op, left, right),
        },
        (Value::Bool(a), Value::Bool(b)) if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) => {
            Ok(Value::Bool(match op {
                BinOp::BitAnd => *a && *b,
                BinOp::BitOr => *a || *b,
                _ => a != b,
            }))
        }
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            let mut text = String::with_capacity(concat_len("str", a.len(), b.len())?);
            text.push_str(a);
            text.push_str(b);
            Ok(Value::str(&text))
        }
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            let (a, b) = (a.borrow(), b.borrow());
            let mut items = Vec::with_capacity(concat_len("list", a.len(), b.len())?);
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
            let mut items = Vec::with_capacity(concat_len("tuple", a.len(), b.len())?);
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => scalar(op, a, b).map(Value::Number),
            _ => unsupported(op, left, right),
        },
    }
}

/// Length of `left + right`, rejected past the allocation limit.
fn concat_len(type_name: &str, left: usize, right: usize) -> RtResult<usize> {
    let len = left.saturating_add(right);
    if len > MAX_ALLOCATION {
        return Err(RuntimeError::memory_error(format!(
            "{type_name} concatenation would hold {len} elements, the limit is {MAX_ALLOCATION}"
        )));
    }
    Ok(len)
}

fn kind_of(a: &ArrayValue, b: Option<&ArrayValue>) -> ArrayKind {
    if a.kind == ArrayKind::Series || b.is_some_and(|b| b.kind == ArrayKind::Series) {
        ArrayKind::Series
    } else {
        ArrayKind::NdArray
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> RtResult<Value> {
    Err(RuntimeError::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    )))
}

fn scalar(op: BinOp, a: f64, b: f64) -> RtResult<f64> {
    let zero_division = || RuntimeError::new(ErrorKind::ZeroDivision, "division by zero");
    Ok(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division());
            }
            floor_mod(a, b)
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division());
            }
            a.powf(b)
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            if a.fract() != 0.0 || b.fract() != 0.0 {
                return Err(RuntimeError::type_error(format!(
                    "bitwise {} needs integers",
                    op.symbol()
                )));
            }
            let (x, y) = (a as i64, b as i64);
            (match op {
                BinOp::BitAnd => x & y,
                BinOp::BitOr => x | y,
                _ => x ^ y,
            }) as f64
        }
    })
}

/// Remainder with the sign of the divisor.
fn floor_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn array_scalar(op: BinOp, a: f64, b: f64) -> f64 {
    let truth = |x: f64| x != 0.0 && !x.is_nan();
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => {
            if b == 0.0 {
                f64::NAN
            } else {
                floor_mod(a, b)
            }
        }
        BinOp::Pow => a.powf(b),
        BinOp::BitAnd => bool_num(truth(a) && truth(b)),
        BinOp::BitOr => bool_num(truth(a) || truth(b)),
        BinOp::BitXor => bool_num(truth(a) != truth(b)),
    }
}

fn bool_num(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Pair up two operands, broadcasting a length-1 side.
fn zip_broadcast(a: &[f64], b: &[f64], mut f: impl FnMut(f64, f64) -> f64) -> RtResult<Vec<f64>> {
    match (a.len(), b.len()) {
        (x, y) if x == y => Ok(a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect()),
        (1, _) => Ok(b.iter().map(|y| f(a[0], *y)).collect()),
        (_, 1) => Ok(a.iter().map(|x| f(*x, b[0])).collect()),
        (x, y) => Err(RuntimeError::value_error(format!(
            "operands could not be broadcast together with lengths {x} and {y}"
        ))),
    }
}

fn elementwise(op: BinOp, a: &[f64], b: &[f64], kind: ArrayKind) -> RtResult<Value> {
    let values = zip_broadcast(a, b, |x, y| array_scalar(op, x, y))?;
    Ok(Value::Array(ArrayValue::new(values, kind)))
}

// ─── Comparison ──────────────────────────────────────────────────────

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> RtResult<Value> {
    match op {
        CmpOp::Is => return Ok(Value::Bool(left.is_same(right))),
        CmpOp::IsNot => return Ok(Value::Bool(!left.is_same(right))),
        CmpOp::In => return contains(right, left).map(Value::Bool),
        CmpOp::NotIn => return contains(right, left).map(|b| Value::Bool(!b)),
        _ => {}
    }

    if let Some((a, b, kind)) = array_operands(left, right) {
        let values = zip_broadcast(&a, &b, |x, y| bool_num(ordering(op, x, y)))?;
        return Ok(Value::Array(ArrayValue::new(values, kind)));
    }

    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(Value::Bool(ordering(op, a, b)));
    }

    match op {
        CmpOp::Eq => Ok(Value::Bool(equal(left, right))),
        CmpOp::NotEq => Ok(Value::Bool(!equal(left, right))),
        _ => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(ordering_str(op, a, b))),
            _ => Err(RuntimeError::type_error(format!(
                "'{}' not supported between '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn array_operands(left: &Value, right: &Value) -> Option<(Vec<f64>, Vec<f64>, ArrayKind)> {
    match (left, right) {
        (Value::Array(a), Value::Array(b)) => Some((a.values().to_vec(), b.values().to_vec(), kind_of(a, Some(b)))),
        (Value::Array(a), other) => Some((a.values().to_vec(), vec![other.as_number()?], a.kind)),
        (other, Value::Array(b)) => Some((vec![other.as_number()?], b.values().to_vec(), b.kind)),
        _ => None,
    }
}

fn ordering(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::NotEq => a != b,
        CmpOp::Lt => a < b,
        CmpOp::LtEq => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::GtEq => a >= b,
        _ => false,
    }
}

fn ordering_str(op: CmpOp, a: &str, b: &str) -> bool {
    match op {
        CmpOp::Lt => a < b,
        CmpOp::LtEq => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::GtEq => a >= b,
        _ => false,
    }
}

/// Structural equality for non-array values.
pub fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => seq_equal(&a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => seq_equal(a, b),
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => left.is_same(right),
        },
    }
}

fn seq_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equal(x, y))
}

fn contains(container: &Value, item: &Value) -> RtResult<bool> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| equal(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| equal(v, item))),
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(RuntimeError::type_error(format!(
                "'in <str>' requires a string, not {}",
                other.type_name()
            ))),
        },
        Value::Array(a) => {
            let n = item.expect_number("array membership test")?;
            Ok(a.values().contains(&n))
        }
        other => Err(RuntimeError::type_error(format!(
            "argument of type '{}' is not a container",
            other.type_name()
        ))),
    }
}

// ─── Unary ───────────────────────────────────────────────────────────

/// Numeric unary operators; `not` is handled by the interpreter.
pub fn unary(op: UnaryOp, operand: &Value) -> RtResult<Value> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Array(a)) => Ok(map_array(a, |x| -x)),
        (UnaryOp::Pos, Value::Array(a)) => Ok(Value::Array(a.clone())),
        (UnaryOp::Invert, Value::Array(a)) => Ok(map_array(a, |x| bool_num(x == 0.0))),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Invert, other) => {
            let n = other.expect_integer("operand of ~")?;
            Ok(Value::Number(!n as f64))
        }
        (UnaryOp::Neg, other) => Ok(Value::Number(-other.expect_number("operand of unary -")?)),
        (UnaryOp::Pos, other) => Ok(Value::Number(other.expect_number("operand of unary +")?)),
        (UnaryOp::Not, other) => Ok(Value::Bool(!other.plain_truthy()?)),
    }
}

pub fn map_array(a: &ArrayValue, f: impl Fn(f64) -> f64) -> Value {
    Value::Array(ArrayValue::new(a.values().iter().map(|x| f(*x)).collect(), a.kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(values: &[f64]) -> Value {
        Value::Array(ArrayValue::ndarray(values.to_vec()))
    }

    fn values(v: &Value) -> Vec<f64> {
        match v {
            Value::Array(a) => a.values().to_vec(),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn scalar_arithmetic() {
        let n = |x| Value::Number(x);
        assert_eq!(binary(BinOp::Mod, &n(-7.0), &n(3.0)).unwrap().as_number(), Some(2.0));
        assert_eq!(binary(BinOp::FloorDiv, &n(-7.0), &n(2.0)).unwrap().as_number(), Some(-4.0));
        assert_eq!(binary(BinOp::Add, &Value::Bool(true), &n(1.0)).unwrap().as_number(), Some(2.0));
        let err = binary(BinOp::Div, &n(1.0), &n(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn concatenation_within_limit() {
        let out = binary(BinOp::Add, &Value::str("ab"), &Value::str("c")).unwrap();
        assert!(matches!(out, Value::Str(ref s) if &**s == "abc"));
        let one = Value::list(vec![Value::Number(1.0)]);
        let out = binary(BinOp::Add, &one, &one).unwrap();
        assert!(matches!(out, Value::List(ref items) if items.borrow().len() == 2));
    }

    #[test]
    fn string_concatenation_is_capped() {
        let half = Value::str(&"a".repeat(MAX_ALLOCATION / 2 + 1));
        let err = binary(BinOp::Add, &half, &half).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Memory);
        assert!(err.message.starts_with("str concatenation"), "{}", err.message);
    }

    #[test]
    fn list_and_tuple_concatenation_are_capped() {
        // Building real sequences at the limit would take hundreds of MB.
        for type_name in ["list", "tuple"] {
            assert_eq!(concat_len(type_name, MAX_ALLOCATION - 1, 1).unwrap(), MAX_ALLOCATION);
            let err = concat_len(type_name, MAX_ALLOCATION, 1).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Memory);
            assert!(err.message.starts_with(type_name));
            assert!(concat_len(type_name, usize::MAX, usize::MAX).is_err());
        }
    }

    #[test]
    fn array_broadcasting() {
        let out = binary(BinOp::Div, &arr(&[2.0, 4.0]), &Value::Number(2.0)).unwrap();
        assert_eq!(values(&out), vec![1.0, 2.0]);
        let out = binary(BinOp::Sub, &Value::Number(10.0), &arr(&[1.0, 2.0])).unwrap();
        assert_eq!(values(&out), vec![9.0, 8.0]);
        assert!(binary(BinOp::Add, &arr(&[1.0, 2.0]), &arr(&[1.0, 2.0, 3.0])).is_err());
        let out = binary(BinOp::Div, &arr(&[1.0]), &arr(&[0.0])).unwrap();
        assert!(values(&out)[0].is_infinite());
    }

    #[test]
    fn series_wins_result_kind() {
        let s = Value::Array(ArrayValue::series(vec![1.0, 2.0]));
        let Value::Array(out) = binary(BinOp::Mul, &arr(&[1.0, 1.0]), &s).unwrap() else { panic!() };
        assert_eq!(out.kind, ArrayKind::Series);
    }

    #[test]
    fn comparisons() {
        let out = compare(CmpOp::Gt, &arr(&[1.0, 3.0]), &Value::Number(2.0)).unwrap();
        assert_eq!(values(&out), vec![0.0, 1.0]);
        assert!(matches!(compare(CmpOp::Lt, &Value::Number(1.0), &Value::Number(2.0)).unwrap(), Value::Bool(true)));
        assert!(matches!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap(), Value::Bool(true)));
        assert!(matches!(
            compare(CmpOp::In, &Value::Number(2.0), &Value::list(vec![Value::Number(2.0)])).unwrap(),
            Value::Bool(true)
        ));
        assert!(compare(CmpOp::Lt, &Value::None, &Value::Number(1.0)).is_err());
    }

    #[test]
    fn masks_combine() {
        let out = binary(BinOp::BitAnd, &arr(&[1.0, 0.0, 1.0]), &arr(&[1.0, 1.0, 0.0])).unwrap();
        assert_eq!(values(&out), vec![1.0, 0.0, 0.0]);
        let out = unary(UnaryOp::Invert, &arr(&[1.0, 0.0])).unwrap();
        assert_eq!(values(&out), vec![0.0, 1.0]);
    }
}
