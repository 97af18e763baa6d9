//! Capability libraries exposed to scripts.
//!
//! - `builtins`: the safe builtin functions
//! - `numpy`, `pandas`, `talib`: the allowlisted module subsets
//! - `methods`: attributes and methods of arrays, Series, lists
//! - `crossover`, `cross`, `barssince`: the `backtesting.lib` helpers
//!
//! Every native function is pure: it sees its arguments and a read-only
//! interpreter handle for truthiness, length and iteration.

pub mod builtins;
pub mod methods;
pub mod numpy;
pub mod pandas;
pub mod talib;

use crate::capabilities::{ModuleId, PreludeItem};
use crate::error::{RtResult, RuntimeError};
use crate::interp::Interpreter;
use crate::value::{ArrayKind, ArrayValue, Value};
use std::fmt;

pub type NativeCall = fn(&Interpreter, &Args) -> RtResult<Value>;

pub struct NativeFn {
    pub name: &'static str,
    pub call: NativeCall,
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

pub(crate) fn find(table: &'static [NativeFn], name: &str) -> Option<&'static NativeFn> {
    table.iter().find(|f| f.name == name)
}

/// Call arguments with keyword lookup.
#[derive(Debug, Clone)]
pub struct Args {
    pub func: &'static str,
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(func: &'static str, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            func,
            positional,
            keywords,
        }
    }

    /// Argument by position or keyword; an explicit `None` counts as absent.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional
            .get(index)
            .or_else(|| self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v))
            .filter(|v| !v.is_none())
    }

    pub fn required(&self, index: usize, name: &str) -> RtResult<&Value> {
        self.get(index, name).ok_or_else(|| {
            RuntimeError::type_error(format!("{}() missing required argument '{name}'", self.func))
        })
    }

    pub fn array(&self, index: usize, name: &str) -> RtResult<Vec<f64>> {
        let value = self.required(index, name)?;
        match value.as_number() {
            Some(n) => Ok(vec![n]),
            None => value.to_f64_vec(&format!("{}() argument '{name}'", self.func)),
        }
    }

    pub fn number(&self, index: usize, name: &str) -> RtResult<f64> {
        self.required(index, name)?
            .expect_number(&format!("{}() argument '{name}'", self.func))
    }

    pub fn number_or(&self, index: usize, name: &str, default: f64) -> RtResult<f64> {
        match self.get(index, name) {
            Some(v) => v.expect_number(&format!("{}() argument '{name}'", self.func)),
            None => Ok(default),
        }
    }

    pub fn integer_or(&self, index: usize, name: &str, default: i64) -> RtResult<i64> {
        match self.get(index, name) {
            Some(v) => v.expect_integer(&format!("{}() argument '{name}'", self.func)),
            None => Ok(default),
        }
    }

    /// A window length: an integer of at least 1.
    pub fn period_or(&self, index: usize, name: &str, default: usize) -> RtResult<usize> {
        let period = self.integer_or(index, name, default as i64)?;
        if period < 1 {
            return Err(RuntimeError::value_error(format!(
                "{}() argument '{name}' must be at least 1, got {period}",
                self.func
            )));
        }
        Ok(period as usize)
    }

    pub fn str_or(&self, index: usize, name: &str, default: &str) -> RtResult<String> {
        match self.get(index, name) {
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(RuntimeError::type_error(format!(
                "{}() argument '{name}' must be a string, not {}",
                self.func,
                other.type_name()
            ))),
            None => Ok(default.to_string()),
        }
    }

    /// Reject surplus positionals and unknown keywords.
    pub fn expect_at_most(&self, positional: usize, keywords: &[&str]) -> RtResult<()> {
        if self.positional.len() > positional {
            return Err(RuntimeError::type_error(format!(
                "{}() takes at most {positional} positional arguments ({} given)",
                self.func,
                self.positional.len()
            )));
        }
        if let Some((name, _)) = self.keywords.iter().find(|(k, _)| !keywords.contains(&k.as_str())) {
            return Err(RuntimeError::type_error(format!(
                "{}() got an unexpected keyword argument '{name}'",
                self.func
            )));
        }
        Ok(())
    }

    /// The series kind of the first argument, so results keep it.
    pub fn kind_of(&self, index: usize) -> ArrayKind {
        match self.positional.get(index) {
            Some(Value::Array(a)) => a.kind,
            _ => ArrayKind::NdArray,
        }
    }
}

pub fn array_value(values: Vec<f64>, kind: ArrayKind) -> Value {
    Value::Array(ArrayValue::new(values, kind))
}

pub fn ndarray(values: Vec<f64>) -> Value {
    array_value(values, ArrayKind::NdArray)
}

/// Largest array a script may allocate in one call.
pub const MAX_ALLOCATION: usize = 10_000_000;

pub fn check_allocation(func: &str, len: usize) -> RtResult<()> {
    if len > MAX_ALLOCATION {
        return Err(RuntimeError::memory_error(format!(
            "{func}() would allocate {len} elements, the limit is {MAX_ALLOCATION}"
        )));
    }
    Ok(())
}

// ─── Lookups ─────────────────────────────────────────────────────────

/// Resolve `module.name` against the allowlist.
pub fn module_member(module: ModuleId, name: &str) -> Option<Value> {
    if !module.has_member(name) {
        return None;
    }
    match module {
        ModuleId::Backtesting => match name {
            "Strategy" => Some(Value::StrategyBase),
            "lib" => Some(Value::Module(ModuleId::BacktestingLib)),
            _ => None,
        },
        ModuleId::BacktestingLib => find(BACKTESTING_LIB, name).map(Value::Native),
        ModuleId::Numpy => match name {
            "nan" => Some(Value::Number(f64::NAN)),
            "inf" => Some(Value::Number(f64::INFINITY)),
            _ => find(numpy::FUNCTIONS, name).map(Value::Native),
        },
        ModuleId::Pandas => find(pandas::FUNCTIONS, name).map(Value::Native),
        ModuleId::Talib => find(talib::FUNCTIONS, name).map(Value::Native),
    }
}

pub fn prelude_value(item: PreludeItem) -> Value {
    match item {
        PreludeItem::StrategyBase => Value::StrategyBase,
        PreludeItem::Crossover => Value::Native(&BACKTESTING_LIB[0]),
        PreludeItem::Module(id) => Value::Module(id),
    }
}

pub fn builtin(name: &str) -> Option<&'static NativeFn> {
    find(builtins::FUNCTIONS, name)
}

// ─── backtesting.lib ─────────────────────────────────────────────────

static BACKTESTING_LIB: &[NativeFn] = &[
    NativeFn {
        name: "crossover",
        call: crossover,
    },
    NativeFn {
        name: "cross",
        call: cross,
    },
    NativeFn {
        name: "barssince",
        call: barssince,
    },
];

/// Series view for crossing tests: scalars compare as flat lines.
fn crossing_operand(value: &Value, what: &str) -> RtResult<Vec<f64>> {
    match value.as_number() {
        Some(n) => Ok(vec![n, n]),
        None => value.to_f64_vec(what),
    }
}

fn crosses_above(a: &[f64], b: &[f64]) -> bool {
    if a.len() < 2 || b.len() < 2 {
        return false;
    }
    let (a1, a0) = (a[a.len() - 2], a[a.len() - 1]);
    let (b1, b0) = (b[b.len() - 2], b[b.len() - 1]);
    a1 < b1 && a0 > b0
}

/// True when `series1` just crossed over `series2`.
fn crossover(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["series1", "series2"])?;
    let a = crossing_operand(args.required(0, "series1")?, "crossover() series1")?;
    let b = crossing_operand(args.required(1, "series2")?, "crossover() series2")?;
    Ok(Value::Bool(crosses_above(&a, &b)))
}

fn cross(_: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["series1", "series2"])?;
    let a = crossing_operand(args.required(0, "series1")?, "cross() series1")?;
    let b = crossing_operand(args.required(1, "series2")?, "cross() series2")?;
    Ok(Value::Bool(crosses_above(&a, &b) || crosses_above(&b, &a)))
}

/// Bars since `condition` was last true, or `default`.
fn barssince(interp: &Interpreter, args: &Args) -> RtResult<Value> {
    args.expect_at_most(2, &["condition", "default"])?;
    let condition = interp.iterate(args.required(0, "condition")?)?;
    let default = args.number_or(1, "default", f64::INFINITY)?;
    for (i, value) in condition.iter().rev().enumerate() {
        if interp.truthy(value)? {
            return Ok(Value::Number(i as f64));
        }
    }
    Ok(Value::Number(default))
}

// ─── Shared statistics ───────────────────────────────────────────────

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` delta degrees of freedom.
pub(crate) fn std_dev(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - ddof) as f64).sqrt()
}

/// Min or max that propagates NaN.
pub(crate) fn extreme(values: &[f64], pick_max: bool) -> Option<f64> {
    let mut iter = values.iter().copied();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else if pick_max {
            acc.max(v)
        } else {
            acc.min(v)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ALL_MODULES;

    #[test]
    fn every_allowlisted_member_resolves() {
        for &module in ALL_MODULES {
            for member in module.members() {
                assert!(
                    module_member(module, member).is_some(),
                    "{}.{member} is allowlisted but not implemented",
                    module.path()
                );
            }
        }
        for name in crate::capabilities::BUILTINS {
            assert!(builtin(name).is_some(), "builtin {name} missing");
        }
    }

    #[test]
    fn unlisted_members_do_not_resolve() {
        assert!(module_member(ModuleId::Numpy, "load").is_none());
        assert!(module_member(ModuleId::Backtesting, "Backtest").is_none());
    }

    #[test]
    fn crossing() {
        assert!(crosses_above(&[1.0, 3.0], &[2.0, 2.0]));
        assert!(!crosses_above(&[2.0, 3.0], &[2.0, 2.0]));
        assert!(!crosses_above(&[3.0], &[2.0]));
    }

    #[test]
    fn statistics() {
        assert_eq!(std_dev(&[1.0, 2.0, 3.0, 4.0], 0), 1.118033988749895);
        assert!(std_dev(&[1.0], 1).is_nan());
        assert!(extreme(&[1.0, f64::NAN], true).unwrap().is_nan());
        assert_eq!(extreme(&[1.0, 5.0, 2.0], false), Some(1.0));
    }
}
