//! Runtime values.
//!
//! Arrays are `f64` vectors behind an `Rc`; engine-fed arrays (price
//! columns and indicators) additionally share a window cell so that during
//! `next` they only expose data up to the current bar.

use crate::ast::FunctionDef;
use crate::capabilities::ModuleId;
use crate::error::{RtResult, RuntimeError};
use crate::libs::NativeFn;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Whether an array behaves like a numpy array or a pandas Series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    NdArray,
    Series,
}

#[derive(Debug, Clone)]
pub struct ArrayValue {
    data: Rc<Vec<f64>>,
    window: Option<Rc<Cell<usize>>>,
    pub kind: ArrayKind,
    label: Option<Rc<str>>,
}

impl ArrayValue {
    pub fn new(values: Vec<f64>, kind: ArrayKind) -> Self {
        Self {
            data: Rc::new(values),
            window: None,
            kind,
            label: None,
        }
    }

    pub fn ndarray(values: Vec<f64>) -> Self {
        Self::new(values, ArrayKind::NdArray)
    }

    pub fn series(values: Vec<f64>) -> Self {
        Self::new(values, ArrayKind::Series)
    }

    /// A view over engine-owned data, truncated by the shared window.
    pub fn windowed(data: Rc<Vec<f64>>, window: Rc<Cell<usize>>, label: &str) -> Self {
        Self {
            data,
            window: Some(window),
            kind: ArrayKind::NdArray,
            label: Some(Rc::from(label)),
        }
    }

    pub fn values(&self) -> &[f64] {
        match &self.window {
            Some(window) => &self.data[..window.get().min(self.data.len())],
            None => &self.data,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Same storage and window, different flavour.
    pub fn with_kind(&self, kind: ArrayKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.values().last().copied()
    }
}

/// A user-defined class.
#[derive(Debug)]
pub struct ClassObj {
    pub name: String,
    pub bases: Vec<ClassBase>,
    pub attrs: Namespace,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum ClassBase {
    Strategy,
    User(Rc<ClassObj>),
}

impl ClassObj {
    /// Attribute lookup through the class and its ancestors, depth first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.get(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| match base {
            ClassBase::User(class) => class.lookup(name),
            ClassBase::Strategy => None,
        })
    }

    pub fn derives_from_strategy(&self) -> bool {
        self.bases.iter().any(|base| match base {
            ClassBase::Strategy => true,
            ClassBase::User(class) => class.derives_from_strategy(),
        })
    }

    /// True when `other` appears among this class's user-defined ancestors.
    pub fn inherits_from(&self, other: &Rc<ClassObj>) -> bool {
        self.bases.iter().any(|base| match base {
            ClassBase::User(class) => Rc::ptr_eq(class, other) || class.inherits_from(other),
            ClassBase::Strategy => false,
        })
    }

    /// This class followed by its user-defined ancestors, depth first.
    pub fn lineage(self: &Rc<Self>) -> Vec<Rc<ClassObj>> {
        let mut out = vec![Rc::clone(self)];
        for base in &self.bases {
            if let ClassBase::User(class) = base {
                for ancestor in class.lineage() {
                    if !out.iter().any(|c| Rc::ptr_eq(c, &ancestor)) {
                        out.push(ancestor);
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug)]
pub struct FunctionObj {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub is_static: bool,
    pub qualname: String,
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<ClassObj>,
    pub attrs: RefCell<Namespace>,
}

/// Strategy API entry points reachable from `self`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMember {
    Buy,
    Sell,
    Indicator,
    ClosePosition,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Array(ArrayValue),
    Module(ModuleId),
    Native(&'static NativeFn),
    StrategyBase,
    Class(Rc<ClassObj>),
    Function(Rc<FunctionObj>),
    BoundMethod(Rc<Instance>, Rc<FunctionObj>),
    /// A builtin method bound to its receiver, e.g. `values.mean`.
    Method(Box<Value>, &'static str),
    Instance(Rc<Instance>),
    Api(ApiMember),
    Position,
    Data,
    ClosedTrades,
    Rolling(ArrayValue, usize),
    ILoc(ArrayValue),
}

impl Value {
    pub fn str(text: &str) -> Self {
        Value::Str(Rc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Array(a) if a.kind == ArrayKind::Series => "Series",
            Value::Array(_) => "ndarray",
            Value::Module(_) => "module",
            Value::Native(_) => "builtin_function",
            Value::StrategyBase | Value::Class(_) => "type",
            Value::Function(_) => "function",
            Value::BoundMethod(..) | Value::Method(..) | Value::Api(_) => "method",
            Value::Instance(_) => "strategy instance",
            Value::Position => "Position",
            Value::Data => "data",
            Value::ClosedTrades => "closed_trades",
            Value::Rolling(..) => "Rolling",
            Value::ILoc(_) => "iloc",
        }
    }

    /// Numeric view of scalars; bools count as 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn expect_number(&self, what: &str) -> RtResult<f64> {
        self.as_number().ok_or_else(|| {
            RuntimeError::type_error(format!("{what} must be a number, not {}", self.type_name()))
        })
    }

    /// Integral index or count.
    pub fn expect_integer(&self, what: &str) -> RtResult<i64> {
        let n = self.expect_number(what)?;
        if n.fract() != 0.0 || !n.is_finite() {
            return Err(RuntimeError::type_error(format!(
                "{what} must be an integer, got {}",
                format_number(n)
            )));
        }
        Ok(n as i64)
    }

    /// Coerce an array-like value (array, list or tuple of numbers) to floats.
    pub fn to_f64_vec(&self, what: &str) -> RtResult<Vec<f64>> {
        match self {
            Value::Array(a) => Ok(a.values().to_vec()),
            Value::List(items) => numbers_of(&items.borrow(), what),
            Value::Tuple(items) => numbers_of(items, what),
            other => Err(RuntimeError::type_error(format!(
                "{what} must be array-like, not {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Truthiness for values that need no engine state.
    pub fn plain_truthy(&self) -> RtResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            // NaN is truthy, as in the languages strategies are ported from.
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Array(a) => match a.values() {
                [] => false,
                [x] => *x != 0.0,
                _ => {
                    return Err(RuntimeError::value_error(
                        "the truth value of an array with more than one element is ambiguous; use a[-1], .any() or .all()",
                    ))
                }
            },
            _ => true,
        })
    }

    /// Identity comparison for `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => std::ptr::eq(*a, *b),
            (Value::StrategyBase, Value::StrategyBase) => true,
            _ => false,
        }
    }
}

fn numbers_of(items: &[Value], what: &str) -> RtResult<Vec<f64>> {
    items
        .iter()
        .map(|v| {
            v.as_number().ok_or_else(|| {
                RuntimeError::type_error(format!(
                    "{what} must contain only numbers, found {}",
                    v.type_name()
                ))
            })
        })
        .collect()
}

/// Render a number the way scripts expect: integral values without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        (if n > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => write_seq(f, "[", "]", &items.borrow()),
            Value::Tuple(items) => write_seq(f, "(", ")", items),
            Value::Array(a) => {
                let parts: Vec<String> = a.values().iter().map(|v| format_number(*v)).collect();
                write!(f, "[{}]", parts.join(" "))
            }
            Value::Module(id) => write!(f, "<module '{}'>", id.path()),
            Value::Native(n) => write!(f, "<built-in function {}>", n.name),
            Value::StrategyBase => write!(f, "<class 'Strategy'>"),
            Value::Class(c) => write!(f, "<class '{}'>", c.name),
            Value::Function(func) => write!(f, "<function {}>", func.qualname),
            Value::BoundMethod(_, func) => write!(f, "<bound method {}>", func.qualname),
            Value::Instance(inst) => write!(f, "<{} instance>", inst.class.name),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: &[Value]) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match item {
            Value::Str(s) => write!(f, "'{s}'")?,
            other => write!(f, "{other}")?,
        }
    }
    if items.len() == 1 && open == "(" {
        write!(f, ",")?;
    }
    write!(f, "{close}")
}

// ─── Namespace ───────────────────────────────────────────────────────

/// Small insertion-ordered name → value map used for every scope.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: Vec<(String, Value)>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_arrays_follow_the_cell() {
        let window = Rc::new(Cell::new(2));
        let arr = ArrayValue::windowed(Rc::new(vec![1.0, 2.0, 3.0]), Rc::clone(&window), "Close");
        assert_eq!(arr.values(), &[1.0, 2.0]);
        window.set(3);
        assert_eq!(arr.last(), Some(3.0));
        window.set(10);
        assert_eq!(arr.len(), 3);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::None.plain_truthy().unwrap());
        assert!(Value::Number(f64::NAN).plain_truthy().unwrap());
        assert!(Value::Array(ArrayValue::ndarray(vec![1.0])).plain_truthy().unwrap());
        assert!(Value::Array(ArrayValue::ndarray(vec![1.0, 0.0])).plain_truthy().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Number(14.0).to_string(), "14");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
        assert_eq!(
            Value::tuple(vec![Value::str("a")]).to_string(),
            "('a',)"
        );
        assert_eq!(Value::list(vec![Value::Number(1.0), Value::Bool(true)]).to_string(), "[1, True]");
    }

    #[test]
    fn namespace_keeps_insertion_order() {
        let mut ns = Namespace::new();
        ns.set("b", Value::Number(1.0));
        ns.set("a", Value::Number(2.0));
        ns.set("b", Value::Number(3.0));
        let names: Vec<_> = ns.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(ns.get("b").and_then(Value::as_number), Some(3.0));
    }
}
