//! Loading a compiled script and validating the strategy contract.
//!
//! The module body runs once in a fresh interpreter whose globals hold
//! only the prelude. Afterwards the strategy class is located, its
//! `init`/`next` methods and class-level parameters are checked, and
//! configured parameter overrides are applied.

use crate::compiler::CompiledUnit;
use crate::error::RuntimeError;
use crate::interp::{Interpreter, Limits};
use crate::value::{ClassObj, Instance, Namespace, Value};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    #[error("strategy module failed to load: {0}")]
    Module(#[source] RuntimeError),

    #[error("User code must define a 'Strategy' class that inherits from backtesting.Strategy")]
    NoClass,

    #[error("no class derives from Strategy (found: {}). User code must define a 'Strategy' class that inherits from backtesting.Strategy", .0.join(", "))]
    NotDerived(Vec<String>),

    #[error("several unrelated strategy classes are defined ({}); keep one or bind the intended class to the name 'Strategy'", .0.join(", "))]
    Ambiguous(Vec<String>),

    #[error("the name 'Strategy' is bound to a {0}, not a class")]
    NotAClass(String),

    #[error("class '{0}' is bound to 'Strategy' but does not inherit from backtesting.Strategy")]
    BoundNotDerived(String),

    #[error("strategy class '{class}' does not define {method}(self)")]
    MissingMethod { class: String, method: &'static str },

    #[error("{class}.{method} must be an instance method taking only self")]
    BadSignature { class: String, method: &'static str },

    #[error("class parameter '{name}' of '{class}' must be a number, boolean or string, not {kind}")]
    BadParameter {
        class: String,
        name: String,
        kind: &'static str,
    },

    #[error("parameter '{name}' is not a class-level parameter of '{class}'")]
    UnknownParameter { class: String, name: String },

    #[error("parameter '{name}' expects a {expected}, got a {got}")]
    ParameterKind {
        name: String,
        expected: &'static str,
        got: &'static str,
    },
}

/// A strategy parameter value: what class attributes and config overrides may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl ParamValue {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ParamValue::Bool(*b)),
            Value::Number(n) => Some(ParamValue::Number(*n)),
            Value::Str(s) => Some(ParamValue::Str(s.to_string())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Number(n) => Value::Number(*n),
            ParamValue::Str(s) => Value::str(s),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "boolean",
            ParamValue::Number(_) => "number",
            ParamValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value().to_string())
    }
}

/// A validated strategy class plus the module scope it closes over.
#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    class: Rc<ClassObj>,
    globals: Namespace,
    parameters: Vec<(String, ParamValue)>,
    overrides: Vec<(String, ParamValue)>,
    limits: Limits,
}

impl StrategyDefinition {
    pub fn name(&self) -> &str {
        &self.class.name
    }

    /// Effective class-level parameters, overrides applied.
    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// A fresh interpreter over the module scope plus a new instance.
    pub(crate) fn instantiate(&self) -> (Interpreter, Rc<Instance>) {
        let interp = Interpreter::with_globals(self.globals.clone(), self.limits);
        let mut attrs = Namespace::new();
        for (name, value) in &self.overrides {
            attrs.set(name, value.to_value());
        }
        let instance = Rc::new(Instance {
            class: Rc::clone(&self.class),
            attrs: RefCell::new(attrs),
        });
        (interp, instance)
    }
}

/// Run the module body and validate the strategy contract.
pub fn execute(
    unit: &CompiledUnit,
    overrides: &BTreeMap<String, ParamValue>,
    limits: Limits,
) -> Result<StrategyDefinition, ContractError> {
    let mut interp = Interpreter::new(limits);
    interp.run_module(unit.module()).map_err(ContractError::Module)?;
    tracing::debug!(steps = interp.steps_used(), "strategy module loaded");

    let class = locate_strategy(interp.globals())?;
    for method in ["init", "next"] {
        check_method(&class, method)?;
    }
    let mut parameters = class_parameters(&class)?;

    let mut applied = Vec::with_capacity(overrides.len());
    for (name, value) in overrides {
        let Some(slot) = parameters.iter_mut().find(|(n, _)| n == name) else {
            return Err(ContractError::UnknownParameter {
                class: class.name.clone(),
                name: name.clone(),
            });
        };
        if slot.1.kind() != value.kind() {
            return Err(ContractError::ParameterKind {
                name: name.clone(),
                expected: slot.1.kind(),
                got: value.kind(),
            });
        }
        slot.1 = value.clone();
        applied.push((name.clone(), value.clone()));
    }

    tracing::debug!(
        class = %class.name,
        parameters = parameters.len(),
        overrides = applied.len(),
        "strategy contract satisfied"
    );

    Ok(StrategyDefinition {
        class,
        globals: interp.globals().clone(),
        parameters,
        overrides: applied,
        limits,
    })
}

/// Pick the strategy class out of the module scope.
fn locate_strategy(globals: &Namespace) -> Result<Rc<ClassObj>, ContractError> {
    match globals.get("Strategy") {
        Some(Value::Class(class)) => {
            if class.derives_from_strategy() {
                return Ok(Rc::clone(class));
            }
            return Err(ContractError::BoundNotDerived(class.name.clone()));
        }
        Some(Value::StrategyBase) | None => {}
        Some(other) => return Err(ContractError::NotAClass(other.type_name().to_string())),
    }

    let mut classes: Vec<Rc<ClassObj>> = Vec::new();
    for (_, value) in globals.iter() {
        if let Value::Class(class) = value {
            if !classes.iter().any(|c| Rc::ptr_eq(c, class)) {
                classes.push(Rc::clone(class));
            }
        }
    }
    if classes.is_empty() {
        return Err(ContractError::NoClass);
    }

    let candidates: Vec<&Rc<ClassObj>> = classes.iter().filter(|c| c.derives_from_strategy()).collect();
    if candidates.is_empty() {
        return Err(ContractError::NotDerived(classes.iter().map(|c| c.name.clone()).collect()));
    }

    // Most derived: not an ancestor of any other candidate.
    let leaves: Vec<&Rc<ClassObj>> = candidates
        .iter()
        .copied()
        .filter(|c| !candidates.iter().any(|other| other.inherits_from(c)))
        .collect();
    match leaves.as_slice() {
        [only] => Ok(Rc::clone(only)),
        _ => Err(ContractError::Ambiguous(leaves.iter().map(|c| c.name.clone()).collect())),
    }
}

fn check_method(class: &Rc<ClassObj>, method: &'static str) -> Result<(), ContractError> {
    match class.lookup(method) {
        Some(Value::Function(func)) if !func.is_static && func.def.params.len() == 1 => Ok(()),
        Some(_) => Err(ContractError::BadSignature {
            class: class.name.clone(),
            method,
        }),
        None => Err(ContractError::MissingMethod {
            class: class.name.clone(),
            method,
        }),
    }
}

/// Class-level parameters along the lineage; subclasses override ancestors.
fn class_parameters(class: &Rc<ClassObj>) -> Result<Vec<(String, ParamValue)>, ContractError> {
    let mut parameters: Vec<(String, ParamValue)> = Vec::new();
    for ancestor in class.lineage().iter().rev() {
        for (name, value) in ancestor.attrs.iter() {
            if matches!(value, Value::Function(_)) {
                continue;
            }
            let Some(param) = ParamValue::from_value(value) else {
                return Err(ContractError::BadParameter {
                    class: ancestor.name.clone(),
                    name: name.to_string(),
                    kind: value.type_name(),
                });
            };
            match parameters.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = param,
                None => parameters.push((name.to_string(), param)),
            }
        }
    }
    Ok(parameters)
}
