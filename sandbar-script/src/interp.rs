//! Tree-walking interpreter for checked strategy scripts.
//!
//! The interpreter only ever sees modules that passed the restriction
//! pass, but it does not rely on that for safety: attribute reads go
//! through explicit per-type tables, and every statement and call draws
//! from a step budget so a script cannot run unbounded.

use crate::api::ApiState;
use crate::ast::{BoolOp, ClassDef, Expr, ExprKind, FunctionDef, Module, Stmt, StmtKind, UnaryOp};
use crate::capabilities::{is_forbidden_name, ModuleId, PRELUDE};
use crate::error::{ErrorKind, RtResult, RuntimeError};
use crate::libs::{self, methods, Args};
use crate::ops;
use crate::value::{ArrayValue, ClassBase, ClassObj, FunctionObj, Instance, Namespace, Value};
use sandbar_core::domain::BarField;
use std::rc::Rc;

pub const DEFAULT_STEP_BUDGET: u64 = 1_000_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Execution bounds for one interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Steps available to each top-level entry (module body, `init`, one `next`).
    pub step_budget: u64,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Control flow out of a block.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A scope. Module-level code writes straight to the globals.
struct Frame {
    locals: Namespace,
    module: bool,
}

impl Frame {
    fn module() -> Self {
        Self {
            locals: Namespace::new(),
            module: true,
        }
    }

    fn function() -> Self {
        Self {
            locals: Namespace::new(),
            module: false,
        }
    }
}

#[derive(Debug)]
pub struct Interpreter {
    globals: Namespace,
    limits: Limits,
    fuel: u64,
    depth: usize,
    pub(crate) api: ApiState,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl Interpreter {
    /// Fresh interpreter whose globals hold exactly the prelude.
    pub fn new(limits: Limits) -> Self {
        let mut globals = Namespace::new();
        for (name, item) in PRELUDE {
            globals.set(name, libs::prelude_value(*item));
        }
        Self::with_globals(globals, limits)
    }

    pub fn with_globals(globals: Namespace, limits: Limits) -> Self {
        Self {
            globals,
            limits,
            fuel: limits.step_budget,
            depth: 0,
            api: ApiState::default(),
        }
    }

    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Refill the step budget before a new top-level entry.
    pub fn reset_budget(&mut self) {
        self.fuel = self.limits.step_budget;
    }

    pub fn steps_used(&self) -> u64 {
        self.limits.step_budget - self.fuel
    }

    fn tick(&mut self, cost: u64) -> RtResult<()> {
        if self.fuel < cost {
            self.fuel = 0;
            return Err(RuntimeError::new(
                ErrorKind::StepBudget,
                format!("step budget of {} exceeded", self.limits.step_budget),
            ));
        }
        self.fuel -= cost;
        Ok(())
    }

    /// Run a module body at global scope.
    pub fn run_module(&mut self, module: &Module) -> RtResult<()> {
        let mut frame = Frame::module();
        match self.exec_block(&module.body, &mut frame)? {
            Flow::Normal => Ok(()),
            _ => Err(RuntimeError::type_error("control flow escaped the module body")),
        }
    }

    /// Call the named method on `instance` with no arguments.
    pub fn call_method(&mut self, instance: &Rc<Instance>, name: &str) -> RtResult<Value> {
        match instance.class.lookup(name) {
            Some(Value::Function(func)) => self.call_function(&func, Some(instance), Vec::new(), Vec::new()),
            _ => Err(RuntimeError::attribute_error(format!(
                "'{}' object has no method '{name}'",
                instance.class.name
            ))),
        }
    }

    // ─── Statements ──────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt], frame: &mut Frame) -> RtResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, frame)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &mut Frame) -> RtResult<Flow> {
        self.exec_stmt_inner(stmt, frame)
            .map_err(|e| e.at_line(stmt.span.line))
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt, frame: &mut Frame) -> RtResult<Flow> {
        self.tick(1)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, frame)?;
                for target in targets {
                    self.assign(target, value.clone(), frame)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target, frame)?;
                let rhs = self.eval(value, frame)?;
                let updated = ops::binary(*op, &current, &rhs)?;
                self.assign(target, updated, frame)?;
            }
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test, frame)?;
                let branch = if self.truthy(&test)? { body } else { orelse };
                return self.exec_block(branch, frame);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, frame)?;
                let items = self.iterate(&iterable)?;
                let mut broke = false;
                for item in items {
                    self.assign(target, item, frame)?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                if !broke {
                    return self.exec_block(orelse, frame);
                }
            }
            StmtKind::FunctionDef(def) => {
                let func = self.make_function(def, None, frame)?;
                self.bind(&def.name, Value::Function(func), frame);
            }
            StmtKind::ClassDef(def) => {
                let class = self.make_class(def, frame)?;
                self.bind(&def.name, Value::Class(class), frame);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Import(names) => {
                for import in names {
                    // `import a.b` binds `a`; `import a.b as c` binds the submodule.
                    let path = match &import.alias {
                        Some(_) => import.name.as_str(),
                        None => import.bound_name(),
                    };
                    let module = ModuleId::from_path(path).ok_or_else(|| {
                        RuntimeError::new(ErrorKind::Name, format!("module '{}' is not allowed", import.name))
                    })?;
                    self.bind(import.bound_name(), Value::Module(module), frame);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let id = ModuleId::from_path(module).ok_or_else(|| {
                    RuntimeError::new(ErrorKind::Name, format!("module '{module}' is not allowed"))
                })?;
                for import in names {
                    let value = libs::module_member(id, &import.name).ok_or_else(|| {
                        RuntimeError::new(
                            ErrorKind::Name,
                            format!("cannot import name '{}' from '{module}'", import.name),
                        )
                    })?;
                    self.bind(import.bound_name(), value, frame);
                }
            }
            StmtKind::Unsupported(what) => {
                return Err(RuntimeError::type_error(format!("{what} is not supported")));
            }
        }
        Ok(Flow::Normal)
    }

    fn bind(&mut self, name: &str, value: Value, frame: &mut Frame) {
        if frame.module {
            self.globals.set(name, value);
        } else {
            frame.locals.set(name, value);
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, frame: &mut Frame) -> RtResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bind(name, value, frame);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = self.iterate(&value)?;
                if items.len() != targets.len() {
                    return Err(RuntimeError::value_error(if items.len() < targets.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    }));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, frame)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value: object, attr } => match self.eval(object, frame)? {
                Value::Instance(instance) if !is_forbidden_name(attr) => {
                    instance.attrs.borrow_mut().set(attr, value);
                    Ok(())
                }
                other => Err(RuntimeError::type_error(format!(
                    "cannot set attribute '{attr}' on {}",
                    other.type_name()
                ))),
            },
            ExprKind::Subscript { .. } => Err(RuntimeError::type_error("item assignment is not supported")),
            _ => Err(RuntimeError::type_error("cannot assign to expression")),
        }
    }

    fn make_function(
        &mut self,
        def: &Rc<FunctionDef>,
        class_name: Option<&str>,
        frame: &mut Frame,
    ) -> RtResult<Rc<FunctionObj>> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, frame)?),
                None => None,
            });
        }
        let is_static = def
            .decorators
            .iter()
            .any(|d| matches!(&d.kind, ExprKind::Name(n) if n == "staticmethod"));
        let qualname = match class_name {
            Some(class) => format!("{class}.{}", def.name),
            None => def.name.clone(),
        };
        Ok(Rc::new(FunctionObj {
            def: Rc::clone(def),
            defaults,
            is_static,
            qualname,
        }))
    }

    fn make_class(&mut self, def: &Rc<ClassDef>, frame: &mut Frame) -> RtResult<Rc<ClassObj>> {
        let mut bases = Vec::with_capacity(def.bases.len());
        for base in &def.bases {
            match self.eval(base, frame)? {
                Value::StrategyBase => bases.push(ClassBase::Strategy),
                Value::Class(class) => bases.push(ClassBase::User(class)),
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "class '{}' cannot derive from {}",
                        def.name,
                        other.type_name()
                    )))
                }
            }
        }

        // The class body sees its own names first, then the globals.
        let mut body = Frame::function();
        for stmt in &def.body {
            let result = match &stmt.kind {
                StmtKind::FunctionDef(method) => self.make_function(method, Some(&def.name), &mut body).map(|func| {
                    body.locals.set(&method.name, Value::Function(func));
                }),
                _ => self.exec_stmt(stmt, &mut body).map(|_| ()),
            };
            result.map_err(|e| e.at_line(stmt.span.line))?;
        }

        Ok(Rc::new(ClassObj {
            name: def.name.clone(),
            bases,
            attrs: body.locals,
            line: def.span.line,
        }))
    }

    // ─── Expressions ─────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> RtResult<Value> {
        match &expr.kind {
            ExprKind::Name(name) => self.lookup(name, frame),
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(Rc::clone(s))),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::None => Ok(Value::None),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items, frame)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items, frame)?)),
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, frame)?;
                self.get_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value, frame)?;
                match &index.kind {
                    ExprKind::Slice { lower, upper, step } => {
                        let lower = self.eval_bound(lower.as_deref(), frame)?;
                        let upper = self.eval_bound(upper.as_deref(), frame)?;
                        let step = self.eval_bound(step.as_deref(), frame)?;
                        slice(&object, lower, upper, step)
                    }
                    _ => {
                        let index = self.eval(index, frame)?;
                        subscript(&object, &index)
                    }
                }
            }
            ExprKind::Slice { .. } => Err(RuntimeError::type_error("slices are only valid inside []")),
            ExprKind::Call { func, args, keywords } => {
                let callee = self.eval(func, frame)?;
                let positional = self.eval_all(args, frame)?;
                let mut named = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    named.push((keyword.name.clone(), self.eval(&keyword.value, frame)?));
                }
                self.call(&callee, positional, named)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                ops::binary(*op, &left, &right)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.eval(operand, frame)?;
                if *op == UnaryOp::Not && !matches!(operand, Value::Array(_)) {
                    Ok(Value::Bool(!self.truthy(&operand)?))
                } else {
                    ops::unary(*op, &operand)
                }
            }
            ExprKind::BoolOp { op, values } => {
                let is_and = *op == BoolOp::And;
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value, frame)?;
                    // `and` stops at the first falsy value, `or` at the first truthy one.
                    if self.truthy(&last)? != is_and {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            ExprKind::Compare {
                left,
                ops: operators,
                comparators,
            } => {
                let mut left = self.eval(left, frame)?;
                let mut result = Value::Bool(true);
                for (op, comparator) in operators.iter().zip(comparators) {
                    let right = self.eval(comparator, frame)?;
                    result = ops::compare(*op, &left, &right)?;
                    if operators.len() > 1 && !self.truthy(&result)? {
                        return Ok(result);
                    }
                    left = right;
                }
                Ok(result)
            }
            ExprKind::IfExp { test, body, orelse } => {
                let test = self.eval(test, frame)?;
                if self.truthy(&test)? {
                    self.eval(body, frame)
                } else {
                    self.eval(orelse, frame)
                }
            }
            ExprKind::Unsupported(what) => Err(RuntimeError::type_error(format!("{what} is not supported"))),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], frame: &mut Frame) -> RtResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    fn eval_bound(&mut self, expr: Option<&Expr>, frame: &mut Frame) -> RtResult<Option<i64>> {
        match expr {
            None => Ok(None),
            Some(expr) => match self.eval(expr, frame)? {
                Value::None => Ok(None),
                value => value.expect_integer("slice index").map(Some),
            },
        }
    }

    fn lookup(&self, name: &str, frame: &Frame) -> RtResult<Value> {
        if !frame.module {
            if let Some(value) = frame.locals.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(native) = libs::builtin(name) {
            return Ok(Value::Native(native));
        }
        Err(RuntimeError::new(ErrorKind::Name, format!("name '{name}' is not defined")))
    }

    /// Attribute read, resolved per value type.
    pub(crate) fn get_attr(&self, object: &Value, attr: &str) -> RtResult<Value> {
        let missing = || {
            RuntimeError::attribute_error(format!(
                "'{}' object has no attribute '{attr}'",
                object.type_name()
            ))
        };
        if is_forbidden_name(attr) {
            return Err(missing());
        }
        match object {
            Value::Module(id) => libs::module_member(*id, attr).ok_or_else(|| {
                RuntimeError::attribute_error(format!("module '{}' has no attribute '{attr}'", id.path()))
            }),
            Value::Instance(instance) => {
                if let Some(value) = self.api.instance_member(attr) {
                    return Ok(value);
                }
                if let Some(value) = instance.attrs.borrow().get(attr) {
                    return Ok(value.clone());
                }
                match instance.class.lookup(attr) {
                    Some(Value::Function(func)) if !func.is_static => {
                        Ok(Value::BoundMethod(Rc::clone(instance), func))
                    }
                    Some(value) => Ok(value),
                    None => Err(RuntimeError::attribute_error(format!(
                        "'{}' object has no attribute '{attr}'",
                        instance.class.name
                    ))),
                }
            }
            Value::Class(class) => class.lookup(attr).ok_or_else(|| {
                RuntimeError::attribute_error(format!("type object '{}' has no attribute '{attr}'", class.name))
            }),
            Value::Position => self.api.position_member(attr).ok_or_else(missing),
            Value::Data => match BarField::from_column_name(attr) {
                Some(field) => self.api.column(field).map(Value::Array),
                None => Err(missing()),
            },
            Value::Array(_) | Value::List(_) | Value::Rolling(..) => {
                methods::attribute(object, attr).ok_or_else(missing)
            }
            _ => Err(missing()),
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────

    pub(crate) fn call(&mut self, callee: &Value, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> RtResult<Value> {
        self.tick(1)?;
        match callee {
            Value::Native(native) => {
                self.tick(data_cost(&positional))?;
                (native.call)(self, &Args::new(native.name, positional, keywords))
            }
            Value::Method(receiver, name) => {
                self.tick(data_cost(std::slice::from_ref(receiver.as_ref())))?;
                methods::call_method(receiver, name, &Args::new(*name, positional, keywords))
            }
            Value::Function(func) => self.call_function(func, None, positional, keywords),
            Value::BoundMethod(instance, func) => {
                let instance = Rc::clone(instance);
                self.call_function(func, Some(&instance), positional, keywords)
            }
            Value::Api(member) => self.call_api(*member, positional, keywords),
            Value::StrategyBase | Value::Class(_) => Err(RuntimeError::type_error(
                "strategy classes cannot be instantiated from a script",
            )),
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<FunctionObj>,
        receiver: Option<&Rc<Instance>>,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> RtResult<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(RuntimeError::new(
                ErrorKind::Recursion,
                format!("maximum call depth of {} exceeded", self.limits.max_call_depth),
            ));
        }

        let mut frame = Frame::function();
        bind_arguments(func, receiver, positional, keywords, &mut frame.locals)?;

        self.depth += 1;
        let result = self.exec_block(&func.def.body, &mut frame);
        self.depth -= 1;

        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(e) => Err(e.with_frame(format!("{} (line {})", func.qualname, func.def.span.line))),
        }
    }

    // ─── Protocols ───────────────────────────────────────────────────

    /// Truthiness, including the engine-backed values.
    pub fn truthy(&self, value: &Value) -> RtResult<bool> {
        match value {
            Value::Position => Ok(self.api.position.is_open()),
            Value::ClosedTrades => Ok(self.api.closed_trades > 0),
            other => other.plain_truthy(),
        }
    }

    pub fn length(&self, value: &Value) -> RtResult<usize> {
        match value {
            Value::List(items) => Ok(items.borrow().len()),
            Value::Tuple(items) => Ok(items.len()),
            Value::Str(s) => Ok(s.chars().count()),
            Value::Array(a) | Value::ILoc(a) => Ok(a.len()),
            Value::ClosedTrades => Ok(self.api.closed_trades),
            Value::Data => Ok(self.api.visible_bars()),
            other => Err(RuntimeError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    pub fn iterate(&self, value: &Value) -> RtResult<Vec<Value>> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()),
            Value::Array(a) => Ok(a.values().iter().map(|v| Value::Number(*v)).collect()),
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

/// Extra steps for natives proportional to the data they touch.
fn data_cost(values: &[Value]) -> u64 {
    let elements: usize = values
        .iter()
        .map(|v| match v {
            Value::Array(a) | Value::Rolling(a, _) | Value::ILoc(a) => a.len(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            _ => 0,
        })
        .sum();
    (elements / 64) as u64
}

fn bind_arguments(
    func: &FunctionObj,
    receiver: Option<&Rc<Instance>>,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
    locals: &mut Namespace,
) -> RtResult<()> {
    let params = &func.def.params;
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    let supplied: Vec<Value> = receiver
        .filter(|_| !func.is_static)
        .map(|instance| Value::Instance(Rc::clone(instance)))
        .into_iter()
        .chain(positional)
        .collect();

    if supplied.len() > params.len() {
        return Err(RuntimeError::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            func.qualname,
            params.len(),
            supplied.len()
        )));
    }
    for (slot, value) in slots.iter_mut().zip(supplied) {
        *slot = Some(value);
    }
    for (name, value) in keywords {
        let Some(index) = params.iter().position(|p| p.name == name) else {
            return Err(RuntimeError::type_error(format!(
                "{}() got an unexpected keyword argument '{name}'",
                func.qualname
            )));
        };
        if slots[index].is_some() {
            return Err(RuntimeError::type_error(format!(
                "{}() got multiple values for argument '{name}'",
                func.qualname
            )));
        }
        slots[index] = Some(value);
    }
    for ((param, slot), default) in params.iter().zip(slots).zip(&func.defaults) {
        let value = match slot.or_else(|| default.clone()) {
            Some(value) => value,
            None => {
                return Err(RuntimeError::type_error(format!(
                    "{}() missing required argument '{}'",
                    func.qualname, param.name
                )))
            }
        };
        locals.set(&param.name, value);
    }
    Ok(())
}

// ─── Indexing ────────────────────────────────────────────────────────

fn normalize_index(index: i64, len: usize, what: &str) -> RtResult<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::index_error(format!(
            "{what} index {index} out of range for length {len}"
        )));
    }
    Ok(resolved as usize)
}

fn subscript(object: &Value, index: &Value) -> RtResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index.expect_integer("list index")?, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index.expect_integer("tuple index")?, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index.expect_integer("string index")?, chars.len(), "string")?;
            Ok(Value::str(chars[i].encode_utf8(&mut [0; 4])))
        }
        Value::Array(a) | Value::ILoc(a) => match index {
            // Boolean mask selection.
            Value::Array(mask) => {
                if mask.len() != a.len() {
                    return Err(RuntimeError::index_error(format!(
                        "boolean index of length {} does not match array of length {}",
                        mask.len(),
                        a.len()
                    )));
                }
                let picked = a
                    .values()
                    .iter()
                    .zip(mask.values())
                    .filter(|(_, m)| **m != 0.0)
                    .map(|(v, _)| *v)
                    .collect();
                Ok(libs::array_value(picked, a.kind))
            }
            _ => {
                let i = normalize_index(index.expect_integer("array index")?, a.len(), "array")?;
                Ok(Value::Number(a.values()[i]))
            }
        },
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Positions selected by `[lower:upper:step]` over a sequence of `len`.
fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> RtResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let b = if bound < 0 { bound + len } else { bound };
        b.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn slice(object: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> RtResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(Value::str(&picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::Array(a) | Value::ILoc(a) => {
            let values = a.values();
            let picked = slice_positions(values.len(), lower, upper, step)?;
            Ok(Value::Array(ArrayValue::new(
                picked.into_iter().map(|i| values[i]).collect(),
                a.kind,
            )))
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(source: &str) -> Interpreter {
        let module = parse(source).unwrap();
        let mut interp = Interpreter::default();
        interp.run_module(&module).unwrap();
        interp
    }

    fn run_err(source: &str, limits: Limits) -> RuntimeError {
        let module = parse(source).unwrap();
        let mut interp = Interpreter::new(limits);
        interp.run_module(&module).unwrap_err()
    }

    fn global(interp: &Interpreter, name: &str) -> Value {
        interp.globals().get(name).cloned().unwrap()
    }

    // ── Evaluation ──

    #[test]
    fn arithmetic_and_control_flow() {
        let interp = run(
            "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    total += i\nelse:\n    done = True\n",
        );
        assert_eq!(global(&interp, "total").as_number(), Some(25.0));
        assert!(matches!(global(&interp, "done"), Value::Bool(true)));
    }

    #[test]
    fn functions_defaults_and_keywords() {
        let interp = run("def f(a, b=2):\n    return a * b\nx = f(3)\ny = f(3, b=4)\n");
        assert_eq!(global(&interp, "x").as_number(), Some(6.0));
        assert_eq!(global(&interp, "y").as_number(), Some(12.0));
    }

    #[test]
    fn slicing_follows_sequence_semantics() {
        let interp = run("xs = [1, 2, 3, 4, 5]\na = xs[1:3]\nb = xs[::-1]\nc = xs[-2:]\n");
        assert_eq!(global(&interp, "a").to_string(), "[2, 3]");
        assert_eq!(global(&interp, "b").to_string(), "[5, 4, 3, 2, 1]");
        assert_eq!(global(&interp, "c").to_string(), "[4, 5]");
    }

    #[test]
    fn tuple_unpacking() {
        let interp = run("a, b = (1, 2)\n");
        assert_eq!(global(&interp, "b").as_number(), Some(2.0));
        let err = run_err("a, b = (1, 2, 3)\n", Limits::default());
        assert!(err.message.contains("too many values"));
    }

    #[test]
    fn short_circuit_returns_operand() {
        let interp = run("a = 0 or 5\nb = 3 and 0\nc = 1 < 2 < 3\nd = 1 < 3 < 2\n");
        assert_eq!(global(&interp, "a").as_number(), Some(5.0));
        assert_eq!(global(&interp, "b").as_number(), Some(0.0));
        assert!(matches!(global(&interp, "c"), Value::Bool(true)));
        assert!(matches!(global(&interp, "d"), Value::Bool(false)));
    }

    #[test]
    fn classes_hold_parameters_and_methods() {
        let interp = run(
            "class Base(Strategy):\n    n = 3\n    def helper(self):\n        return self.n\nclass Child(Base):\n    n = 5\n",
        );
        let Value::Class(child) = global(&interp, "Child") else { panic!("expected class") };
        assert!(child.derives_from_strategy());
        assert_eq!(child.lookup("n").and_then(|v| v.as_number()), Some(5.0));
        assert!(matches!(child.lookup("helper"), Some(Value::Function(_))));
    }

    // ── Limits ──

    #[test]
    fn step_budget_stops_long_loops() {
        let limits = Limits {
            step_budget: 500,
            ..Limits::default()
        };
        let err = run_err("x = 0\nfor i in range(100000):\n    x += 1\n", limits);
        assert_eq!(err.kind, ErrorKind::StepBudget);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn repeated_doubling_hits_the_allocation_limit() {
        let err = run_err("s = 'a'\nfor i in range(40):\n    s = s + s\n", Limits::default());
        assert_eq!(err.kind, ErrorKind::Memory);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn recursion_is_bounded() {
        let err = run_err("def f(n):\n    return f(n + 1)\nf(0)\n", Limits::default());
        assert_eq!(err.kind, ErrorKind::Recursion);
        assert!(err.trace.len() >= DEFAULT_MAX_CALL_DEPTH);
    }

    // ── Errors ──

    #[test]
    fn errors_carry_the_innermost_line() {
        let err = run_err("def f():\n    return 1 / 0\n\nf()\n", Limits::default());
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(err.line, Some(2));
        assert_eq!(err.trace, vec!["f (line 1)".to_string()]);
    }

    #[test]
    fn index_errors_are_reported() {
        let err = run_err("xs = [1]\ny = xs[3]\n", Limits::default());
        assert_eq!(err.kind, ErrorKind::Index);
    }

    #[test]
    fn classes_cannot_be_instantiated() {
        let err = run_err("class A(Strategy):\n    pass\na = A()\n", Limits::default());
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn module_attributes_come_from_the_allowlist() {
        let interp = Interpreter::default();
        assert!(interp.get_attr(&Value::Module(ModuleId::Numpy), "mean").is_ok());
        assert!(interp.get_attr(&Value::Module(ModuleId::Numpy), "load").is_err());
        assert!(interp.get_attr(&Value::Module(ModuleId::Numpy), "__dict__").is_err());
    }

    #[test]
    fn slice_positions_match_sequence_rules() {
        assert_eq!(slice_positions(5, Some(-3), None, None).unwrap(), vec![2, 3, 4]);
        assert_eq!(slice_positions(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_positions(3, Some(10), None, None).unwrap(), Vec::<usize>::new());
        assert!(slice_positions(3, None, None, Some(0)).is_err());
    }
}
