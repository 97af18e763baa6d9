//! Static restriction pass.
//!
//! Walks the syntax tree once and collects every violation of the safe
//! subset. Nothing is evaluated. The rules:
//! - imports name allowlisted modules and members only, at module level
//! - no identifier or attribute starts with a double underscore
//! - attribute assignment targets `self` inside a method, never a reserved
//!   strategy API name; item assignment is rejected
//! - classes live at module level and hold assignments, methods,
//!   docstrings and `pass`
//! - functions do not nest; the only decorator is `@staticmethod`
//! - every name read resolves to a local, a module binding, the prelude
//!   or a safe builtin

use crate::ast::*;
use crate::capabilities::{self, ModuleId, PreludeItem};
use crate::compiler::Diagnostic;
use std::collections::{HashMap, HashSet};

/// Check a parsed module. Diagnostics come back sorted by position.
pub fn check(module: &Module) -> Vec<Diagnostic> {
    let mut checker = Checker::new(module);
    let mut scope = Scope::module();
    checker.check_block(&module.body, &mut scope);
    let mut diagnostics = checker.diagnostics;
    diagnostics.sort_by_key(|d| (d.line, d.column));
    diagnostics
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Class,
    Function,
    Method,
}

struct Scope {
    kind: ScopeKind,
    locals: HashSet<String>,
    loop_depth: usize,
}

impl Scope {
    fn module() -> Self {
        Self {
            kind: ScopeKind::Module,
            locals: HashSet::new(),
            loop_depth: 0,
        }
    }

    fn in_function(&self) -> bool {
        matches!(self.kind, ScopeKind::Function | ScopeKind::Method)
    }
}

struct Checker {
    diagnostics: Vec<Diagnostic>,
    module_names: HashSet<String>,
    /// Names statically known to refer to an allowlisted module.
    module_aliases: HashMap<String, ModuleId>,
}

impl Checker {
    fn new(module: &Module) -> Self {
        let mut module_names = HashSet::new();
        collect_bindings(&module.body, &mut module_names);

        let mut module_aliases: HashMap<String, ModuleId> = capabilities::PRELUDE
            .iter()
            .filter_map(|(name, item)| match item {
                PreludeItem::Module(id) => Some((name.to_string(), *id)),
                _ => None,
            })
            .collect();
        // A rebound prelude alias is no longer known to be a module.
        module_aliases.retain(|name, _| !module_names.contains(name));
        for stmt in &module.body {
            if let StmtKind::Import(names) = &stmt.kind {
                for import in names {
                    let bound = import.bound_name().to_string();
                    let target = match &import.alias {
                        Some(_) => ModuleId::from_path(&import.name),
                        None => ModuleId::from_path(import.name.split('.').next().unwrap_or("")),
                    };
                    if let Some(id) = target {
                        module_aliases.insert(bound, id);
                    }
                }
            }
        }

        Self {
            diagnostics: Vec::new(),
            module_names,
            module_aliases,
        }
    }

    fn report(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            line: span.line,
            column: span.column,
            message: message.into(),
        });
    }

    fn check_identifier(&mut self, span: Span, name: &str) -> bool {
        if capabilities::is_forbidden_name(name) {
            self.report(span, format!("name '{name}' is not allowed (double-underscore names are reserved)"));
            return false;
        }
        true
    }

    // ─── Statements ──────────────────────────────────────────────────

    fn check_block(&mut self, body: &[Stmt], scope: &mut Scope) {
        for stmt in body {
            self.check_stmt(stmt, scope);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, scope: &mut Scope) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Expr(expr) => self.check_expr(expr, scope),
            StmtKind::Assign { targets, value } => {
                self.check_expr(value, scope);
                for target in targets {
                    self.check_target(target, scope);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.check_expr(value, scope);
                self.check_target(target, scope);
                // The target is also read.
                self.check_expr(target, scope);
            }
            StmtKind::If { test, body, orelse } => {
                self.check_expr(test, scope);
                self.check_block(body, scope);
                self.check_block(orelse, scope);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.check_expr(iter, scope);
                self.check_target(target, scope);
                scope.loop_depth += 1;
                self.check_block(body, scope);
                scope.loop_depth -= 1;
                self.check_block(orelse, scope);
            }
            StmtKind::FunctionDef(def) => self.check_function(def, scope),
            StmtKind::ClassDef(class) => self.check_class(class, scope),
            StmtKind::Return(value) => {
                if !scope.in_function() {
                    self.report(span, "'return' outside function");
                }
                if let Some(value) = value {
                    self.check_expr(value, scope);
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if scope.loop_depth == 0 {
                    let word = if matches!(stmt.kind, StmtKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    self.report(span, format!("'{word}' outside loop"));
                }
            }
            StmtKind::Pass => {}
            StmtKind::Import(names) => {
                if scope.kind != ScopeKind::Module {
                    self.report(span, "imports are only allowed at module level");
                }
                for import in names {
                    if ModuleId::from_path(&import.name).is_none() {
                        self.report(
                            import.span,
                            format!("import of module '{}' is not allowed", import.name),
                        );
                    }
                    if let Some(alias) = &import.alias {
                        self.check_identifier(import.span, alias);
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => {
                if scope.kind != ScopeKind::Module {
                    self.report(span, "imports are only allowed at module level");
                }
                let Some(id) = ModuleId::from_path(module) else {
                    self.report(span, format!("import from module '{module}' is not allowed"));
                    return;
                };
                for import in names {
                    if import.name == "*" {
                        self.report(import.span, "wildcard imports are not allowed");
                    } else if !id.has_member(&import.name) {
                        self.report(
                            import.span,
                            format!("cannot import '{}' from '{module}'", import.name),
                        );
                    } else if self.check_identifier(import.span, &import.name) {
                        if let Some(alias) = &import.alias {
                            self.check_identifier(import.span, alias);
                        }
                    }
                }
            }
            StmtKind::Unsupported(what) => self.report(span, format!("{what} is not supported")),
        }
    }

    fn check_function(&mut self, def: &FunctionDef, scope: &mut Scope) {
        self.check_identifier(def.span, &def.name);
        if scope.in_function() {
            self.report(def.span, format!("nested function '{}' is not supported", def.name));
        }
        for decorator in &def.decorators {
            let is_staticmethod = matches!(&decorator.kind, ExprKind::Name(n) if n == "staticmethod");
            if !is_staticmethod || scope.kind != ScopeKind::Class {
                self.report(decorator.span, "only @staticmethod is allowed, and only on methods");
            }
        }
        if def.variadic {
            self.report(def.span, format!("variadic parameters in '{}' are not supported", def.name));
        }
        if scope.kind == ScopeKind::Class && capabilities::is_reserved_api(&def.name) {
            self.report(def.span, format!("method '{}' would shadow the strategy API", def.name));
        }

        let mut seen = HashSet::new();
        for param in &def.params {
            self.check_identifier(param.span, &param.name);
            if !seen.insert(param.name.as_str()) {
                self.report(param.span, format!("duplicate parameter '{}'", param.name));
            }
            if let Some(default) = &param.default {
                self.check_expr(default, scope);
            }
        }

        let is_static = !def.decorators.is_empty();
        let mut inner = Scope {
            kind: if scope.kind == ScopeKind::Class && !is_static {
                ScopeKind::Method
            } else {
                ScopeKind::Function
            },
            locals: def.params.iter().map(|p| p.name.clone()).collect(),
            loop_depth: 0,
        };
        collect_bindings(&def.body, &mut inner.locals);
        self.check_block(&def.body, &mut inner);
    }

    fn check_class(&mut self, class: &ClassDef, scope: &mut Scope) {
        self.check_identifier(class.span, &class.name);
        if scope.kind != ScopeKind::Module {
            self.report(class.span, format!("nested class '{}' is not supported", class.name));
        }
        if !class.decorators.is_empty() {
            self.report(class.span, "class decorators are not supported");
        }
        for base in &class.bases {
            self.check_expr(base, scope);
        }

        let mut inner = Scope {
            kind: ScopeKind::Class,
            locals: HashSet::new(),
            loop_depth: 0,
        };
        collect_bindings(&class.body, &mut inner.locals);

        for (i, stmt) in class.body.iter().enumerate() {
            match &stmt.kind {
                // Nested classes are reported by check_class itself.
                StmtKind::Pass | StmtKind::FunctionDef(_) | StmtKind::ClassDef(_) => {}
                StmtKind::Expr(Expr {
                    kind: ExprKind::Str(_),
                    ..
                }) if i == 0 => {}
                StmtKind::Assign { targets, .. } => {
                    for target in targets {
                        match &target.kind {
                            ExprKind::Name(name) if capabilities::is_reserved_api(name) => {
                                self.report(
                                    target.span,
                                    format!("class attribute '{name}' would shadow the strategy API"),
                                );
                            }
                            ExprKind::Name(_) => {}
                            _ => self.report(target.span, "class attributes must be plain names"),
                        }
                    }
                }
                _ => {
                    self.report(
                        stmt.span,
                        "class bodies may only contain parameters, methods and a docstring",
                    );
                    continue;
                }
            }
            self.check_stmt(stmt, &mut inner);
        }
    }

    fn check_target(&mut self, target: &Expr, scope: &mut Scope) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.check_identifier(target.span, name);
            }
            ExprKind::Attribute { value, attr } => {
                if !self.check_identifier(target.span, attr) {
                    return;
                }
                let on_self = matches!(&value.kind, ExprKind::Name(n) if n == "self");
                if !on_self || scope.kind != ScopeKind::Method {
                    self.report(target.span, "attribute assignment is only allowed on self inside a method");
                } else if capabilities::is_reserved_api(attr) {
                    self.report(
                        target.span,
                        format!("cannot assign to 'self.{attr}': it belongs to the strategy API"),
                    );
                }
                self.check_expr(value, scope);
            }
            ExprKind::Subscript { .. } => {
                self.report(target.span, "item assignment is not supported");
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.check_target(item, scope);
                }
            }
            ExprKind::Unsupported(what) => self.report(target.span, format!("{what} is not supported")),
            _ => self.report(target.span, "cannot assign to expression"),
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────

    fn check_expr(&mut self, expr: &Expr, scope: &mut Scope) {
        match &expr.kind {
            ExprKind::Name(name) => {
                if !self.check_identifier(expr.span, name) {
                    return;
                }
                if !self.resolves(name, scope) {
                    self.report(expr.span, format!("name '{name}' is not defined or not allowed"));
                }
            }
            ExprKind::Number(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::None => {}
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.check_expr(item, scope);
                }
            }
            ExprKind::Attribute { value, attr } => {
                if !self.check_identifier(expr.span, attr) {
                    return;
                }
                if let Some(module) = self.static_module(value, scope) {
                    if !module.has_member(attr) {
                        self.report(
                            expr.span,
                            format!("module '{}' has no allowed attribute '{attr}'", module.path()),
                        );
                    }
                }
                self.check_expr(value, scope);
            }
            ExprKind::Subscript { value, index } => {
                self.check_expr(value, scope);
                self.check_expr(index, scope);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.check_expr(part, scope);
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.check_expr(func, scope);
                for arg in args {
                    self.check_expr(arg, scope);
                }
                for keyword in keywords {
                    self.check_identifier(keyword.span, &keyword.name);
                    self.check_expr(&keyword.value, scope);
                }
            }
            ExprKind::BinOp { left, right, .. } => {
                self.check_expr(left, scope);
                self.check_expr(right, scope);
            }
            ExprKind::Unary { operand, .. } => self.check_expr(operand, scope),
            ExprKind::BoolOp { values, .. } => {
                for value in values {
                    self.check_expr(value, scope);
                }
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.check_expr(left, scope);
                for comparator in comparators {
                    self.check_expr(comparator, scope);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.check_expr(test, scope);
                self.check_expr(body, scope);
                self.check_expr(orelse, scope);
            }
            ExprKind::Unsupported(what) => self.report(expr.span, format!("{what} is not supported")),
        }
    }

    fn resolves(&self, name: &str, scope: &Scope) -> bool {
        (scope.kind != ScopeKind::Module && scope.locals.contains(name))
            || self.module_names.contains(name)
            || capabilities::prelude_item(name).is_some()
            || capabilities::is_builtin(name)
            // decorator only; rejected elsewhere when misused
            || name == "staticmethod"
    }

    /// The module an expression statically denotes, if any.
    fn static_module(&self, expr: &Expr, scope: &Scope) -> Option<ModuleId> {
        match &expr.kind {
            ExprKind::Name(name) => {
                if scope.kind != ScopeKind::Module && scope.locals.contains(name) {
                    return None;
                }
                self.module_aliases.get(name).copied()
            }
            ExprKind::Attribute { value, attr } => {
                match (self.static_module(value, scope)?, attr.as_str()) {
                    (ModuleId::Backtesting, "lib") => Some(ModuleId::BacktestingLib),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Names a block binds in its own scope (not descending into defs/classes).
fn collect_bindings(body: &[Stmt], names: &mut HashSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    collect_target_names(target, names);
                }
            }
            StmtKind::AugAssign { target, .. } => collect_target_names(target, names),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                collect_target_names(target, names);
                collect_bindings(body, names);
                collect_bindings(orelse, names);
            }
            StmtKind::If { body, orelse, .. } => {
                collect_bindings(body, names);
                collect_bindings(orelse, names);
            }
            StmtKind::FunctionDef(def) => {
                names.insert(def.name.clone());
            }
            StmtKind::ClassDef(class) => {
                names.insert(class.name.clone());
            }
            StmtKind::Import(imports) | StmtKind::ImportFrom { names: imports, .. } => {
                for import in imports {
                    if import.name != "*" {
                        names.insert(import.bound_name().to_string());
                    }
                }
            }
            _ => {}
        }
    }
}

fn collect_target_names(target: &Expr, names: &mut HashSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                collect_target_names(item, names);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn diagnostics(source: &str) -> Vec<String> {
        check(&parse(source).unwrap())
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    fn assert_clean(source: &str) {
        let diags = diagnostics(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    }

    fn assert_rejected(source: &str, needle: &str) {
        let diags = diagnostics(source);
        assert!(
            diags.iter().any(|d| d.contains(needle)),
            "expected a diagnostic containing {needle:?}, got {diags:?}"
        );
    }

    // ── Accepted ──

    #[test]
    fn rsi_template_is_clean() {
        assert_clean(
            "\
from backtesting import Strategy
import talib

class RsiStrategy(Strategy):
    \"\"\"Buy oversold, sell overbought.\"\"\"
    rsi_period = 14
    rsi_lower = 30
    rsi_upper = 70

    def init(self):
        close = self.data.Close
        self.rsi = self.I(talib.RSI, close, self.rsi_period)

    def next(self):
        if not self.position:
            if self.rsi[-1] < self.rsi_lower:
                self.buy()
        else:
            if self.rsi[-1] > self.rsi_upper:
                self.position.close()
",
        );
    }

    #[test]
    fn helpers_and_single_underscore_allowed() {
        assert_clean(
            "\
import numpy as np
from backtesting.lib import crossover

def spread(a, b):
    total = 0
    for x, y in zip(a, b):
        total += x - y
    return total

class Cross(Strategy):
    n = 5

    def init(self):
        self.fast = self.I(self._sma, self.data.Close, self.n)

    def next(self):
        if crossover(self.fast, self.data.Close):
            self.buy(size=0.5)

    @staticmethod
    def _sma(values, n):
        return np.convolve(values, np.ones(n) / n, mode='same')
",
        );
    }

    // ── Rejected ──

    #[test]
    fn disallowed_imports() {
        assert_rejected("import os\n", "import of module 'os'");
        assert_rejected("import numpy.linalg\n", "import of module 'numpy.linalg'");
        assert_rejected("from subprocess import run\n", "module 'subprocess'");
        assert_rejected("from numpy import *\n", "wildcard");
        assert_rejected("from backtesting import Backtest\n", "cannot import 'Backtest'");
        assert_rejected("def f():\n    import numpy\n", "module level");
    }

    #[test]
    fn unknown_and_dangerous_names() {
        assert_rejected("x = open('f')\n", "name 'open'");
        assert_rejected("eval('1')\n", "name 'eval'");
        assert_rejected("x = __import__('os')\n", "'__import__' is not allowed");
        assert_rejected("x = np.__dict__\n", "'__dict__' is not allowed");
        assert_rejected("x = np.load\n", "module 'numpy' has no allowed attribute 'load'");
        assert_rejected("x = (1).__class__\n", "not allowed");
    }

    #[test]
    fn assignment_rules() {
        assert_rejected(
            "class S(Strategy):\n    def next(self):\n        self.buy = 1\n",
            "strategy API",
        );
        assert_rejected(
            "class S(Strategy):\n    def next(self):\n        x = [1]\n        x[0] = 2\n",
            "item assignment",
        );
        assert_rejected("np.mean = 1\n", "only allowed on self");
        assert_rejected("class S(Strategy):\n    position = 3\n", "shadow the strategy API");
    }

    #[test]
    fn structural_rules() {
        assert_rejected("def f():\n    def g():\n        pass\n", "nested function");
        assert_rejected("class A:\n    class B:\n        pass\n", "nested class");
        assert_rejected("class A:\n    if True:\n        x = 1\n", "class bodies");
        assert_rejected("@property\ndef f():\n    pass\n", "only @staticmethod");
        assert_rejected("def f(*args):\n    pass\n", "variadic");
        assert_rejected("return 1\n", "'return' outside function");
        assert_rejected("break\n", "'break' outside loop");
        assert_rejected("while True:\n    pass\n", "while loop is not supported");
        assert_rejected("f = lambda: 1\n", "lambda is not supported");
    }

    #[test]
    fn all_violations_are_reported() {
        let diags = diagnostics("import os\nimport sys\nx = open('a')\n");
        assert_eq!(diags.len(), 3);
    }

    #[test]
    fn locals_shadow_module_aliases() {
        assert_clean("def f(np):\n    return np.whatever\n");
    }
}
