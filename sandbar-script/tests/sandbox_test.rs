//! End-to-end tests for the strategy language: source in, backtest out.

use chrono::DateTime;
use proptest::prelude::*;
use sandbar_core::domain::{Bar, PositionSide};
use sandbar_core::engine::{run_backtest, EngineError, EngineSettings};
use sandbar_script::{compile, execute, CompileOptions, ContractError, Limits, ParamValue, ScriptStrategy};
use std::collections::BTreeMap;

const RSI_TEMPLATE: &str = "\
from backtesting import Strategy
import talib

class RsiStrategy(Strategy):
    rsi_period = 14
    rsi_lower = 30
    rsi_upper = 70

    def init(self):
        self.rsi = self.I(talib.RSI, self.data.Close, self.rsi_period)

    def next(self):
        if not self.position:
            if self.rsi[-1] < self.rsi_lower:
                self.buy()
        else:
            if self.rsi[-1] > self.rsi_upper:
                self.position.close()
";

const SMA_TEMPLATE: &str = "\
from backtesting import Strategy
from backtesting.lib import crossover
import numpy as np

class SmaCrossover(Strategy):
    n1 = 10
    n2 = 20

    def init(self):
        close = self.data.Close
        self.sma1 = self.I(self._sma, close, self.n1)
        self.sma2 = self.I(self._sma, close, self.n2)

    def next(self):
        if crossover(self.sma1, self.sma2):
            self.buy()
        elif crossover(self.sma2, self.sma1):
            self.sell()

    @staticmethod
    def _sma(values, n):
        return np.convolve(values, np.ones(n) / n, mode='valid')
";

const SMA_TALIB: &str = "\
from backtesting import Strategy
from backtesting.lib import crossover
import talib

class SmaCrossover(Strategy):
    n1 = 10
    n2 = 20

    def init(self):
        self.sma1 = self.I(talib.SMA, self.data.Close, self.n1)
        self.sma2 = self.I(talib.SMA, self.data.Close, self.n2)

    def next(self):
        if crossover(self.sma1, self.sma2):
            if self.position.is_short:
                self.position.close()
            self.buy()
        elif crossover(self.sma2, self.sma1):
            if self.position.is_long:
                self.position.close()
            self.sell()
";

/// A year of daily candles oscillating around 100.
fn sample_bars() -> Vec<Bar> {
    (0..365)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 10.0 * (t / 15.0).sin() + 0.02 * t;
            Bar {
                timestamp: DateTime::from_timestamp(1_577_836_800 + i * 86_400, 0).unwrap(),
                open: close - 0.5,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

fn load(source: &str) -> Result<ScriptStrategy, String> {
    let unit = compile(source, &CompileOptions::default()).map_err(|e| e.to_string())?;
    let def = execute(&unit, &BTreeMap::new(), Limits::default()).map_err(|e| e.to_string())?;
    Ok(ScriptStrategy::new(&def, 10_000.0))
}

fn settings() -> EngineSettings {
    EngineSettings::new(10_000.0, 0.002)
}

// ── Templates ──

#[test]
fn rsi_template_trades() {
    let mut strategy = load(RSI_TEMPLATE).unwrap();
    let outcome = run_backtest(&sample_bars(), &mut strategy, &settings()).unwrap();
    assert_eq!(outcome.strategy_name, "RsiStrategy");
    assert_eq!(outcome.first_trading_bar, 14);
    assert!(!outcome.trades.is_empty());
    assert_eq!(outcome.equity_curve.len(), 365);
}

#[test]
fn sma_template_with_talib_trades_both_ways() {
    let mut strategy = load(SMA_TALIB).unwrap();
    let outcome = run_backtest(&sample_bars(), &mut strategy, &settings()).unwrap();
    assert_eq!(outcome.first_trading_bar, 19);
    assert!(outcome.trades.iter().any(|t| t.side == PositionSide::Long));
    assert!(outcome.trades.iter().any(|t| t.side == PositionSide::Short));
}

#[test]
fn valid_mode_convolution_is_an_indicator_length_error() {
    let mut strategy = load(SMA_TEMPLATE).unwrap();
    let err = run_backtest(&sample_bars(), &mut strategy, &settings()).unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, EngineError::Strategy { bar: None, .. }));
    assert!(message.contains("IndicatorError"), "{message}");
    assert!(message.contains("expected 365"), "{message}");
}

#[test]
fn parameter_overrides_change_the_run() {
    let unit = compile(RSI_TEMPLATE, &CompileOptions::default()).unwrap();
    let mut overrides = BTreeMap::new();
    overrides.insert("rsi_period".to_string(), ParamValue::Number(7.0));
    let def = execute(&unit, &overrides, Limits::default()).unwrap();
    let mut strategy = ScriptStrategy::new(&def, 10_000.0);
    let outcome = run_backtest(&sample_bars(), &mut strategy, &settings()).unwrap();
    assert_eq!(outcome.first_trading_bar, 7);
}

// ── Restriction ──

#[test]
fn dangerous_builtins_are_compile_errors() {
    for source in [
        "open('/etc/passwd')\n",
        "eval('1')\n",
        "exec('x = 1')\n",
        "__import__('os')\n",
        "x = ().__class__\n",
        "getattr(np, 'load')\n",
    ] {
        let err = compile(source, &CompileOptions::default()).unwrap_err();
        assert!(!err.diagnostics.is_empty(), "{source} was accepted");
    }
}

#[test]
fn unsupported_constructs_are_reported_together() {
    let source = "\
while True:
    pass
f = lambda x: x
try:
    pass
except Exception:
    pass
";
    let err = compile(source, &CompileOptions::default()).unwrap_err();
    assert!(err.diagnostics.len() >= 3, "{err}");
}

#[test]
fn runaway_next_hits_the_step_budget() {
    let source = "\
class Spin(Strategy):
    def init(self):
        pass
    def next(self):
        total = 0
        for i in range(100000):
            total += i
";
    let unit = compile(source, &CompileOptions::default()).unwrap();
    let limits = Limits {
        step_budget: 10_000,
        ..Limits::default()
    };
    let def = execute(&unit, &BTreeMap::new(), limits).unwrap();
    let mut strategy = ScriptStrategy::new(&def, 10_000.0);
    let err = run_backtest(&sample_bars(), &mut strategy, &settings()).unwrap_err();
    assert!(err.to_string().contains("StepBudgetExceeded"), "{err}");
}

// ── Contract ──

#[test]
fn missing_strategy_class_is_a_contract_error() {
    let unit = compile("x = 1\n", &CompileOptions::default()).unwrap();
    let err = execute(&unit, &BTreeMap::new(), Limits::default()).unwrap_err();
    assert_eq!(err, ContractError::NoClass);
}

#[test]
fn class_without_strategy_base_is_named() {
    let source = "class Lonely:\n    def init(self):\n        pass\n    def next(self):\n        pass\n";
    let unit = compile(source, &CompileOptions::default()).unwrap();
    let err = execute(&unit, &BTreeMap::new(), Limits::default()).unwrap_err();
    assert!(err.to_string().contains("Lonely"));
}

// ── Properties ──

proptest! {
    #[test]
    fn imports_outside_the_allowlist_are_always_rejected(module in "[a-z][a-z_]{0,11}") {
        prop_assume!(!["backtesting", "numpy", "pandas", "talib"].contains(&module.as_str()));
        let source = format!("import {module}\n");
        prop_assert!(compile(&source, &CompileOptions::default()).is_err());
        let from = format!("from {module} import thing\n");
        prop_assert!(compile(&from, &CompileOptions::default()).is_err());
    }

    #[test]
    fn unknown_names_never_resolve(name in "[a-z]{3,10}") {
        prop_assume!(!sandbar_script::capabilities::is_builtin(&name));
        prop_assume!(sandbar_script::capabilities::prelude_item(&name).is_none());
        prop_assume!(!sandbar_script::lexer::Keyword::is_keyword(&name));
        let source = format!("x = {name}\n");
        prop_assert!(compile(&source, &CompileOptions::default()).is_err());
    }
}
