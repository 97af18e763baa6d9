//! End-to-end runs of the pipeline against temporary working directories.

use sandbar_runner::pipeline::STRATEGY_FILE;
use sandbar_runner::{run_to_result, RunContext, RunResult, RunnerSettings};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

const RSI_STRATEGY: &str = "\
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

fn config() -> Value {
    json!({
        "initialCapital": 10000,
        "commission": 0.002,
        "startDate": "2020-01-01",
        "endDate": "2020-12-31"
    })
}

/// 365 daily candles from 2020-01-01: rising for half a year, then falling,
/// with a swing large enough to push RSI through both thresholds.
fn candles() -> Value {
    let rows: Vec<Value> = (0..365i64)
        .map(|i| {
            let t = i as f64;
            let trend = if i < 182 { 0.3 * t } else { 0.3 * (364 - i) as f64 };
            let close = 100.0 + trend + 8.0 * (t / 6.0).sin();
            json!({
                "timestamp": 1_577_836_800 + i * 86_400,
                "open": close - 0.4,
                "high": close + 1.2,
                "low": close - 1.2,
                "close": close,
                "volume": 1_000 + i
            })
        })
        .collect();
    Value::Array(rows)
}

fn workdir(config: &Value, ohlcv: &Value, strategy: Option<&str>) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "config.json", &config.to_string());
    write(dir.path(), "ohlcv.json", &ohlcv.to_string());
    if let Some(source) = strategy {
        write(dir.path(), STRATEGY_FILE, source);
    }
    dir
}

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn run_in(dir: &TempDir) -> RunResult {
    run_in_with(dir, RunnerSettings::default())
}

fn run_in_with(dir: &TempDir, settings: RunnerSettings) -> RunResult {
    let mut ctx = RunContext::new(dir.path(), settings);
    run_to_result(&mut ctx)
}

fn failure(result: &RunResult) -> (&str, &str) {
    match result {
        RunResult::Failure { error, traceback } => (error, traceback),
        RunResult::Success { .. } => panic!("expected a failure"),
    }
}

fn emitted(result: &RunResult) -> (i32, String, String) {
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let code = result.emit(&mut out, &mut err).unwrap();
    (
        code,
        String::from_utf8(out).unwrap(),
        String::from_utf8(err).unwrap(),
    )
}

// ── Scenario A: valid RSI strategy ──

#[test]
fn rsi_strategy_produces_report_and_metrics() {
    let dir = workdir(&config(), &candles(), Some(RSI_STRATEGY));
    let result = run_in(&dir);
    let RunResult::Success { html_report, metrics } = &result else {
        panic!("run failed: {result:?}");
    };
    assert!(html_report.starts_with("<!DOCTYPE html>"));
    assert!(html_report.contains("RsiStrategy"));
    assert!(metrics.total_trades > 0);
    assert!(metrics.win_rate >= 0.0 && metrics.win_rate <= 100.0);
    assert!(metrics.max_drawdown <= 0.0);

    let (code, stdout, stderr) = emitted(&result);
    assert_eq!(code, 0);
    assert!(stderr.is_empty());
    let doc: Value = serde_json::from_str(&stdout).unwrap();
    assert!(doc["html_report"].as_str().is_some_and(|s| !s.is_empty()));
    for key in [
        "total_return", "sharpe_ratio", "max_drawdown", "win_rate", "total_trades",
        "profit_factor", "best_day", "worst_day", "avg_trade",
    ] {
        assert!(doc["metrics"][key].is_number(), "{key}");
    }
}

#[test]
fn identical_inputs_give_identical_results() {
    let first = run_in(&workdir(&config(), &candles(), Some(RSI_STRATEGY)));
    let second = run_in(&workdir(&config(), &candles(), Some(RSI_STRATEGY)));
    assert_eq!(first, second);
}

// ── Scenario B: disallowed import ──

#[test]
fn os_import_is_rejected_before_execution() {
    let source = format!("import os\n{RSI_STRATEGY}");
    let dir = workdir(&config(), &candles(), Some(&source));
    let result = run_in(&dir);
    let (error, traceback) = failure(&result);
    assert!(error.starts_with("SandboxCompileError: "), "{error}");
    assert!(error.contains("'os'"), "{error}");
    assert!(traceback.starts_with("stage: compile"));

    let (code, stdout, stderr) = emitted(&result);
    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    let doc: Value = serde_json::from_str(&stderr).unwrap();
    assert!(doc["error"].as_str().unwrap().contains("import of module 'os' is not allowed"));
    assert!(doc["traceback"].is_string());
}

#[test]
fn file_access_is_rejected_at_compile_time() {
    let source = RSI_STRATEGY.replace(
        "        self.rsi = self.I(",
        "        open('/etc/passwd')\n        self.rsi = self.I(",
    );
    let dir = workdir(&config(), &candles(), Some(&source));
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert!(error.starts_with("SandboxCompileError"), "{error}");
}

// ── Scenario C: contract violation ──

#[test]
fn class_without_strategy_base_breaks_the_contract() {
    let source = "\
class NotAStrategy:
    def init(self):
        pass

    def next(self):
        pass
";
    let dir = workdir(&config(), &candles(), Some(source));
    let result = run_in(&dir);
    let (error, traceback) = failure(&result);
    assert!(error.starts_with("StrategyContractError: "), "{error}");
    assert!(error.contains("NotAStrategy"), "{error}");
    assert!(traceback.starts_with("stage: execute"));
}

#[test]
fn unknown_config_parameter_breaks_the_contract() {
    let mut cfg = config();
    cfg["parameters"] = json!({"rsi_window": 7});
    let dir = workdir(&cfg, &candles(), Some(RSI_STRATEGY));
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert!(error.starts_with("StrategyContractError"), "{error}");
    assert!(error.contains("rsi_window"), "{error}");
}

#[test]
fn known_config_parameter_changes_the_run() {
    let mut cfg = config();
    cfg["parameters"] = json!({"rsi_period": 5, "rsi_lower": 40, "rsi_upper": 60});
    let tuned = run_in(&workdir(&cfg, &candles(), Some(RSI_STRATEGY)));
    let default = run_in(&workdir(&config(), &candles(), Some(RSI_STRATEGY)));
    assert!(tuned.is_success());
    assert_ne!(tuned, default);
}

// ── Scenario D: empty price series ──

#[test]
fn empty_series_fails_before_the_sandbox() {
    // The strategy would be rejected too; the data stage must fail first.
    let dir = workdir(&config(), &json!([]), Some("import os\n"));
    let result = run_in(&dir);
    let (error, traceback) = failure(&result);
    assert!(error.starts_with("DataValidationError: "), "{error}");
    assert!(traceback.starts_with("stage: market data"));
}

#[test]
fn non_array_series_fails_validation() {
    let dir = workdir(&config(), &json!({"candles": []}), Some(RSI_STRATEGY));
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert!(error.starts_with("DataValidationError"), "{error}");
}

// ── Other stage failures ──

#[test]
fn missing_config_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert!(error.starts_with("ConfigNotFound"), "{error}");
}

#[test]
fn incomplete_config_is_a_validation_error() {
    let mut cfg = config();
    cfg.as_object_mut().unwrap().remove("endDate");
    let dir = workdir(&cfg, &candles(), Some(RSI_STRATEGY));
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert_eq!(error, "ConfigValidationError: missing required config field: endDate");
}

#[test]
fn malformed_candle_is_a_conversion_error() {
    let mut data = candles();
    data[10].as_object_mut().unwrap().remove("close");
    let dir = workdir(&config(), &data, Some(RSI_STRATEGY));
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert!(error.starts_with("ConversionError"), "{error}");
    assert!(error.contains("candle 10"), "{error}");
}

#[test]
fn missing_strategy_source_is_reported() {
    let dir = workdir(&config(), &candles(), None);
    let result = run_in(&dir);
    let (error, _) = failure(&result);
    assert!(error.starts_with("StrategySourceNotFound"), "{error}");
}

#[test]
fn runtime_failures_carry_line_and_script_calls() {
    let source = "\
class Crash(Strategy):
    def init(self):
        pass

    def next(self):
        if len(self.data) > 5:
            self.ratio()

    def ratio(self):
        return self.data.Close[-1] / 0
";
    let dir = workdir(&config(), &candles(), Some(source));
    let result = run_in(&dir);
    let (error, traceback) = failure(&result);
    assert!(error.starts_with("BacktestExecutionError: "), "{error}");
    assert!(error.contains("ZeroDivisionError"), "{error}");
    assert!(traceback.contains("strategy line: 10"), "{traceback}");
    assert!(traceback.contains("in Crash.ratio"), "{traceback}");
}

#[test]
fn step_budget_from_settings_bounds_each_bar() {
    let source = "\
class Spin(Strategy):
    def init(self):
        pass

    def next(self):
        total = 0
        for i in range(50000):
            total += i
";
    let settings = RunnerSettings::from_toml("[sandbox]\nstep_budget = 5000\n").unwrap();
    let dir = workdir(&config(), &candles(), Some(source));
    let result = run_in_with(&dir, settings);
    let (error, _) = failure(&result);
    assert!(error.starts_with("BacktestExecutionError"), "{error}");
    assert!(error.contains("StepBudgetExceeded"), "{error}");
}

// ── CSV market data ──

#[test]
fn csv_series_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "config.json", &config().to_string());
    write(dir.path(), STRATEGY_FILE, RSI_STRATEGY);
    let mut csv = String::from("timestamp,open,high,low,close,volume\n");
    for candle in candles().as_array().unwrap() {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            candle["timestamp"], candle["open"], candle["high"], candle["low"], candle["close"],
            candle["volume"]
        ));
    }
    write(dir.path(), "ohlcv.csv", &csv);

    let from_csv = run_in(&dir);
    let from_json = run_in(&workdir(&config(), &candles(), Some(RSI_STRATEGY)));
    assert!(from_csv.is_success());
    let (RunResult::Success { metrics: a, .. }, RunResult::Success { metrics: b, .. }) =
        (&from_csv, &from_json)
    else {
        panic!("both runs should succeed");
    };
    assert_eq!(a.total_trades, b.total_trades);
}
