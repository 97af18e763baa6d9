//! Process-level tests of the `sandbar` binary: exit codes and which
//! stream carries the result document.

use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};

const STRATEGY: &str = "\
from backtesting import Strategy
from backtesting.lib import crossover
import talib

class SmaCross(Strategy):
    fast = 5
    slow = 15

    def init(self):
        self.fast_ma = self.I(talib.SMA, self.data.Close, self.fast)
        self.slow_ma = self.I(talib.SMA, self.data.Close, self.slow)

    def next(self):
        if crossover(self.fast_ma, self.slow_ma):
            self.buy()
        elif crossover(self.slow_ma, self.fast_ma):
            self.position.close()
";

fn prepare(dir: &Path, strategy: &str) {
    let config = json!({
        "initialCapital": 10000,
        "commission": 0.002,
        "startDate": "2020-01-01",
        "endDate": "2020-06-30"
    });
    let candles: Vec<Value> = (0..180i64)
        .map(|i| {
            let close = 50.0 + 5.0 * (i as f64 / 9.0).sin();
            json!({
                "timestamp": 1_577_836_800 + i * 86_400,
                "open": close, "high": close + 0.5, "low": close - 0.5, "close": close
            })
        })
        .collect();
    std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
    std::fs::write(dir.join("ohlcv.json"), Value::Array(candles).to_string()).unwrap();
    std::fs::write(dir.join("strategy.py"), strategy).unwrap();
}

fn sandbar(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sandbar"))
        .args(args)
        .output()
        .unwrap()
}

fn stderr_document(output: &Output) -> Value {
    serde_json::from_slice(&output.stderr).unwrap()
}

#[test]
fn success_writes_json_to_stdout_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    prepare(dir.path(), STRATEGY);
    let output = sandbar(&[dir.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stderr.is_empty(), "{}", String::from_utf8_lossy(&output.stderr));
    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(doc["html_report"].as_str().unwrap().contains("SmaCross"));
    assert!(doc["metrics"]["total_trades"].as_u64().is_some());
}

#[test]
fn rejected_strategy_writes_json_to_stderr_and_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    prepare(dir.path(), &format!("import subprocess\n{STRATEGY}"));
    let output = sandbar(&[dir.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let doc = stderr_document(&output);
    assert!(doc["error"].as_str().unwrap().starts_with("SandboxCompileError"));
    assert!(doc["traceback"].as_str().unwrap().contains("stage: compile"));
}

#[test]
fn bad_settings_file_is_a_failure_document() {
    let dir = tempfile::tempdir().unwrap();
    prepare(dir.path(), STRATEGY);
    let settings = dir.path().join("sandbar.toml");
    std::fs::write(&settings, "[sandbox]\nstep_budget = \"lots\"\n").unwrap();
    let output = sandbar(&[
        dir.path().to_str().unwrap(),
        "--settings",
        settings.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let doc = stderr_document(&output);
    assert!(doc["error"].as_str().unwrap().starts_with("SettingsError"));
}

#[test]
fn missing_workdir_argument_is_a_usage_failure() {
    let output = sandbar(&[]);
    assert_eq!(output.status.code(), Some(1));
    let doc = stderr_document(&output);
    assert!(doc["error"].as_str().unwrap().starts_with("UsageError"));
}

#[test]
fn help_exits_zero() {
    let output = sandbar(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("WORKDIR"));
}

#[test]
fn logging_stays_off_without_verbose_flag() {
    let dir = tempfile::tempdir().unwrap();
    prepare(dir.path(), "class Lonely:\n    def init(self):\n        pass\n    def next(self):\n        pass\n");
    let output = sandbar(&[dir.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    // The whole of stderr must be the one failure document.
    let doc = stderr_document(&output);
    assert!(doc["error"].as_str().unwrap().starts_with("StrategyContractError"));
}

#[test]
fn deeply_nested_source_is_a_compile_failure() {
    let depth = 20_000;
    let sources = [
        format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth)),
        format!("x = {}\n", vec!["1"; 60_000].join("+")),
        format!("x = {}1\n", "not ".repeat(30_000)),
    ];
    for source in sources {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path(), &source);
        let output = sandbar(&[dir.path().to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(1));
        assert!(output.stdout.is_empty());
        let doc = stderr_document(&output);
        assert!(doc["error"].as_str().unwrap().starts_with("SandboxCompileError"));
        assert!(doc["error"].as_str().unwrap().contains("too many nested"));
    }
}

#[test]
fn runaway_concatenation_is_a_backtest_failure() {
    let dir = tempfile::tempdir().unwrap();
    let strategy = "\
class Grow(Strategy):
    def init(self):
        pass

    def next(self):
        s = 'a'
        for i in range(40):
            s = s + s
";
    prepare(dir.path(), strategy);
    let output = sandbar(&[dir.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let doc = stderr_document(&output);
    assert!(doc["error"].as_str().unwrap().contains("MemoryError"), "{doc}");
}
