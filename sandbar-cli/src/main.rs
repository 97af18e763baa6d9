//! Sandbar CLI — run one sandboxed strategy backtest.
//!
//! `sandbar <WORKDIR>` reads `config.json`, `ohlcv.json` (or `ohlcv.csv`)
//! and `strategy.py` from the working directory. On success the result
//! document is written to stdout and the exit code is 0; on any failure a
//! `{error, traceback}` document is written to stderr and the exit code is 1.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use sandbar_runner::{run_to_result, PipelineError, RunContext, RunResult, RunnerSettings};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Stack for the run thread. Script calls nest interpreter frames inside
/// the bounded expression depth, which needs more than the main thread has.
const RUN_STACK_BYTES: usize = 256 * 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "sandbar",
    version,
    about = "Backtest an untrusted strategy script inside a restricted sandbox"
)]
struct Cli {
    /// Working directory holding config.json, ohlcv.json and strategy.py.
    workdir: PathBuf,

    /// Runner settings file (TOML). Built-in defaults when omitted.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log to stderr: -v info, -vv debug, -vvv trace. Off by default.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => return,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    // Only fails when a subscriber is already installed.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit(result: &RunResult) -> Result<i32> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    result
        .emit(&mut stdout.lock(), &mut stderr.lock())
        .context("failed to write the result document")
}

fn run() -> Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.print().context("failed to print help")?;
            return Ok(0);
        }
        Err(err) => {
            let usage = PipelineError::Usage(err.to_string().trim_end().to_string());
            return emit(&RunResult::failure(&usage));
        }
    };
    init_logging(cli.verbose);

    let settings = match &cli.settings {
        Some(path) => RunnerSettings::from_file(path),
        None => Ok(RunnerSettings::default()),
    };
    let result = match settings {
        Ok(settings) => {
            let mut ctx = RunContext::new(cli.workdir, settings);
            run_to_result(&mut ctx)
        }
        Err(err) => RunResult::failure(&PipelineError::from(err)),
    };
    emit(&result)
}

fn run_on_large_stack() -> Result<i32> {
    let handle = thread::Builder::new()
        .name("sandbar-run".into())
        .stack_size(RUN_STACK_BYTES)
        .spawn(run)
        .context("failed to start the run thread")?;
    match handle.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("the run thread panicked"),
    }
}

fn main() -> ExitCode {
    match run_on_large_stack() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
