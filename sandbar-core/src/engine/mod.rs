//! Backtesting engine — single-instrument bar loop driving a `Strategy`.
//!
//! The engine owns cash and the net position; a strategy only sees the
//! current bar and places market orders (optionally bracketed with a
//! stop-loss and take-profit). See `loop_runner` for the per-bar phases.

pub mod broker;
pub mod loop_runner;
pub mod state;
pub mod strategy;

pub use broker::{Broker, FillPoint};
pub use loop_runner::run_backtest;
pub use state::{BacktestOutcome, EngineSettings};
pub use strategy::{BarContext, InitContext, Strategy, StrategyError};

use std::fmt;
use thiserror::Error;

/// Strategy phase in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Next,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "init()"),
            Phase::Next => write!(f, "next()"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine settings: {0}")]
    InvalidSettings(String),

    #[error("no bars to backtest")]
    NoData,

    #[error("strategy failed in {phase}{}: {source}", bar_suffix(.bar))]
    Strategy {
        phase: Phase,
        bar: Option<usize>,
        #[source]
        source: StrategyError,
    },
}

fn bar_suffix(bar: &Option<usize>) -> String {
    bar.map(|b| format!(" at bar {b}")).unwrap_or_default()
}
