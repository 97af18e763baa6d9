//! Pipeline errors: every stage failure converges here and maps onto one
//! taxonomy kind.

use crate::backtest::BacktestError;
use crate::config::ConfigError;
use crate::market_data::DataError;
use crate::series::ConversionError;
use crate::settings::SettingsError;
use sandbar_script::{CompileError, ContractError, RuntimeError};
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Settings,
    Config,
    MarketData,
    Series,
    StrategySource,
    Compile,
    Execute,
    Backtest,
    Metrics,
    Report,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Settings => "settings",
            Stage::Config => "config",
            Stage::MarketData => "market data",
            Stage::Series => "series adaptation",
            Stage::StrategySource => "strategy source",
            Stage::Compile => "compile",
            Stage::Execute => "execute",
            Stage::Backtest => "backtest",
            Stage::Metrics => "metrics",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("strategy.py not found at {}", .0.display())]
    StrategySourceNotFound(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    StrategySource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("{0}")]
    Usage(String),
}

impl PipelineError {
    /// Taxonomy name used as the prefix of the failure message.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Settings(_) => "SettingsError",
            PipelineError::Config(e) => e.kind(),
            PipelineError::Data(e) => e.kind(),
            PipelineError::Conversion(_) => "ConversionError",
            PipelineError::StrategySourceNotFound(_) => "StrategySourceNotFound",
            PipelineError::StrategySource { .. } | PipelineError::Compile(_) => "SandboxCompileError",
            PipelineError::Contract(_) => "StrategyContractError",
            PipelineError::Backtest(_) => "BacktestExecutionError",
            PipelineError::Usage(_) => "UsageError",
        }
    }

    /// Stage the failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Settings(_) | PipelineError::Usage(_) => Stage::Settings,
            PipelineError::Config(_) => Stage::Config,
            PipelineError::Data(_) => Stage::MarketData,
            PipelineError::Conversion(_) => Stage::Series,
            PipelineError::StrategySourceNotFound(_) | PipelineError::StrategySource { .. } => {
                Stage::StrategySource
            }
            PipelineError::Compile(_) => Stage::Compile,
            PipelineError::Contract(_) => Stage::Execute,
            PipelineError::Backtest(_) => Stage::Backtest,
        }
    }

    /// `"<Kind>: <message>"`.
    pub fn message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    fn script_error(&self) -> Option<&RuntimeError> {
        match self {
            PipelineError::Backtest(e) => e.script_error(),
            PipelineError::Contract(ContractError::Module(e)) => Some(e),
            _ => None,
        }
    }

    /// The failing stage, the chain of underlying causes and, for script
    /// failures, the script calls that were active.
    pub fn traceback(&self) -> String {
        let mut lines = vec![format!("stage: {}", self.stage())];
        lines.push(format!("{}: {}", self.kind(), self));

        let mut cause = self.source();
        // Transparent variants report their inner error's source; skip any
        // cause whose text the previous line already carries.
        let mut previous = self.to_string();
        while let Some(err) = cause {
            let text = err.to_string();
            if !previous.contains(&text) {
                lines.push(format!("caused by: {text}"));
            }
            previous = text;
            cause = err.source();
        }

        if let Some(script) = self.script_error() {
            if let Some(line) = script.line {
                lines.push(format!("strategy line: {line}"));
            }
            for frame in &script.trace {
                lines.push(format!("  in {frame}"));
            }
        }
        lines.join("\n")
    }
}
