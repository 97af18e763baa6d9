//! Runner settings: operator-side knobs read from an optional TOML file.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields the built-in behaviour.
//!
//! ```toml
//! [sandbox]
//! step_budget = 2000000
//!
//! [report]
//! title = "Nightly RSI run"
//! ```

use sandbar_core::engine::EngineSettings;
use sandbar_core::report::ReportOptions;
use sandbar_script::compiler::DEFAULT_MAX_SOURCE_BYTES;
use sandbar_script::interp::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_STEP_BUDGET};
use sandbar_script::{CompileOptions, Limits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    pub sandbox: SandboxSettings,
    pub engine: EngineToggles,
    pub report: ReportSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSettings {
    pub max_source_bytes: usize,
    /// Interpreter steps per entry point (module body, `init`, each `next`).
    pub step_budget: u64,
    pub max_call_depth: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            step_budget: DEFAULT_STEP_BUDGET,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineToggles {
    pub trade_on_close: bool,
    pub close_open_position_at_end: bool,
}

impl Default for EngineToggles {
    fn default() -> Self {
        Self {
            trade_on_close: false,
            close_open_position_at_end: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportSettings {
    pub title: String,
    pub max_chart_points: usize,
    pub include_trade_table: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        let options = ReportOptions::default();
        Self {
            title: options.title,
            max_chart_points: options.max_chart_points,
            include_trade_table: options.include_trade_table,
        }
    }
}

impl RunnerSettings {
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        if !path.is_file() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sandbox.max_source_bytes == 0 {
            return Err(SettingsError::Invalid("sandbox.max_source_bytes must be positive".into()));
        }
        if self.sandbox.step_budget == 0 {
            return Err(SettingsError::Invalid("sandbox.step_budget must be positive".into()));
        }
        if self.sandbox.max_call_depth == 0 {
            return Err(SettingsError::Invalid("sandbox.max_call_depth must be positive".into()));
        }
        if self.report.max_chart_points < 2 {
            return Err(SettingsError::Invalid("report.max_chart_points must be at least 2".into()));
        }
        Ok(())
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            max_source_bytes: self.sandbox.max_source_bytes,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            step_budget: self.sandbox.step_budget,
            max_call_depth: self.sandbox.max_call_depth,
        }
    }

    /// Engine settings for a run with the given capital and commission.
    pub fn engine_settings(&self, cash: f64, commission: f64) -> EngineSettings {
        EngineSettings {
            trade_on_close: self.engine.trade_on_close,
            close_open_position_at_end: self.engine.close_open_position_at_end,
            ..EngineSettings::new(cash, commission)
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            title: self.report.title.clone(),
            max_chart_points: self.report.max_chart_points,
            include_trade_table: self.report.include_trade_table,
        }
    }
}
