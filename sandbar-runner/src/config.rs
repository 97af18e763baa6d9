//! Per-run configuration loaded from `config.json` in the working directory.
//!
//! The document is validated eagerly: all four required fields must be
//! present and well-formed before any other stage runs.

use chrono::NaiveDate;
use sandbar_script::ParamValue;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed name of the configuration resource.
pub const CONFIG_FILE: &str = "config.json";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Validated run configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub initial_capital: f64,
    /// Fraction of trade value charged on every fill.
    pub commission: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Overrides for class-level strategy parameters.
    pub parameters: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{CONFIG_FILE} not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {CONFIG_FILE}: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "ConfigNotFound",
            ConfigError::Io { .. } | ConfigError::Parse(_) => "ConfigParseError",
            ConfigError::Validation(_) => "ConfigValidationError",
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

/// Load and validate `config.json` from a working directory.
pub fn load_config(workdir: &Path) -> Result<RunConfig, ConfigError> {
    let path = workdir.join(CONFIG_FILE);
    if !path.is_file() {
        return Err(ConfigError::NotFound(path));
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    RunConfig::from_json(&text)
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_value(&document)
    }

    /// Validate an already-parsed document.
    pub fn from_value(document: &Value) -> Result<Self, ConfigError> {
        let object = document
            .as_object()
            .ok_or_else(|| invalid(format!("{CONFIG_FILE} must contain a JSON object")))?;

        for field in ["initialCapital", "commission", "startDate", "endDate"] {
            if !object.contains_key(field) {
                return Err(invalid(format!("missing required config field: {field}")));
            }
        }

        let initial_capital = number(object, "initialCapital")?;
        if initial_capital <= 0.0 {
            return Err(invalid(format!(
                "initialCapital must be greater than 0, got {initial_capital}"
            )));
        }
        let commission = number(object, "commission")?;
        if !(0.0..1.0).contains(&commission) {
            return Err(invalid(format!(
                "commission must be a fraction in [0, 1), got {commission}"
            )));
        }

        let start_date = date(object, "startDate")?;
        let end_date = date(object, "endDate")?;
        if start_date > end_date {
            return Err(invalid(format!(
                "startDate {start_date} is after endDate {end_date}"
            )));
        }

        Ok(Self {
            initial_capital,
            commission,
            start_date,
            end_date,
            parameters: parameters(object.get("parameters"))?,
        })
    }
}

fn number(object: &Map<String, Value>, field: &str) -> Result<f64, ConfigError> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(format!("{field} must be a number")))
}

fn date(object: &Map<String, Value>, field: &str) -> Result<NaiveDate, ConfigError> {
    let text = object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{field} must be a date string (YYYY-MM-DD)")))?;
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|_| invalid(format!("{field} must be a date in YYYY-MM-DD form, got '{text}'")))
}

fn parameters(value: Option<&Value>) -> Result<BTreeMap<String, ParamValue>, ConfigError> {
    let object = match value {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(object)) => object,
        Some(_) => return Err(invalid("parameters must be an object")),
    };
    object
        .iter()
        .map(|(name, value)| {
            let param = match value {
                Value::Bool(b) => ParamValue::Bool(*b),
                Value::Number(n) => n
                    .as_f64()
                    .map(ParamValue::Number)
                    .ok_or_else(|| invalid(format!("parameters.{name} is out of range")))?,
                Value::String(s) => ParamValue::Str(s.clone()),
                _ => {
                    return Err(invalid(format!(
                        "parameters.{name} must be a number, boolean or string"
                    )))
                }
            };
            Ok((name.clone(), param))
        })
        .collect()
}
