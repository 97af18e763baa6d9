//! Market data loading: raw candle records from the working directory.
//!
//! `ohlcv.json` (an array of candle objects) is the primary resource. When
//! it is absent, `ohlcv.csv` with a header row is read into the same raw
//! shape. Records are returned in source order; nothing is sorted,
//! deduplicated or gap-filled here.

use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const OHLCV_JSON: &str = "ohlcv.json";
pub const OHLCV_CSV: &str = "ohlcv.csv";

#[derive(Debug, Error)]
pub enum DataError {
    #[error("{OHLCV_JSON} not found in {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {OHLCV_JSON}: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CSV in {OHLCV_CSV}: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Validation(String),
}

impl DataError {
    pub fn kind(&self) -> &'static str {
        match self {
            DataError::NotFound(_) => "DataNotFound",
            DataError::Io { .. } | DataError::Json(_) | DataError::Csv(_) => "DataParseError",
            DataError::Validation(_) => "DataValidationError",
        }
    }
}

/// Where a series was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Json,
    Csv,
}

/// Non-empty, ordered sequence of raw candle records.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Value>,
    source: DataSource,
}

impl CandleSeries {
    pub fn new(candles: Vec<Value>, source: DataSource) -> Result<Self, DataError> {
        if candles.is_empty() {
            return Err(empty_series());
        }
        Ok(Self { candles, source })
    }

    /// Interpret a parsed JSON document as a candle series.
    pub fn from_json_value(document: Value) -> Result<Self, DataError> {
        match document {
            Value::Array(candles) => Self::new(candles, DataSource::Json),
            _ => Err(empty_series()),
        }
    }

    pub fn candles(&self) -> &[Value] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn source(&self) -> DataSource {
        self.source
    }
}

fn empty_series() -> DataError {
    DataError::Validation(format!(
        "{OHLCV_JSON} must contain a non-empty array of OHLCV candles"
    ))
}

fn read(path: &Path) -> Result<String, DataError> {
    std::fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the candle series from a working directory.
pub fn load_market_data(workdir: &Path) -> Result<CandleSeries, DataError> {
    let json_path = workdir.join(OHLCV_JSON);
    if json_path.is_file() {
        let document: Value = serde_json::from_str(&read(&json_path)?)?;
        return CandleSeries::from_json_value(document);
    }

    let csv_path = workdir.join(OHLCV_CSV);
    if csv_path.is_file() {
        tracing::debug!(path = %csv_path.display(), "{OHLCV_JSON} absent, reading CSV");
        return parse_csv(&read(&csv_path)?);
    }

    Err(DataError::NotFound(workdir.to_path_buf()))
}

/// Parse CSV text with a header row into raw candle records.
///
/// Numeric cells become JSON numbers, other cells stay strings, and empty
/// cells are omitted so optional columns fall back to their defaults.
pub fn parse_csv(text: &str) -> Result<CandleSeries, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut candles = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut candle = Map::new();
        for (name, cell) in headers.iter().zip(record.iter()) {
            if cell.is_empty() {
                continue;
            }
            candle.insert(name.to_string(), cell_value(cell));
        }
        candles.push(Value::Object(candle));
    }

    if candles.is_empty() {
        return Err(DataError::Validation(format!(
            "{OHLCV_CSV} must contain at least one candle row"
        )));
    }
    CandleSeries::new(candles, DataSource::Csv)
}

fn cell_value(cell: &str) -> Value {
    if let Ok(n) = cell.parse::<i64>() {
        return Value::Number(n.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}
