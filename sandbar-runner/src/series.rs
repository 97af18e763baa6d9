//! Series adaptation: raw candle records to the engine's price table.
//!
//! The conversion is pure. Each candle's integer `timestamp` (seconds) is
//! multiplied by 1000 and stored as a millisecond `Datetime` index; price
//! columns are named the way strategies read them (`Open`, `High`, `Low`,
//! `Close`, `Volume`).

use crate::market_data::CandleSeries;
use chrono::DateTime;
use polars::prelude::*;
use sandbar_core::domain::{Bar, BarField};
use serde_json::{Map, Value};
use thiserror::Error;

pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Candle keys of the required price fields, in column order.
const PRICE_KEYS: [&str; 4] = ["open", "high", "low", "close"];

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("failed to convert candle {index}: {reason}")]
    Candle { index: usize, reason: String },

    #[error("failed to build price table: {0}")]
    Table(#[from] PolarsError),
}

fn bad_candle(index: usize, reason: impl Into<String>) -> ConversionError {
    ConversionError::Candle {
        index,
        reason: reason.into(),
    }
}

/// One row per candle, indexed by a millisecond timestamp. Never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct PriceTable {
    frame: DataFrame,
}

impl PartialEq for PriceTable {
    fn eq(&self, other: &Self) -> bool {
        self.frame.equals_missing(&other.frame)
    }
}

#[derive(Default)]
struct Columns {
    millis: Vec<i64>,
    prices: [Vec<f64>; 4],
    volume: Vec<f64>,
}

/// Convert a candle series into a price table.
pub fn adapt(series: &CandleSeries) -> Result<PriceTable, ConversionError> {
    let mut columns = Columns::default();
    for (index, candle) in series.candles().iter().enumerate() {
        let object = candle
            .as_object()
            .ok_or_else(|| bad_candle(index, "candle is not an object"))?;

        let seconds = timestamp_seconds(object).map_err(|reason| bad_candle(index, reason))?;
        let millis = seconds
            .checked_mul(1000)
            .filter(|ms| DateTime::from_timestamp_millis(*ms).is_some())
            .ok_or_else(|| bad_candle(index, format!("timestamp {seconds} is out of range")))?;
        columns.millis.push(millis);

        for (slot, key) in PRICE_KEYS.into_iter().enumerate() {
            let value = object
                .get(key)
                .ok_or_else(|| bad_candle(index, format!("missing field '{key}'")))?;
            columns.prices[slot].push(numeric(value, key).map_err(|r| bad_candle(index, r))?);
        }

        let volume = match object.get("volume") {
            None | Some(Value::Null) => 0.0,
            Some(value) => numeric(value, "volume").map_err(|r| bad_candle(index, r))?,
        };
        columns.volume.push(volume);
    }

    let Columns {
        millis,
        prices: [open, high, low, close],
        volume,
    } = columns;
    let frame = DataFrame::new(vec![
        Column::new(TIMESTAMP_COLUMN.into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        Column::new(BarField::Open.column_name().into(), open),
        Column::new(BarField::High.column_name().into(), high),
        Column::new(BarField::Low.column_name().into(), low),
        Column::new(BarField::Close.column_name().into(), close),
        Column::new(BarField::Volume.column_name().into(), volume),
    ])?;
    Ok(PriceTable { frame })
}

fn timestamp_seconds(object: &Map<String, Value>) -> Result<i64, String> {
    let value = object
        .get(TIMESTAMP_COLUMN)
        .ok_or_else(|| format!("missing field '{TIMESTAMP_COLUMN}'"))?;
    let Value::Number(n) = value else {
        return Err(format!("field '{TIMESTAMP_COLUMN}' is not a number"));
    };
    if let Some(seconds) = n.as_i64() {
        return Ok(seconds);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Ok(f as i64),
        _ => Err(format!("field '{TIMESTAMP_COLUMN}' is not an integer number of seconds")),
    }
}

fn numeric(value: &Value, key: &str) -> Result<f64, String> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("field '{key}' is not numeric ({value})"))
}

impl PriceTable {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Millisecond timestamps of the index, in row order.
    pub fn timestamps_ms(&self) -> Result<Vec<i64>, ConversionError> {
        let index = self.frame.column(TIMESTAMP_COLUMN)?.cast(&DataType::Int64)?;
        Ok(index.i64()?.into_no_null_iter().collect())
    }

    fn values(&self, field: BarField) -> Result<Vec<f64>, ConversionError> {
        let column = self.frame.column(field.column_name())?;
        Ok(column.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// Rows as engine bars.
    pub fn to_bars(&self) -> Result<Vec<Bar>, ConversionError> {
        let millis = self.timestamps_ms()?;
        let open = self.values(BarField::Open)?;
        let high = self.values(BarField::High)?;
        let low = self.values(BarField::Low)?;
        let close = self.values(BarField::Close)?;
        let volume = self.values(BarField::Volume)?;

        millis
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                let timestamp = DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| bad_candle(i, format!("timestamp {ms} ms is out of range")))?;
                Ok(Bar {
                    timestamp,
                    open: open[i],
                    high: high[i],
                    low: low[i],
                    close: close[i],
                    volume: volume[i],
                })
            })
            .collect()
    }
}
