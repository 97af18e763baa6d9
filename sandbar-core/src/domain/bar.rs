//! Bar — the fundamental market data unit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar at a single instant.
///
/// The timestamp is the bar's index in the price table (millisecond
/// resolution). Bars are consumed in the order they are given; the engine
/// never re-sorts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Calendar day (UTC) the bar belongs to.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }
}

/// Extract one price column from a bar slice.
pub fn column(bars: &[Bar], field: BarField) -> Vec<f64> {
    bars.iter().map(|b| field.of(b)).collect()
}

/// The numeric columns of a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl BarField {
    pub fn of(self, bar: &Bar) -> f64 {
        match self {
            BarField::Open => bar.open,
            BarField::High => bar.high,
            BarField::Low => bar.low,
            BarField::Close => bar.close,
            BarField::Volume => bar.volume,
        }
    }

    /// Column name as exposed to strategies (`self.data.Close`).
    pub fn column_name(self) -> &'static str {
        match self {
            BarField::Open => "Open",
            BarField::High => "High",
            BarField::Low => "Low",
            BarField::Close => "Close",
            BarField::Volume => "Volume",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        match name {
            "Open" => Some(BarField::Open),
            "High" => Some(BarField::High),
            "Low" => Some(BarField::Low),
            "Close" => Some(BarField::Close),
            "Volume" => Some(BarField::Volume),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> Bar {
        Bar {
            timestamp: DateTime::from_timestamp(1_577_836_800, 0).unwrap(),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn bar_detects_void() {
        let mut bar = sample_bar();
        bar.open = f64::NAN;
        assert!(bar.is_void());
        assert!(!bar.is_sane());
    }

    #[test]
    fn bar_detects_insane_high_low() {
        let mut bar = sample_bar();
        bar.high = 97.0; // below low
        assert!(!bar.is_sane());
    }

    #[test]
    fn bar_day_is_utc_date() {
        assert_eq!(
            sample_bar().day(),
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
    }

    #[test]
    fn field_names_roundtrip() {
        for field in [
            BarField::Open,
            BarField::High,
            BarField::Low,
            BarField::Close,
            BarField::Volume,
        ] {
            assert_eq!(BarField::from_column_name(field.column_name()), Some(field));
        }
        assert_eq!(BarField::from_column_name("close"), None);
    }

    #[test]
    fn column_extracts_in_order() {
        let mut second = sample_bar();
        second.close = 110.0;
        let closes = column(&[sample_bar(), second], BarField::Close);
        assert_eq!(closes, vec![103.0, 110.0]);
    }
}
