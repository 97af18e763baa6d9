//! Order requests placed by a strategy during its per-bar decision step.
//!
//! Orders are market orders: they fill at the next bar's open (or at the
//! current close when the engine trades on close). An entry may carry a
//! stop-loss and a take-profit bracket that the engine checks intrabar.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

/// Errors for orders the engine refuses outright.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("order size must be a positive fraction of equity (0 < size < 1) or a positive whole number of units, got {0}")]
    InvalidSize(f64),

    #[error("close portion must be in (0, 1], got {0}")]
    InvalidPortion(f64),

    #[error("{side:?} order requires {bound} ({level}) on the {expected} side of the fill price {price}")]
    InvalidBracket {
        side: OrderSide,
        bound: &'static str,
        level: f64,
        expected: &'static str,
        price: f64,
    },
}

/// Validated order size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderSize {
    /// Fraction of available equity, strictly between 0 and 1.
    Fraction(f64),
    /// Absolute number of whole units.
    Units(f64),
}

impl OrderSize {
    /// Default size: (almost) all available equity.
    pub const ALL_IN: OrderSize = OrderSize::Fraction(1.0 - f64::EPSILON);

    /// Interpret a strategy-supplied size.
    pub fn parse(size: f64) -> Result<Self, OrderError> {
        if !size.is_finite() || size <= 0.0 {
            return Err(OrderError::InvalidSize(size));
        }
        if size < 1.0 {
            return Ok(OrderSize::Fraction(size));
        }
        if size.fract() != 0.0 {
            return Err(OrderError::InvalidSize(size));
        }
        Ok(OrderSize::Units(size))
    }
}

/// A market order with optional bracket levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub size: OrderSize,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Bar during which the strategy placed the order.
    pub placed_bar: usize,
}

impl OrderRequest {
    /// Check bracket levels against the price the order fills at.
    ///
    /// Long entries need `stop_loss < price < take_profit`; shorts the reverse.
    pub fn validate_brackets(&self, price: f64) -> Result<(), OrderError> {
        let (sl_side, tp_side) = match self.side {
            OrderSide::Buy => ("lower", "upper"),
            OrderSide::Sell => ("upper", "lower"),
        };
        if let Some(sl) = self.stop_loss {
            let ok = match self.side {
                OrderSide::Buy => sl < price,
                OrderSide::Sell => sl > price,
            };
            if !ok || !sl.is_finite() {
                return Err(OrderError::InvalidBracket {
                    side: self.side,
                    bound: "stop-loss",
                    level: sl,
                    expected: sl_side,
                    price,
                });
            }
        }
        if let Some(tp) = self.take_profit {
            let ok = match self.side {
                OrderSide::Buy => tp > price,
                OrderSide::Sell => tp < price,
            };
            if !ok || !tp.is_finite() {
                return Err(OrderError::InvalidBracket {
                    side: self.side,
                    bound: "take-profit",
                    level: tp,
                    expected: tp_side,
                    price,
                });
            }
        }
        Ok(())
    }
}

/// Work queued for the engine's next fill point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingOrder {
    Entry(OrderRequest),
    /// Close `portion` (0, 1] of the open position.
    Close { portion: f64, placed_bar: usize },
}

impl PendingOrder {
    pub fn close(portion: f64, placed_bar: usize) -> Result<Self, OrderError> {
        if !portion.is_finite() || portion <= 0.0 || portion > 1.0 {
            return Err(OrderError::InvalidPortion(portion));
        }
        Ok(PendingOrder::Close {
            portion,
            placed_bar,
        })
    }
}
