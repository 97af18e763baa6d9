use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of the net position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

/// Net position tracking. `quantity` is signed: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub entry_bar: usize,
    pub entry_time: DateTime<Utc>,
    /// Commission paid on entry fills not yet attributed to a closed trade.
    pub entry_commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Position {
    pub fn side(&self) -> PositionSide {
        if self.quantity > 0.0 {
            PositionSide::Long
        } else if self.quantity < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn market_value(&self, current_price: f64) -> f64 {
        self.quantity * current_price
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.quantity * (current_price - self.avg_entry_price)
    }

    /// Unrealized return relative to entry cost, as a fraction.
    pub fn unrealized_pct(&self, current_price: f64) -> f64 {
        let cost = self.quantity.abs() * self.avg_entry_price;
        if cost == 0.0 {
            return 0.0;
        }
        self.unrealized_pnl(current_price) / cost
    }
}

/// Read-only view of the position handed to strategies.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Signed units; 0 when flat.
    pub size: f64,
    /// Unrealized profit/loss in cash.
    pub pl: f64,
    /// Unrealized profit/loss in percent of entry cost.
    pub pl_pct: f64,
}

impl PositionSnapshot {
    pub fn of(position: Option<&Position>, price: f64) -> Self {
        match position {
            Some(p) => Self {
                size: p.quantity,
                pl: p.unrealized_pnl(price),
                pl_pct: p.unrealized_pct(price) * 100.0,
            },
            None => Self::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.size != 0.0
    }

    pub fn is_long(&self) -> bool {
        self.size > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.size < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(quantity: f64) -> Position {
        Position {
            quantity,
            avg_entry_price: 100.0,
            entry_bar: 0,
            entry_time: DateTime::from_timestamp(0, 0).unwrap(),
            entry_commission: 0.0,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn side_from_quantity_sign() {
        assert_eq!(long(5.0).side(), PositionSide::Long);
        assert_eq!(long(-5.0).side(), PositionSide::Short);
        assert_eq!(long(0.0).side(), PositionSide::Flat);
    }

    #[test]
    fn short_profits_when_price_falls() {
        let p = long(-10.0);
        assert_eq!(p.unrealized_pnl(90.0), 100.0);
        assert!((p.unrealized_pct(90.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn snapshot_of_flat_is_closed() {
        let snap = PositionSnapshot::of(None, 100.0);
        assert!(!snap.is_open());
        assert_eq!(snap.pl, 0.0);
    }

    #[test]
    fn snapshot_reports_percent() {
        let snap = PositionSnapshot::of(Some(&long(10.0)), 110.0);
        assert!(snap.is_long());
        assert_eq!(snap.pl, 100.0);
        assert!((snap.pl_pct - 10.0).abs() < 1e-9);
    }
}
