//! Cash, net position, order queue and closed-trade ledger.
//!
//! The broker holds at most one net position. Fills are immediate at the
//! price the loop hands in; commission is a fixed fraction of notional,
//! charged on every fill (entry and exit).

use crate::domain::{
    Bar, ExitReason, OrderRequest, OrderSide, OrderSize, PendingOrder, Position, PositionSide,
    TradeRecord,
};
use chrono::{DateTime, Utc};

/// Where a fill happens.
#[derive(Debug, Clone, Copy)]
pub struct FillPoint {
    pub bar: usize,
    pub time: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct Broker {
    cash: f64,
    commission_rate: f64,
    commission_paid: f64,
    position: Option<Position>,
    pending: Vec<PendingOrder>,
    trades: Vec<TradeRecord>,
    cancelled: usize,
}

impl Broker {
    pub fn new(cash: f64, commission_rate: f64) -> Self {
        Self {
            cash,
            commission_rate,
            commission_paid: 0.0,
            position: None,
            pending: Vec::new(),
            trades: Vec::new(),
            cancelled: 0,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<TradeRecord> {
        self.trades
    }

    pub fn commission_paid(&self) -> f64 {
        self.commission_paid
    }

    /// Orders refused at fill time (zero units or not enough cash).
    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    /// Cash plus signed position value.
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.position.as_ref().map_or(0.0, |p| p.market_value(price))
    }

    pub fn queue(&mut self, order: PendingOrder) {
        self.pending.push(order);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Discard every queued order, returning how many there were.
    pub fn drop_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Fill all queued orders, in submission order, at `at`.
    pub fn fill_pending(&mut self, at: FillPoint) {
        let orders = std::mem::take(&mut self.pending);
        for order in orders {
            match order {
                PendingOrder::Entry(request) => self.enter(&request, at),
                PendingOrder::Close { portion, .. } => {
                    self.close(portion, at, ExitReason::Signal);
                }
            }
        }
    }

    // ─── Entries ─────────────────────────────────────────────────────

    fn enter(&mut self, request: &OrderRequest, at: FillPoint) {
        let reversing = match (&self.position, request.side) {
            (Some(p), OrderSide::Buy) => p.is_short(),
            (Some(p), OrderSide::Sell) => p.is_long(),
            (None, _) => false,
        };
        if reversing {
            self.close(1.0, at, ExitReason::Signal);
        }

        let price = at.price;
        let held = self.position.as_ref().map_or(0.0, |p| p.quantity.abs());
        let available = self.equity(price) - held * price;
        let unit_cost = price * (1.0 + self.commission_rate);

        let units = match request.size {
            OrderSize::Fraction(f) => (available * f / unit_cost).floor(),
            OrderSize::Units(u) => u,
        };

        if units < 1.0 {
            self.cancelled += 1;
            tracing::info!(bar = at.bar, price, "order cancelled: size rounds to zero units");
            return;
        }
        if units * unit_cost > available {
            self.cancelled += 1;
            tracing::info!(
                bar = at.bar,
                units,
                available,
                "order cancelled: insufficient cash"
            );
            return;
        }

        let commission = units * price * self.commission_rate;
        self.commission_paid += commission;
        self.cash -= request.side.sign() * units * price + commission;
        let signed = request.side.sign() * units;

        match self.position.as_mut() {
            Some(pos) => {
                let total = pos.quantity + signed;
                pos.avg_entry_price =
                    (pos.avg_entry_price * pos.quantity + price * signed) / total;
                pos.quantity = total;
                pos.entry_commission += commission;
                if request.stop_loss.is_some() {
                    pos.stop_loss = request.stop_loss;
                }
                if request.take_profit.is_some() {
                    pos.take_profit = request.take_profit;
                }
            }
            None => {
                self.position = Some(Position {
                    quantity: signed,
                    avg_entry_price: price,
                    entry_bar: at.bar,
                    entry_time: at.time,
                    entry_commission: commission,
                    stop_loss: request.stop_loss,
                    take_profit: request.take_profit,
                });
            }
        }
        tracing::debug!(bar = at.bar, side = ?request.side, units, price, "entry filled");
    }

    // ─── Exits ───────────────────────────────────────────────────────

    /// Close `portion` of the position at `at`. Returns the closed trade.
    pub fn close(&mut self, portion: f64, at: FillPoint, reason: ExitReason) -> Option<&TradeRecord> {
        let pos = self.position.as_mut()?;
        let held = pos.quantity.abs();
        let units = if portion >= 1.0 {
            held
        } else {
            (held * portion).round().max(1.0).min(held)
        };
        let direction = pos.quantity.signum();
        let price = at.price;

        let exit_commission = units * price * self.commission_rate;
        let entry_share = pos.entry_commission * units / held;
        let gross_pnl = direction * units * (price - pos.avg_entry_price);

        self.cash += direction * units * price - exit_commission;
        self.commission_paid += exit_commission;

        let record = TradeRecord {
            side: if direction > 0.0 {
                PositionSide::Long
            } else {
                PositionSide::Short
            },
            entry_bar: pos.entry_bar,
            entry_time: pos.entry_time,
            entry_price: pos.avg_entry_price,
            exit_bar: at.bar,
            exit_time: at.time,
            exit_price: price,
            exit_reason: reason,
            quantity: units,
            gross_pnl,
            commission: entry_share + exit_commission,
            net_pnl: gross_pnl - entry_share - exit_commission,
            bars_held: at.bar.saturating_sub(pos.entry_bar),
        };

        if units >= held {
            self.position = None;
        } else {
            pos.quantity -= direction * units;
            pos.entry_commission -= entry_share;
        }
        tracing::debug!(bar = at.bar, ?reason, units, price, "position closed");

        self.trades.push(record);
        self.trades.last()
    }

    /// Check the position's stop-loss and take-profit against a bar's range.
    ///
    /// The stop is checked first. A bar that opens beyond a level fills at
    /// the open instead of the level.
    pub fn check_brackets(&mut self, bar: &Bar, index: usize) -> Option<ExitReason> {
        let pos = self.position.as_ref()?;
        let long = pos.is_long();

        let stop_fill = pos.stop_loss.and_then(|sl| {
            if long && bar.low <= sl {
                Some(bar.open.min(sl))
            } else if !long && bar.high >= sl {
                Some(bar.open.max(sl))
            } else {
                None
            }
        });
        let target_fill = pos.take_profit.and_then(|tp| {
            if long && bar.high >= tp {
                Some(bar.open.max(tp))
            } else if !long && bar.low <= tp {
                Some(bar.open.min(tp))
            } else {
                None
            }
        });

        let (price, reason) = match (stop_fill, target_fill) {
            (Some(p), _) => (p, ExitReason::StopLoss),
            (None, Some(p)) => (p, ExitReason::TakeProfit),
            (None, None) => return None,
        };
        self.close(
            1.0,
            FillPoint {
                bar: index,
                time: bar.timestamp,
                price,
            },
            reason,
        );
        Some(reason)
    }
}
