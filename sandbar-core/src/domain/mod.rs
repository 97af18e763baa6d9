//! Domain types for the engine.

pub mod bar;
pub mod order;
pub mod position;
pub mod trade;

pub use bar::{column, Bar, BarField};
pub use order::{OrderError, OrderRequest, OrderSide, OrderSize, PendingOrder};
pub use position::{Position, PositionSide, PositionSnapshot};
pub use trade::{ExitReason, TradeRecord};
