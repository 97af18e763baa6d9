//! The strategy API visible through `self`.
//!
//! `ApiState` is the interpreter's window onto the engine: price columns,
//! the position snapshot for the current bar, and the orders and
//! indicators the script produced. The engine adapter fills it before each
//! call and drains it afterwards; scripts never touch the engine directly.

use crate::error::{ErrorKind, RtResult, RuntimeError};
use crate::interp::Interpreter;
use crate::libs::Args;
use crate::value::{ApiMember, ArrayValue, Value};
use sandbar_core::domain::{BarField, OrderRequest, OrderSide, OrderSize, PendingOrder, PositionSnapshot};
use std::cell::Cell;
use std::rc::Rc;

/// Which part of the strategy lifecycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiPhase {
    #[default]
    Module,
    Init,
    Next,
}

/// An order placed by the script, replayed into the engine after `next`.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderIntent {
    Entry {
        side: OrderSide,
        size: Option<f64>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
    Close(f64),
}

/// Keyword arguments `self.I` consumes for plotting; they carry no meaning here.
const PLOT_KEYWORDS: &[&str] = &["overlay", "color", "plot", "scatter"];

#[derive(Debug, Default)]
pub struct ApiState {
    pub phase: ApiPhase,
    /// Number of visible bars; shared by every engine-fed array.
    pub window: Rc<Cell<usize>>,
    pub columns: Vec<(BarField, Rc<Vec<f64>>)>,
    pub bar_count: usize,
    pub index: usize,
    pub position: PositionSnapshot,
    pub equity: f64,
    pub close: f64,
    pub closed_trades: usize,
    pub orders: Vec<OrderIntent>,
    pub indicators: Vec<(String, Rc<Vec<f64>>)>,
}

impl ApiState {
    /// Number of bars the script may currently see.
    pub fn visible_bars(&self) -> usize {
        self.window.get().min(self.bar_count)
    }

    pub fn column(&self, field: BarField) -> RtResult<ArrayValue> {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(f, data)| ArrayValue::windowed(Rc::clone(data), Rc::clone(&self.window), f.column_name()))
            .ok_or_else(|| RuntimeError::api_error("price data is not available outside init() and next()"))
    }

    /// Engine-owned attributes of the strategy instance.
    pub fn instance_member(&self, name: &str) -> Option<Value> {
        Some(match name {
            "data" => Value::Data,
            "position" => Value::Position,
            "equity" => Value::Number(self.equity),
            "buy" => Value::Api(ApiMember::Buy),
            "sell" => Value::Api(ApiMember::Sell),
            "I" => Value::Api(ApiMember::Indicator),
            "closed_trades" => Value::ClosedTrades,
            _ => return None,
        })
    }

    pub fn position_member(&self, name: &str) -> Option<Value> {
        let p = &self.position;
        Some(match name {
            "size" => Value::Number(p.size),
            "pl" => Value::Number(p.pl),
            "pl_pct" => Value::Number(p.pl_pct),
            "is_long" => Value::Bool(p.is_long()),
            "is_short" => Value::Bool(p.is_short()),
            "close" => Value::Api(ApiMember::ClosePosition),
            _ => return None,
        })
    }
}

fn illegal_order(err: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::new(ErrorKind::IllegalOrder, err.to_string())
}

/// Optional numeric keyword; `None` counts as absent.
fn optional_number(args: &Args, name: &str) -> RtResult<Option<f64>> {
    match args.get(usize::MAX, name) {
        Some(v) => v.expect_number(&format!("{}() argument '{name}'", args.func)).map(Some),
        None => Ok(None),
    }
}

impl Interpreter {
    pub(crate) fn call_api(
        &mut self,
        member: ApiMember,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> RtResult<Value> {
        match member {
            ApiMember::Buy => self.place_entry(OrderSide::Buy, Args::new("buy", positional, keywords)),
            ApiMember::Sell => self.place_entry(OrderSide::Sell, Args::new("sell", positional, keywords)),
            ApiMember::ClosePosition => self.close_position(Args::new("close", positional, keywords)),
            ApiMember::Indicator => self.indicator(positional, keywords),
        }
    }

    fn require_phase(&self, phase: ApiPhase, what: &str) -> RtResult<()> {
        if self.api.phase != phase {
            let place = match phase {
                ApiPhase::Init => "init()",
                ApiPhase::Next => "next()",
                ApiPhase::Module => "module level",
            };
            return Err(RuntimeError::api_error(format!("{what} can only be called from {place}")));
        }
        Ok(())
    }

    /// `self.buy(size=, sl=, tp=)` / `self.sell(...)`, validated against the current close.
    fn place_entry(&mut self, side: OrderSide, args: Args) -> RtResult<Value> {
        self.require_phase(ApiPhase::Next, &format!("self.{}()", args.func))?;
        if !args.positional.is_empty() {
            return Err(RuntimeError::type_error(format!(
                "{}() takes keyword arguments only (size=, sl=, tp=)",
                args.func
            )));
        }
        if args.get(usize::MAX, "limit").is_some() || args.get(usize::MAX, "stop").is_some() {
            return Err(RuntimeError::api_error("limit and stop entry orders are not supported"));
        }
        args.expect_at_most(0, &["size", "sl", "tp", "limit", "stop", "tag"])?;

        let size = optional_number(&args, "size")?;
        let stop_loss = optional_number(&args, "sl")?;
        let take_profit = optional_number(&args, "tp")?;

        let request = OrderRequest {
            side,
            size: match size {
                Some(s) => OrderSize::parse(s).map_err(illegal_order)?,
                None => OrderSize::ALL_IN,
            },
            stop_loss,
            take_profit,
            placed_bar: self.api.index,
        };
        request.validate_brackets(self.api.close).map_err(illegal_order)?;

        self.api.orders.push(OrderIntent::Entry {
            side,
            size,
            stop_loss,
            take_profit,
        });
        Ok(Value::None)
    }

    /// `self.position.close(portion=1.0)`.
    fn close_position(&mut self, args: Args) -> RtResult<Value> {
        self.require_phase(ApiPhase::Next, "self.position.close()")?;
        args.expect_at_most(1, &["portion"])?;
        let portion = args.number_or(0, "portion", 1.0)?;
        PendingOrder::close(portion, self.api.index).map_err(illegal_order)?;
        self.api.orders.push(OrderIntent::Close(portion));
        Ok(Value::None)
    }

    /// `self.I(func, *args, name=None, **kwargs)`: compute and register an indicator.
    fn indicator(&mut self, mut positional: Vec<Value>, keywords: Vec<(String, Value)>) -> RtResult<Value> {
        self.require_phase(ApiPhase::Init, "self.I()")?;
        if positional.is_empty() {
            return Err(RuntimeError::type_error("I() missing required argument 'func'"));
        }
        let func = positional.remove(0);

        let mut name = None;
        let mut forwarded = Vec::with_capacity(keywords.len());
        for (key, value) in keywords {
            match key.as_str() {
                "name" => name = Some(value.to_string()),
                k if PLOT_KEYWORDS.contains(&k) => {}
                _ => forwarded.push((key, value)),
            }
        }
        let name = name.unwrap_or_else(|| indicator_name(&func, &positional));

        let result = self.call(&func, positional, forwarded)?;
        let outputs = match &result {
            Value::Tuple(items) if items.iter().all(|v| matches!(v, Value::Array(_))) => items.to_vec(),
            Value::List(items) if items.borrow().iter().all(|v| matches!(v, Value::Array(_))) => {
                items.borrow().clone()
            }
            _ => vec![result.clone()],
        };

        let many = outputs.len() > 1;
        let mut registered = Vec::with_capacity(outputs.len());
        for (i, output) in outputs.iter().enumerate() {
            let label = if many { format!("{name}[{i}]") } else { name.clone() };
            let values = match output {
                Value::Array(a) => a.values().to_vec(),
                Value::List(_) | Value::Tuple(_) => output.to_f64_vec("indicator values")?,
                other => {
                    return Err(RuntimeError::new(
                        ErrorKind::Indicator,
                        format!("indicator '{label}' must return an array, not {}", other.type_name()),
                    ))
                }
            };
            if values.len() != self.api.bar_count {
                return Err(RuntimeError::new(
                    ErrorKind::Indicator,
                    format!(
                        "indicator '{label}' has length {}, expected {} (one value per bar)",
                        values.len(),
                        self.api.bar_count
                    ),
                ));
            }
            let data = Rc::new(values);
            self.api.indicators.push((label.clone(), Rc::clone(&data)));
            registered.push(Value::Array(ArrayValue::windowed(data, Rc::clone(&self.api.window), &label)));
        }

        Ok(match registered.len() {
            1 => registered.remove(0),
            _ => Value::tuple(registered),
        })
    }
}

/// Default indicator label, e.g. `RSI(Close,14)`.
fn indicator_name(func: &Value, args: &[Value]) -> String {
    let func_name = match func {
        Value::Native(native) => native.name.to_string(),
        Value::Function(f) | Value::BoundMethod(_, f) => f.def.name.clone(),
        other => other.type_name().to_string(),
    };
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| match arg {
            Value::Array(a) => a.label().unwrap_or("array").to_string(),
            other => other.to_string(),
        })
        .collect();
    format!("{func_name}({})", rendered.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::module_member;
    use crate::capabilities::ModuleId;

    fn interp_with_bars(n: usize, phase: ApiPhase) -> Interpreter {
        let mut interp = Interpreter::default();
        let close: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        interp.api.columns = vec![(BarField::Close, Rc::new(close))];
        interp.api.bar_count = n;
        interp.api.window.set(n);
        interp.api.phase = phase;
        interp.api.close = 100.0;
        interp
    }

    #[test]
    fn indicator_registers_full_length_arrays() {
        let mut interp = interp_with_bars(30, ApiPhase::Init);
        let close = Value::Array(interp.api.column(BarField::Close).unwrap());
        let sma = module_member(ModuleId::Talib, "SMA").unwrap();
        let out = interp
            .call_api(ApiMember::Indicator, vec![sma, close, Value::Number(5.0)], Vec::new())
            .unwrap();
        assert!(matches!(out, Value::Array(_)));
        assert_eq!(interp.api.indicators.len(), 1);
        assert_eq!(interp.api.indicators[0].0, "SMA(Close,5)");
    }

    #[test]
    fn indicator_length_is_checked() {
        let mut interp = interp_with_bars(30, ApiPhase::Init);
        let ones = module_member(ModuleId::Numpy, "ones").unwrap();
        let err = interp
            .call_api(ApiMember::Indicator, vec![ones, Value::Number(10.0)], Vec::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Indicator);
        assert!(err.message.contains("length 10, expected 30"));
    }

    #[test]
    fn indicator_outside_init_is_rejected() {
        let mut interp = interp_with_bars(5, ApiPhase::Next);
        let err = interp
            .call_api(ApiMember::Indicator, vec![Value::None], Vec::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Api);
    }

    #[test]
    fn orders_are_validated_when_placed() {
        let mut interp = interp_with_bars(5, ApiPhase::Next);
        let size = |v: f64| vec![("size".to_string(), Value::Number(v))];
        let err = interp.call_api(ApiMember::Buy, Vec::new(), size(1.5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalOrder);

        let sl_above = vec![("sl".to_string(), Value::Number(150.0))];
        let err = interp.call_api(ApiMember::Buy, Vec::new(), sl_above).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalOrder);

        interp.call_api(ApiMember::Sell, Vec::new(), size(0.5)).unwrap();
        assert_eq!(
            interp.api.orders,
            vec![OrderIntent::Entry {
                side: OrderSide::Sell,
                size: Some(0.5),
                stop_loss: None,
                take_profit: None,
            }]
        );
    }

    #[test]
    fn buy_requires_keywords_and_next() {
        let mut interp = interp_with_bars(5, ApiPhase::Next);
        assert!(interp.call_api(ApiMember::Buy, vec![Value::Number(0.5)], Vec::new()).is_err());
        let mut init = interp_with_bars(5, ApiPhase::Init);
        let err = init.call_api(ApiMember::Buy, Vec::new(), Vec::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Api);
    }
}
