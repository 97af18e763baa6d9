//! Engine adapter: drives a script's `init`/`next` from the bar loop.

use crate::api::{ApiPhase, OrderIntent};
use crate::error::RuntimeError;
use crate::executor::StrategyDefinition;
use crate::interp::Interpreter;
use crate::value::Instance;
use sandbar_core::domain::{column, BarField, OrderSide};
use sandbar_core::engine::{BarContext, InitContext, Strategy, StrategyError};
use std::rc::Rc;

const FIELDS: [BarField; 5] = [
    BarField::Open,
    BarField::High,
    BarField::Low,
    BarField::Close,
    BarField::Volume,
];

/// A loaded script strategy bound to one interpreter and one instance.
pub struct ScriptStrategy {
    name: String,
    interp: Interpreter,
    instance: Rc<Instance>,
    initial_cash: f64,
}

impl ScriptStrategy {
    pub fn new(definition: &StrategyDefinition, initial_cash: f64) -> Self {
        let (interp, instance) = definition.instantiate();
        Self {
            name: definition.name().to_string(),
            interp,
            instance,
            initial_cash,
        }
    }

    /// Steps the last `init`/`next` call consumed.
    pub fn steps_used(&self) -> u64 {
        self.interp.steps_used()
    }
}

fn runtime(err: RuntimeError) -> StrategyError {
    StrategyError::Runtime(Box::new(err))
}

impl Strategy for ScriptStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), StrategyError> {
        let bars = ctx.bars();
        let api = &mut self.interp.api;
        api.columns = FIELDS
            .iter()
            .map(|&field| (field, Rc::new(column(bars, field))))
            .collect();
        api.bar_count = bars.len();
        api.window.set(bars.len());
        api.index = 0;
        api.equity = self.initial_cash;
        api.close = bars.first().map_or(f64::NAN, |b| b.close);
        api.phase = ApiPhase::Init;

        self.interp.reset_budget();
        let result = self.interp.call_method(&self.instance, "init");
        self.interp.api.phase = ApiPhase::Module;
        result.map_err(runtime)?;

        for (name, values) in &self.interp.api.indicators {
            ctx.register_indicator(name, values)?;
        }
        Ok(())
    }

    fn next(&mut self, ctx: &mut BarContext<'_>) -> Result<(), StrategyError> {
        let api = &mut self.interp.api;
        api.window.set(ctx.index() + 1);
        api.index = ctx.index();
        api.position = ctx.position();
        api.equity = ctx.equity();
        api.close = ctx.bar().close;
        api.closed_trades = ctx.closed_trade_count();
        api.orders.clear();
        api.phase = ApiPhase::Next;

        self.interp.reset_budget();
        let result = self.interp.call_method(&self.instance, "next");
        self.interp.api.phase = ApiPhase::Module;
        result.map_err(runtime)?;

        for intent in std::mem::take(&mut self.interp.api.orders) {
            match intent {
                OrderIntent::Entry {
                    side: OrderSide::Buy,
                    size,
                    stop_loss,
                    take_profit,
                } => ctx.buy(size, stop_loss, take_profit)?,
                OrderIntent::Entry {
                    side: OrderSide::Sell,
                    size,
                    stop_loss,
                    take_profit,
                } => ctx.sell(size, stop_loss, take_profit)?,
                OrderIntent::Close(portion) => ctx.close_position(portion)?,
            }
        }
        Ok(())
    }
}
