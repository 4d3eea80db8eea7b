//! Portfolio state and equity tracking.
//!
//! Cash, the single open position, the fill log, closed trades and the
//! equity curve. Positions change only through [`Portfolio::apply`].

use chrono::NaiveDateTime;
use serde::Serialize;

use super::error::FluxbackError;
use super::execution::{
    ExecutionConfig, Fill, Order, OrderIntent, calculate_commission, fill_price, size_order,
};
use super::position::{ClosedTrade, ExitReason, Position, Protection, Side};
use super::regime::Regime;

/// Quantities below this are treated as flat.
const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Where and when an order executes.
#[derive(Debug, Clone, PartialEq)]
pub struct FillContext {
    pub bar: usize,
    pub timestamp: NaiveDateTime,
    /// Reference price before slippage.
    pub market_price: f64,
    /// Annualized realized volatility known at execution, for adaptive slippage.
    pub volatility: f64,
    pub regime: Regime,
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    position: Option<Position>,
    pub fills: Vec<Fill>,
    pub closed_trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            position: None,
            fills: Vec::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Cash plus the signed value of the open position.
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.position.as_ref().map_or(0.0, |p| p.market_value(price))
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, price: f64) {
        let equity = self.equity(price);
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    /// Execute `order` at `ctx.market_price` with the cost model applied.
    ///
    /// Opening quantities are sized here against current cash. Orders that
    /// open or add exposure fail with `InsufficientFunds` when their cost
    /// exceeds the cash available, leaving the portfolio untouched. Closing
    /// quantities always execute.
    pub fn apply(
        &mut self,
        order: &Order,
        ctx: &FillContext,
        config: &ExecutionConfig,
    ) -> Result<Fill, FluxbackError> {
        let price = fill_price(ctx.market_price, order.side, ctx.volatility, config);
        let quantity = match order.intent {
            OrderIntent::Open { sizing, .. } => size_order(sizing, self.cash, price, config),
            OrderIntent::Close { .. } => self.position.as_ref().map_or(0.0, |p| p.quantity.abs()),
        };
        if quantity.is_nan() || quantity <= QTY_EPSILON {
            return Err(FluxbackError::InsufficientFunds {
                required: price + calculate_commission(price, config),
                available: self.cash,
            });
        }

        let value = quantity * price;
        let commission = calculate_commission(value, config);
        let delta = order.side.sign() * quantity;
        let current = self.position.as_ref().map_or(0.0, |p| p.quantity);

        let closing = if current * delta < 0.0 {
            current.abs().min(quantity)
        } else {
            0.0
        };
        let opening = quantity - closing;
        let closing_commission = commission * closing / quantity;

        if opening > QTY_EPSILON {
            let available =
                self.cash - order.side.sign() * closing * price - closing_commission;
            let required = opening * price + (commission - closing_commission);
            if required > available + 1e-9 {
                return Err(FluxbackError::InsufficientFunds {
                    required,
                    available,
                });
            }
        }

        self.cash -= order.side.sign() * value + commission;

        if closing > 0.0 {
            let reason = match order.intent {
                OrderIntent::Close { reason } => reason,
                OrderIntent::Open { rule, .. } => ExitReason::Rule(rule),
            };
            self.reduce(closing, price, closing_commission, ctx, reason);
        }
        if opening > QTY_EPSILON {
            let protection = match order.intent {
                OrderIntent::Open { protection, .. } => protection,
                OrderIntent::Close { .. } => Protection::default(),
            };
            self.increase(
                order.side.sign() * opening,
                price,
                commission - closing_commission,
                ctx,
                protection,
                order.regime,
            );
        }

        let fill = Fill {
            bar: ctx.bar,
            timestamp: ctx.timestamp,
            side: order.side,
            quantity,
            price,
            market_price: ctx.market_price,
            commission,
            position_delta: delta,
            synthetic: ctx.synthetic,
        };
        self.fills.push(fill.clone());
        Ok(fill)
    }

    fn increase(
        &mut self,
        delta: f64,
        price: f64,
        commission: f64,
        ctx: &FillContext,
        protection: Protection,
        regime: Regime,
    ) {
        if let Some(pos) = self.position.as_mut() {
            let held = pos.quantity.abs();
            let added = delta.abs();
            pos.entry_price = (held * pos.entry_price + added * price) / (held + added);
            pos.quantity += delta;
            pos.entry_commission += commission;
            pos.reset_levels();
            return;
        }
        let mut pos = Position {
            quantity: delta,
            entry_price: price,
            entry_time: ctx.timestamp,
            entry_bar: ctx.bar,
            entry_commission: commission,
            stop_loss: None,
            take_profit: None,
            protection,
            regime,
        };
        pos.reset_levels();
        self.position = Some(pos);
    }

    fn reduce(
        &mut self,
        quantity: f64,
        price: f64,
        exit_commission: f64,
        ctx: &FillContext,
        reason: ExitReason,
    ) {
        let Some(pos) = self.position.as_mut() else {
            return;
        };
        let side: Side = pos.side();
        let share = quantity / pos.quantity.abs();
        let entry_commission = pos.entry_commission * share;
        let pnl = side.sign() * (price - pos.entry_price) * quantity
            - entry_commission
            - exit_commission;
        let basis = quantity * pos.entry_price;

        self.closed_trades.push(ClosedTrade {
            side,
            quantity,
            entry_price: pos.entry_price,
            exit_price: price,
            entry_time: pos.entry_time,
            exit_time: ctx.timestamp,
            entry_bar: pos.entry_bar,
            exit_bar: ctx.bar,
            pnl,
            return_pct: if basis > 0.0 { pnl / basis * 100.0 } else { 0.0 },
            exit_reason: reason,
            entry_regime: pos.regime,
            exit_regime: ctx.regime,
        });

        pos.entry_commission -= entry_commission;
        pos.quantity -= side.sign() * quantity;
        if pos.quantity.abs() <= QTY_EPSILON {
            self.position = None;
        }
    }
}
