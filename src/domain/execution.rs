//! Order model and fill simulation.
//!
//! Implements the cost model (slippage and commission), order sizing at fill
//! time, and the rule that decides at what price an order executes against
//! the bar after its signal.
//!
//! Slippage is either a fixed percentage of the market price or adaptive:
//! a per-unit amount built from a tick count plus a realized-volatility term,
//! scaled by the volatility band the market is in.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::indicator::rvol;
use super::ohlcv::Bar;
use super::position::{ExitReason, Protection, Side};
use super::regime::Regime;
use super::strategy::Sizing;

/// Configuration for backtest execution parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    /// Used by [`SlippageModel::Fixed`].
    pub slippage_pct: f64,
    pub slippage_model: SlippageModel,
    pub allow_shorting: bool,
    /// Round sized quantities down to whole units.
    pub whole_units: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            slippage_model: SlippageModel::Fixed,
            allow_shorting: false,
            whole_units: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SlippageModel {
    /// `slippage_pct` percent of the market price.
    #[default]
    Fixed,
    Adaptive(AdaptiveSlippage),
}

/// Per-unit slippage of `(base_ticks * tick_size + vol_multiplier * vol * price)
/// * factor`, where `vol` is the annualized realized volatility known when the
/// order executes and `factor` is `low_factor` below `vol_low`, `high_factor`
/// above `vol_high`, and 1 in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveSlippage {
    pub base_ticks: f64,
    pub tick_size: f64,
    pub vol_multiplier: f64,
    pub vol_low: f64,
    pub vol_high: f64,
    pub low_factor: f64,
    pub high_factor: f64,
    /// Log returns in the volatility window.
    pub vol_period: usize,
    pub vol_annualization: f64,
}

impl Default for AdaptiveSlippage {
    fn default() -> Self {
        AdaptiveSlippage {
            base_ticks: 1.0,
            tick_size: 0.01,
            vol_multiplier: 0.001,
            vol_low: 0.01,
            vol_high: 0.05,
            low_factor: 0.5,
            high_factor: 1.5,
            vol_period: rvol::DEFAULT_PERIOD,
            vol_annualization: rvol::INTRADAY_ANNUALIZATION,
        }
    }
}

impl AdaptiveSlippage {
    pub fn per_unit(&self, price: f64, volatility: f64) -> f64 {
        let factor = if volatility < self.vol_low {
            self.low_factor
        } else if volatility > self.vol_high {
            self.high_factor
        } else {
            1.0
        };
        (self.base_ticks * self.tick_size + self.vol_multiplier * volatility * price) * factor
    }
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

/// Buys pay up, sells receive less:
/// `market * (1 +/- slippage_pct / 100)`.
pub fn apply_slippage(market_price: f64, side: OrderSide, slippage_pct: f64) -> f64 {
    match side {
        OrderSide::Buy => market_price * (1.0 + slippage_pct / 100.0),
        OrderSide::Sell => market_price * (1.0 - slippage_pct / 100.0),
    }
}

/// Realized price for an execution at `market_price` under the configured
/// slippage model. `volatility` is ignored by the fixed model.
pub fn fill_price(
    market_price: f64,
    side: OrderSide,
    volatility: f64,
    config: &ExecutionConfig,
) -> f64 {
    match config.slippage_model {
        SlippageModel::Fixed => apply_slippage(market_price, side, config.slippage_pct),
        SlippageModel::Adaptive(model) => {
            let slip = model.per_unit(market_price, volatility);
            (market_price + side.sign() * slip).max(0.0)
        }
    }
}

/// Quantity for an opening order. A fraction budget must also cover the
/// commission on the trade it buys.
pub fn size_order(sizing: Sizing, cash: f64, price: f64, config: &ExecutionConfig) -> f64 {
    let quantity = match sizing {
        Sizing::Units(n) => n,
        Sizing::Fraction(f) => {
            let budget = cash.max(0.0) * f - config.commission_per_trade;
            let unit_cost = price * (1.0 + config.commission_pct / 100.0);
            if budget <= 0.0 || unit_cost <= 0.0 {
                0.0
            } else {
                budget / unit_cost
            }
        }
    };
    if config.whole_units {
        quantity.floor()
    } else {
        quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
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

    /// The side that opens a position on `side`.
    pub fn opening(side: Side) -> OrderSide {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// The side that closes a position on `side`.
    pub fn closing(side: Side) -> OrderSide {
        match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderPrice {
    Market,
    Limit(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderIntent {
    /// Open a position sized at fill time. `rule` is the index of the entry
    /// rule that fired.
    Open {
        rule: usize,
        sizing: Sizing,
        protection: Protection,
    },
    /// Close the whole open position.
    Close { reason: ExitReason },
}

/// A queued order. Consumed exactly once, on the bar after `signal_bar`.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub side: OrderSide,
    pub price: OrderPrice,
    pub intent: OrderIntent,
    pub signal_bar: usize,
    pub regime: Regime,
}

impl Order {
    /// Market reference price on `bar`, or `None` if a limit order is not
    /// reached. Buy limits fill at the open when it is already at or below
    /// the limit, otherwise at the limit if the low touches it. Sells mirror.
    pub fn execution_price(&self, bar: &Bar) -> Option<f64> {
        match (self.price, self.side) {
            (OrderPrice::Market, _) => Some(bar.open),
            (OrderPrice::Limit(limit), OrderSide::Buy) => {
                if bar.open <= limit {
                    Some(bar.open)
                } else if bar.low <= limit {
                    Some(limit)
                } else {
                    None
                }
            }
            (OrderPrice::Limit(limit), OrderSide::Sell) => {
                if bar.open >= limit {
                    Some(bar.open)
                } else if bar.high >= limit {
                    Some(limit)
                } else {
                    None
                }
            }
        }
    }
}

/// One execution, as recorded in the trade log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub bar: usize,
    pub timestamp: NaiveDateTime,
    pub side: OrderSide,
    pub quantity: f64,
    /// Realized price after slippage.
    pub price: f64,
    pub market_price: f64,
    pub commission: f64,
    /// Signed change in position quantity.
    pub position_delta: f64,
    /// True for the forced end-of-data close.
    pub synthetic: bool,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::bar;

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            commission_per_trade: 10.0,
            commission_pct: 0.1,
            slippage_pct: 0.05,
            slippage_model: SlippageModel::Fixed,
            allow_shorting: true,
            whole_units: false,
        }
    }

    fn adaptive() -> ExecutionConfig {
        ExecutionConfig {
            slippage_model: SlippageModel::Adaptive(AdaptiveSlippage::default()),
            ..Default::default()
        }
    }

    fn order(side: OrderSide, price: OrderPrice) -> Order {
        Order {
            side,
            price,
            intent: OrderIntent::Close {
                reason: ExitReason::Rule(0),
            },
            signal_bar: 0,
            regime: Regime::Sideways,
        }
    }

    #[test]
    fn calculate_commission_basic() {
        let commission = calculate_commission(10000.0, &config());
        assert!((commission - 20.0).abs() < 1e-9);
    }

    #[test]
    fn calculate_commission_zero_pct() {
        let config = ExecutionConfig {
            commission_per_trade: 10.0,
            ..Default::default()
        };
        assert!((calculate_commission(10000.0, &config) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn slippage_direction() {
        let buy = apply_slippage(100.0, OrderSide::Buy, 0.05);
        let sell = apply_slippage(100.0, OrderSide::Sell, 0.05);
        assert!((buy - 100.05).abs() < 1e-9);
        assert!((sell - 99.95).abs() < 1e-9);
    }

    #[test]
    fn fixed_model_ignores_volatility() {
        let cfg = config();
        assert!((fill_price(100.0, OrderSide::Buy, 3.0, &cfg) - 100.05).abs() < 1e-9);
    }

    #[test]
    fn adaptive_slippage_bands() {
        let model = AdaptiveSlippage::default();
        // calm: (0.01 + 0.001 * 0.005 * 100) * 0.5
        assert!((model.per_unit(100.0, 0.005) - 0.00525).abs() < 1e-12);
        // normal band keeps factor 1
        assert!((model.per_unit(100.0, 0.03) - 0.013).abs() < 1e-12);
        // stressed: (0.01 + 0.001 * 0.4 * 100) * 1.5
        assert!((model.per_unit(100.0, 0.4) - 0.075).abs() < 1e-12);
    }

    #[test]
    fn adaptive_slippage_is_adverse() {
        let cfg = adaptive();
        let buy = fill_price(100.0, OrderSide::Buy, 0.4, &cfg);
        let sell = fill_price(100.0, OrderSide::Sell, 0.4, &cfg);
        assert!((buy - 100.075).abs() < 1e-9);
        assert!((sell - 99.925).abs() < 1e-9);
    }

    #[test]
    fn adaptive_slippage_without_volatility_is_base_ticks() {
        let cfg = adaptive();
        // no volatility yet: low band, half a tick
        assert!((fill_price(50.0, OrderSide::Buy, 0.0, &cfg) - 50.005).abs() < 1e-9);
    }

    #[test]
    fn fraction_sizing_covers_commission() {
        let cfg = config();
        let qty = size_order(Sizing::Fraction(0.5), 100_000.0, 100.0, &cfg);
        let value = qty * 100.0;
        let total = value + calculate_commission(value, &cfg);
        assert!((total - 50_000.0).abs() < 1e-6);
    }

    #[test]
    fn whole_units_round_down() {
        let cfg = ExecutionConfig {
            whole_units: true,
            ..Default::default()
        };
        assert_eq!(size_order(Sizing::Fraction(1.0), 1050.0, 100.0, &cfg), 10.0);
        assert_eq!(size_order(Sizing::Fraction(1.0), 50.0, 100.0, &cfg), 0.0);
        assert_eq!(size_order(Sizing::Units(7.5), 0.0, 100.0, &cfg), 7.0);
    }

    #[test]
    fn fraction_sizing_with_no_budget() {
        let cfg = config();
        assert_eq!(size_order(Sizing::Fraction(1.0), 5.0, 100.0, &cfg), 0.0);
    }

    #[test]
    fn market_fills_at_open() {
        let b = bar(1, 100.0, 105.0, 95.0, 102.0, 0.0);
        assert_eq!(
            order(OrderSide::Buy, OrderPrice::Market).execution_price(&b),
            Some(100.0)
        );
    }

    #[test]
    fn buy_limit() {
        let b = bar(1, 100.0, 105.0, 95.0, 102.0, 0.0);
        let gap_down = order(OrderSide::Buy, OrderPrice::Limit(101.0));
        assert_eq!(gap_down.execution_price(&b), Some(100.0));
        let touched = order(OrderSide::Buy, OrderPrice::Limit(97.0));
        assert_eq!(touched.execution_price(&b), Some(97.0));
        let missed = order(OrderSide::Buy, OrderPrice::Limit(94.0));
        assert_eq!(missed.execution_price(&b), None);
    }

    #[test]
    fn sell_limit() {
        let b = bar(1, 100.0, 105.0, 95.0, 102.0, 0.0);
        let gap_up = order(OrderSide::Sell, OrderPrice::Limit(99.0));
        assert_eq!(gap_up.execution_price(&b), Some(100.0));
        let touched = order(OrderSide::Sell, OrderPrice::Limit(104.0));
        assert_eq!(touched.execution_price(&b), Some(104.0));
        let missed = order(OrderSide::Sell, OrderPrice::Limit(106.0));
        assert_eq!(missed.execution_price(&b), None);
    }

    #[test]
    fn opening_and_closing_sides() {
        assert_eq!(OrderSide::opening(Side::Short), OrderSide::Sell);
        assert_eq!(OrderSide::closing(Side::Short), OrderSide::Buy);
    }
}
