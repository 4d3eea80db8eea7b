//! The open position and completed round trips.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::ohlcv::Bar;
use crate::domain::regime::Regime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn of_quantity(quantity: f64) -> Side {
        if quantity < 0.0 { Side::Short } else { Side::Long }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Stop-loss and take-profit distances in percent of the entry price.
/// Zero disables a level.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Protection {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Protection {
    pub fn stop_level(&self, side: Side, entry_price: f64) -> Option<f64> {
        (self.stop_loss_pct > 0.0)
            .then(|| entry_price * (1.0 - side.sign() * self.stop_loss_pct / 100.0))
    }

    pub fn take_profit_level(&self, side: Side, entry_price: f64) -> Option<f64> {
        (self.take_profit_pct > 0.0)
            .then(|| entry_price * (1.0 + side.sign() * self.take_profit_pct / 100.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Signed: positive long, negative short.
    pub quantity: f64,
    /// Average entry price after slippage.
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub entry_bar: usize,
    /// Entry commission not yet attributed to a closed trade.
    pub entry_commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub protection: Protection,
    pub regime: Regime,
}

impl Position {
    pub fn side(&self) -> Side {
        Side::of_quantity(self.quantity)
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Signed value: what the position adds to equity at `price`.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.entry_price)
    }

    pub(crate) fn reset_levels(&mut self) {
        let side = self.side();
        self.stop_loss = self.protection.stop_level(side, self.entry_price);
        self.take_profit = self.protection.take_profit_level(side, self.entry_price);
    }

    /// The bar traded through the stop: low for longs, high for shorts.
    pub fn should_stop_loss(&self, bar: &Bar) -> bool {
        match self.stop_loss {
            None => false,
            Some(level) if self.is_long() => bar.low <= level,
            Some(level) => bar.high >= level,
        }
    }

    pub fn should_take_profit(&self, bar: &Bar) -> bool {
        match self.take_profit {
            None => false,
            Some(level) if self.is_long() => bar.high >= level,
            Some(level) => bar.low <= level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Exit rule at this index of the strategy's rule list.
    Rule(usize),
    StopLoss,
    TakeProfit,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Rule(i) => write!(f, "rule_{i}"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::EndOfData => write!(f, "end_of_data"),
        }
    }
}

/// One completed round trip (or the reduced part of one).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_bar: usize,
    pub exit_bar: usize,
    /// Net of entry and exit commissions.
    pub pnl: f64,
    pub return_pct: f64,
    pub exit_reason: ExitReason,
    pub entry_regime: Regime,
    pub exit_regime: Regime,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn duration_bars(&self) -> usize {
        self.exit_bar.saturating_sub(self.entry_bar)
    }
}
