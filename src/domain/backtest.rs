//! Backtest engine and event loop.
//!
//! One strictly sequential pass over the series. For every bar `i`:
//!
//! 1. Execute the order queued on bar `i - 1`, if any, against bar `i`
//!    (market orders at the open, limit orders per [`Order::execution_price`]).
//!    A funds rejection drops the order and the run continues.
//! 2. Step every indicator, the regime detector and, under adaptive
//!    slippage, the realized-volatility tracker with bar `i`.
//! 3. Unless an order executed on this bar or this is the last bar, evaluate
//!    the rules and queue at most one order. Protective stops are part of
//!    this step, so a position is first checked on the bar after its fill.
//! 4. On the last bar, close any open position at the close.
//! 5. Record equity at the close.
//!
//! Nothing in the loop reads past bar `i`, so equity at `i` depends only on
//! bars `0..=i`.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::config_validation::validate_settings;
use super::error::FluxbackError;
use super::execution::{
    AdaptiveSlippage, ExecutionConfig, Fill, Order, OrderIntent, OrderPrice, OrderSide,
    SlippageModel,
};
use super::indicator::{IndicatorRegistry, IndicatorState, IndicatorValue};
use super::metrics::Metrics;
use super::ohlcv::Bar;
use super::portfolio::{EquityPoint, FillContext, Portfolio};
use super::position::{ClosedTrade, ExitReason, Side};
use super::regime::{self, Regime, RegimeDetector};
use super::rule_eval::{EvalContext, fires};
use super::strategy::{
    ExecutionOverrides, OrderKind, SlippageDeclaration, SlippageType, Strategy, TradingRule,
};
use super::timeseries::TimeSeries;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    /// Annual rate, used by the Sharpe and Sortino ratios.
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    /// Skip entries while the regime detector reports a volatile market.
    pub exclude_volatile_regime: bool,
    pub regime_lookback: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            execution: ExecutionConfig::default(),
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
            exclude_volatile_regime: false,
            regime_lookback: regime::DEFAULT_LOOKBACK,
        }
    }
}

impl BacktestConfig {
    /// This configuration with a strategy's `execution:` overrides applied.
    pub fn with_overrides(
        &self,
        overrides: &ExecutionOverrides,
    ) -> Result<BacktestConfig, FluxbackError> {
        let mut cfg = self.clone();
        if let Some(v) = overrides.initial_cash {
            cfg.initial_capital = v;
        }
        if let Some(v) = overrides.slippage_pct {
            cfg.execution.slippage_pct = v;
        }
        if let Some(v) = overrides.commission_per_trade {
            cfg.execution.commission_per_trade = v;
        }
        if let Some(v) = overrides.commission_pct {
            cfg.execution.commission_pct = v;
        }
        if let Some(v) = overrides.allow_shorting {
            cfg.execution.allow_shorting = v;
        }
        if let Some(v) = overrides.whole_units {
            cfg.execution.whole_units = v;
        }
        if let Some(v) = overrides.risk_free_rate {
            cfg.risk_free_rate = v;
        }
        if let Some(v) = overrides.periods_per_year {
            cfg.periods_per_year = v;
        }
        if let Some(v) = overrides.exclude_volatile_regime {
            cfg.exclude_volatile_regime = v;
        }
        if let Some(decl) = &overrides.slippage {
            apply_slippage_override(decl, &mut cfg.execution)?;
        }
        validate_settings(&cfg, "execution")?;
        Ok(cfg)
    }
}

fn apply_slippage_override(
    decl: &SlippageDeclaration,
    execution: &mut ExecutionConfig,
) -> Result<(), FluxbackError> {
    match decl.kind {
        SlippageType::Fixed => {
            if decl.has_adaptive_fields() {
                return Err(FluxbackError::ConfigInvalid {
                    section: "execution".to_string(),
                    key: "slippage".to_string(),
                    reason: "tick and volatility settings need type: adaptive".to_string(),
                });
            }
            if let Some(pct) = decl.pct {
                execution.slippage_pct = pct;
            }
            execution.slippage_model = SlippageModel::Fixed;
        }
        SlippageType::Adaptive => {
            if decl.pct.is_some() {
                return Err(FluxbackError::ConfigInvalid {
                    section: "execution".to_string(),
                    key: "slippage".to_string(),
                    reason: "pct applies to fixed slippage only".to_string(),
                });
            }
            let mut model = match execution.slippage_model {
                SlippageModel::Adaptive(model) => model,
                SlippageModel::Fixed => AdaptiveSlippage::default(),
            };
            set(&mut model.base_ticks, decl.base_ticks);
            set(&mut model.tick_size, decl.tick_size);
            set(&mut model.vol_multiplier, decl.vol_multiplier);
            set(&mut model.vol_low, decl.vol_low);
            set(&mut model.vol_high, decl.vol_high);
            set(&mut model.low_factor, decl.low_factor);
            set(&mut model.high_factor, decl.high_factor);
            set(&mut model.vol_period, decl.vol_period);
            set(&mut model.vol_annualization, decl.vol_annualization);
            execution.slippage_model = SlippageModel::Adaptive(model);
        }
    }
    Ok(())
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Everything a run produced. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub metrics: Metrics,
    pub equity_curve: Vec<EquityPoint>,
    pub fills: Vec<Fill>,
    pub trades: Vec<ClosedTrade>,
    pub bars_processed: usize,
    /// Orders dropped for insufficient funds.
    pub rejected_orders: usize,
    /// Limit orders whose price was not reached.
    pub expired_orders: usize,
}

pub fn run_backtest(
    series: &TimeSeries,
    strategy: &Strategy,
    registry: &IndicatorRegistry,
    config: &BacktestConfig,
) -> Result<BacktestResult, FluxbackError> {
    let config = config.with_overrides(&strategy.execution)?;
    let minimum = strategy.max_lookback(registry)?;
    if series.len() < minimum {
        return Err(FluxbackError::InsufficientData {
            bars: series.len(),
            minimum,
        });
    }

    let mut states = strategy
        .indicators
        .iter()
        .map(|spec| registry.instantiate(spec))
        .collect::<Result<Vec<IndicatorState>, _>>()?;
    let mut readings: Vec<Vec<Option<IndicatorValue>>> =
        vec![Vec::with_capacity(series.len()); states.len()];
    let mut detector = RegimeDetector::new(config.regime_lookback);
    // Latest realized volatility, fed to adaptive slippage. An order executing
    // on bar i sees the value through bar i - 1, or 0 before the window fills.
    let mut vol_tracker = match config.execution.slippage_model {
        SlippageModel::Adaptive(model) => {
            let spec = registry.resolve_positional(
                "RVOL",
                &[model.vol_period as f64, model.vol_annualization],
            )?;
            Some(registry.instantiate(&spec)?)
        }
        SlippageModel::Fixed => None,
    };
    let mut volatility = 0.0;
    let mut portfolio = Portfolio::new(config.initial_capital);
    let mut pending: Option<Order> = None;
    let mut rejected_orders = 0usize;
    let mut expired_orders = 0usize;

    info!(
        strategy = %strategy.name,
        bars = series.len(),
        indicators = states.len(),
        initial_capital = config.initial_capital,
        "backtest started"
    );

    let bars = series.bars();
    let last = bars.len().saturating_sub(1);
    for (i, bar) in bars.iter().enumerate() {
        let mut executed = false;

        if let Some(order) = pending.take() {
            match order.execution_price(bar) {
                Some(market_price) => {
                    let ctx = FillContext {
                        bar: i,
                        timestamp: bar.timestamp,
                        market_price,
                        volatility,
                        regime: detector.current(),
                        synthetic: false,
                    };
                    match portfolio.apply(&order, &ctx, &config.execution) {
                        Ok(fill) => {
                            executed = true;
                            debug!(
                                bar = i,
                                side = ?fill.side,
                                quantity = fill.quantity,
                                price = fill.price,
                                commission = fill.commission,
                                "order filled"
                            );
                        }
                        Err(FluxbackError::InsufficientFunds {
                            required,
                            available,
                        }) => {
                            rejected_orders += 1;
                            warn!(bar = i, required, available, "order rejected: insufficient funds");
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    expired_orders += 1;
                    debug!(bar = i, "limit order expired unfilled");
                }
            }
        }

        for (state, history) in states.iter_mut().zip(readings.iter_mut()) {
            history.push(state.step(series, i));
        }
        let regime = detector.update(bar);
        if let Some(reading) = vol_tracker.as_mut().and_then(|t| t.step(series, i)) {
            volatility = reading.output(0).unwrap_or(volatility);
        }

        if i == last {
            close_at_end(&mut portfolio, bar, i, regime, volatility, &config.execution)?;
        } else if !executed {
            let ctx = EvalContext::new(&bars[..=i], &readings);
            pending = next_order(strategy, &portfolio, &ctx, bar, i, regime, &config);
            if let Some(order) = &pending {
                debug!(bar = i, side = ?order.side, intent = ?order.intent, "signal");
            }
        }

        portfolio.record_equity(bar.timestamp, bar.close);
    }

    let metrics = Metrics::summarize(
        &portfolio.equity_curve,
        &portfolio.fills,
        &portfolio.closed_trades,
        &config,
    );
    info!(
        strategy = %strategy.name,
        total_return = metrics.total_return,
        trades = metrics.trade_count,
        fills = metrics.fill_count,
        rejected_orders,
        "backtest finished"
    );

    Ok(BacktestResult {
        strategy: strategy.name.clone(),
        symbol: strategy.symbol.clone(),
        metrics,
        equity_curve: portfolio.equity_curve,
        fills: portfolio.fills,
        trades: portfolio.closed_trades,
        bars_processed: bars.len(),
        rejected_orders,
        expired_orders,
    })
}

fn close_at_end(
    portfolio: &mut Portfolio,
    bar: &Bar,
    index: usize,
    regime: Regime,
    volatility: f64,
    execution: &ExecutionConfig,
) -> Result<(), FluxbackError> {
    let Some(side) = portfolio.position().map(|p| p.side()) else {
        return Ok(());
    };
    let order = Order {
        side: OrderSide::closing(side),
        price: OrderPrice::Market,
        intent: OrderIntent::Close {
            reason: ExitReason::EndOfData,
        },
        signal_bar: index,
        regime,
    };
    let ctx = FillContext {
        bar: index,
        timestamp: bar.timestamp,
        market_price: bar.close,
        volatility,
        regime,
        synthetic: true,
    };
    portfolio.apply(&order, &ctx, execution)?;
    debug!(bar = index, "closed open position at end of data");
    Ok(())
}

/// Rule dispatch for bar `index`: protective exits, then exit rules when in
/// a position; the first firing entry rule when flat.
fn next_order(
    strategy: &Strategy,
    portfolio: &Portfolio,
    ctx: &EvalContext<'_>,
    bar: &Bar,
    index: usize,
    regime: Regime,
    config: &BacktestConfig,
) -> Option<Order> {
    match portfolio.position() {
        Some(position) => {
            let side = position.side();
            let (reason, kind) = if position.should_stop_loss(bar) {
                (ExitReason::StopLoss, OrderKind::Market)
            } else if position.should_take_profit(bar) {
                (ExitReason::TakeProfit, OrderKind::Market)
            } else {
                strategy
                    .rules
                    .iter()
                    .enumerate()
                    .find_map(|(idx, rule)| match rule {
                        TradingRule::Exit(exit) if exit.applies_to(side) && fires(&exit.rule, ctx) => {
                            Some((ExitReason::Rule(idx), exit.order))
                        }
                        _ => None,
                    })?
            };
            let order_side = OrderSide::closing(side);
            Some(Order {
                side: order_side,
                price: order_price(kind, order_side, bar.close),
                intent: OrderIntent::Close { reason },
                signal_bar: index,
                regime,
            })
        }
        None => {
            if config.exclude_volatile_regime && regime == Regime::Volatile {
                return None;
            }
            strategy
                .rules
                .iter()
                .enumerate()
                .find_map(|(idx, rule)| match rule {
                    TradingRule::Entry(entry)
                        if (entry.side == Side::Long || config.execution.allow_shorting)
                            && fires(&entry.rule, ctx) =>
                    {
                        let order_side = OrderSide::opening(entry.side);
                        Some(Order {
                            side: order_side,
                            price: order_price(entry.order, order_side, bar.close),
                            intent: OrderIntent::Open {
                                rule: idx,
                                sizing: entry.sizing.unwrap_or(strategy.risk.sizing),
                                protection: strategy.risk.protection(),
                            },
                            signal_bar: index,
                            regime,
                        })
                    }
                    _ => None,
                })
        }
    }
}

/// Limits sit `offset_pct` through the signal close: below it for buys,
/// above it for sells.
fn order_price(kind: OrderKind, side: OrderSide, reference: f64) -> OrderPrice {
    match kind {
        OrderKind::Market => OrderPrice::Market,
        OrderKind::Limit { offset_pct } => {
            OrderPrice::Limit(reference * (1.0 - side.sign() * offset_pct / 100.0))
        }
    }
}
