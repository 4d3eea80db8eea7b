//! Performance metrics and statistics.
//!
//! Every figure is a pure function of the recorded equity curve, fills and
//! closed trades.

use serde::Serialize;
use std::collections::BTreeMap;

use super::backtest::BacktestConfig;
use super::execution::Fill;
use super::portfolio::EquityPoint;
use super::position::ClosedTrade;
use super::regime::Regime;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest stretch below a prior peak, in bars.
    pub max_drawdown_duration: usize,
    /// Closed round trips.
    pub trade_count: usize,
    pub fill_count: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    /// Gross wins over gross losses; `None` when nothing lost.
    pub profit_factor: Option<f64>,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Mean holding period, in bars.
    pub avg_trade_duration: f64,
    pub final_equity: f64,
    pub trades_by_regime: BTreeMap<Regime, usize>,
    pub pnl_by_regime: BTreeMap<Regime, f64>,
}

impl Metrics {
    pub fn summarize(
        equity_curve: &[EquityPoint],
        fills: &[Fill],
        trades: &[ClosedTrade],
        config: &BacktestConfig,
    ) -> Self {
        let periods_per_year = config.periods_per_year;
        let first_equity = equity_curve.first().map(|p| p.equity);
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(config.initial_capital);

        let total_return = match first_equity {
            Some(first) if first > 0.0 => final_equity / first - 1.0,
            _ => 0.0,
        };

        let periods = equity_curve.len().saturating_sub(1) as f64;
        let years = periods / periods_per_year;
        let annualized_return = if years > 0.0 && total_return.is_finite() && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);

        let (sharpe_ratio, sortino_ratio) = if fills.is_empty() {
            (0.0, 0.0)
        } else {
            let periodic_rf = config.risk_free_rate / periods_per_year;
            compute_risk_adjusted(equity_curve, periodic_rf, periods_per_year)
        };

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration = 0usize;
        let mut trades_by_regime = BTreeMap::new();
        let mut pnl_by_regime = BTreeMap::new();

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_duration += trade.duration_bars();
            *trades_by_regime.entry(trade.entry_regime).or_insert(0) += 1;
            *pnl_by_regime.entry(trade.entry_regime).or_insert(0.0) += pnl;
        }

        let trade_count = trades.len();
        let per_trade = |total: f64, count: usize| {
            if count > 0 { total / count as f64 } else { 0.0 }
        };

        Metrics {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            trade_count,
            fill_count: fills.len(),
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate: per_trade(trades_won as f64, trade_count),
            profit_factor: (total_losses > 0.0).then(|| total_wins / total_losses),
            avg_win: per_trade(total_wins, trades_won),
            avg_loss: per_trade(total_losses, trades_lost),
            largest_win,
            largest_loss,
            avg_trade_duration: per_trade(total_duration as f64, trade_count),
            final_equity,
            trades_by_regime,
            pnl_by_regime,
        }
    }
}

/// Maximum fractional drawdown and the longest run of bars spent under a
/// previous peak.
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(
    equity_curve: &[EquityPoint],
    periodic_rf: f64,
    periods_per_year: f64,
) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess_return = mean - periodic_rf;
    let scale = periods_per_year.sqrt();

    let sharpe = if stddev > 1e-12 {
        (excess_return / stddev) * scale
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < periodic_rf)
        .map(|&r| (r - periodic_rf).powi(2))
        .sum::<f64>();
    let downside_stddev = (downside / n).sqrt();

    let sortino = if downside_stddev > 1e-12 {
        (excess_return / downside_stddev) * scale
    } else {
        0.0
    };

    (sharpe, sortino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::OrderSide;
    use crate::domain::indicator::test_support::bar;
    use crate::domain::position::{ExitReason, Side};

    fn make_equity_curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                timestamp: bar(i, 0.0, 0.0, 0.0, 0.0, 0.0).timestamp,
                equity: v,
            })
            .collect()
    }

    fn make_trade(pnl: f64, bars: usize, regime: Regime) -> ClosedTrade {
        let entry_time = bar(0, 0.0, 0.0, 0.0, 0.0, 0.0).timestamp;
        ClosedTrade {
            side: Side::Long,
            quantity: 100.0,
            entry_price: 100.0,
            exit_price: 100.0 + pnl / 100.0,
            entry_time,
            exit_time: bar(bars, 0.0, 0.0, 0.0, 0.0, 0.0).timestamp,
            entry_bar: 0,
            exit_bar: bars,
            pnl,
            return_pct: pnl / 100.0,
            exit_reason: ExitReason::Rule(1),
            entry_regime: regime,
            exit_regime: regime,
        }
    }

    fn make_fill() -> Fill {
        Fill {
            bar: 1,
            timestamp: bar(1, 0.0, 0.0, 0.0, 0.0, 0.0).timestamp,
            side: OrderSide::Buy,
            quantity: 1.0,
            price: 100.0,
            market_price: 100.0,
            commission: 0.0,
            position_delta: 1.0,
            synthetic: false,
        }
    }

    fn summarize(equity: &[f64], trades: &[ClosedTrade]) -> Metrics {
        Metrics::summarize(
            &make_equity_curve(equity),
            &[make_fill()],
            trades,
            &BacktestConfig::default(),
        )
    }

    #[test]
    fn metrics_empty_history() {
        let metrics = Metrics::summarize(&[], &[], &[], &BacktestConfig::default());
        assert!((metrics.total_return - 0.0).abs() < f64::EPSILON);
        assert_eq!(metrics.trade_count, 0);
        assert_eq!(metrics.max_drawdown_duration, 0);
        assert!((metrics.final_equity - 100_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_total_return_uses_first_and_last_point() {
        let metrics = summarize(&[100_000.0, 95_000.0, 110_000.0], &[]);
        assert!((metrics.total_return - 0.10).abs() < 1e-9);
        let metrics = summarize(&[100_000.0, 90_000.0], &[]);
        assert!((metrics.total_return - (-0.10)).abs() < 1e-9);
    }

    #[test]
    fn metrics_annualized_return() {
        let values = vec![100_000.0; 253];
        let metrics = summarize(&values, &[]);
        assert!((metrics.annualized_return - 0.0).abs() < 1e-9);

        let mut growth = vec![100.0; 253];
        growth[252] = 110.0;
        let metrics = summarize(&growth, &[]);
        assert!((metrics.annualized_return - 0.10).abs() < 1e-9);
    }

    #[test]
    fn metrics_trade_stats_wins_and_losses() {
        let trades = vec![
            make_trade(100.0, 5, Regime::Trend),
            make_trade(-50.0, 3, Regime::Trend),
            make_trade(200.0, 10, Regime::Sideways),
            make_trade(0.0, 1, Regime::Sideways),
        ];
        let metrics = summarize(&[100_000.0, 100_250.0], &trades);

        assert_eq!(metrics.trade_count, 4);
        assert_eq!(metrics.trades_won, 2);
        assert_eq!(metrics.trades_lost, 1);
        assert_eq!(metrics.trades_breakeven, 1);
        assert!((metrics.win_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.profit_factor.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_profit_factor_without_losses() {
        let trades = vec![make_trade(100.0, 5, Regime::Trend)];
        let metrics = summarize(&[100_000.0, 100_100.0], &trades);
        assert_eq!(metrics.profit_factor, None);
    }

    #[test]
    fn metrics_avg_and_largest() {
        let trades = vec![
            make_trade(100.0, 5, Regime::Trend),
            make_trade(-60.0, 3, Regime::Trend),
            make_trade(300.0, 10, Regime::Trend),
            make_trade(-40.0, 2, Regime::Trend),
        ];
        let metrics = summarize(&[100_000.0, 100_300.0], &trades);

        assert!((metrics.avg_win - 200.0).abs() < 1e-9);
        assert!((metrics.avg_loss - 50.0).abs() < 1e-9);
        assert!((metrics.largest_win - 300.0).abs() < 1e-9);
        assert!((metrics.largest_loss - 60.0).abs() < 1e-9);
        assert!((metrics.avg_trade_duration - 5.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_per_regime_breakdown() {
        let trades = vec![
            make_trade(100.0, 5, Regime::Trend),
            make_trade(-30.0, 3, Regime::Volatile),
            make_trade(50.0, 3, Regime::Trend),
        ];
        let metrics = summarize(&[100_000.0, 100_120.0], &trades);
        assert_eq!(metrics.trades_by_regime[&Regime::Trend], 2);
        assert_eq!(metrics.trades_by_regime[&Regime::Volatile], 1);
        assert!(!metrics.trades_by_regime.contains_key(&Regime::Sideways));
        assert!((metrics.pnl_by_regime[&Regime::Trend] - 150.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_max_drawdown() {
        let curve = make_equity_curve(&[100.0, 110.0, 90.0, 95.0, 80.0, 100.0]);
        let (dd, _) = compute_drawdown(&curve);
        assert!((dd - (110.0 - 80.0) / 110.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_max_drawdown_duration() {
        let curve = make_equity_curve(&[100.0, 110.0, 100.0, 90.0, 85.0, 95.0, 111.0, 100.0]);
        let (_, duration) = compute_drawdown(&curve);
        assert_eq!(duration, 4);
    }

    #[test]
    fn monotonic_equity_has_no_drawdown() {
        let values: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let metrics = summarize(&values, &[]);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.max_drawdown_duration, 0);
    }

    #[test]
    fn metrics_sharpe_ratio_positive() {
        let values: Vec<f64> = (0..253)
            .map(|i| 100_000.0 * (1.0 + 0.001 * (i as f64)) + if i % 2 == 0 { 5.0 } else { 0.0 })
            .collect();
        let metrics = summarize(&values, &[]);
        assert!(metrics.sharpe_ratio > 0.0);
    }

    #[test]
    fn sharpe_is_zero_without_fills_or_variance() {
        let curve = make_equity_curve(&[100.0, 105.0, 98.0]);
        let no_fills = Metrics::summarize(&curve, &[], &[], &BacktestConfig::default());
        assert_eq!(no_fills.sharpe_ratio, 0.0);

        let flat = summarize(&[100.0, 100.0, 100.0], &[]);
        assert_eq!(flat.sharpe_ratio, 0.0);

        let single = summarize(&[100.0], &[]);
        assert_eq!(single.sharpe_ratio, 0.0);
    }

    #[test]
    fn metrics_sortino_ratio() {
        let curve = make_equity_curve(&[100.0, 101.0, 100.5, 101.5, 100.0, 102.0]);
        let (sharpe, sortino) = compute_risk_adjusted(&curve, 0.0, 252.0);
        assert!(sharpe.is_finite());
        assert!(sortino.is_finite());
        assert!(sortino > 0.0);
    }

    #[test]
    fn metrics_serialize_regime_keys() {
        let trades = vec![make_trade(10.0, 1, Regime::Volatile)];
        let metrics = summarize(&[100.0, 110.0], &trades);
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["trades_by_regime"]["VOLATILE"], 1);
        assert!(json["profit_factor"].is_null());
    }
}
