//! Rule evaluation engine.
//!
//! Evaluates bound rules against the bars and indicator readings seen so far.
//!
//! # Evaluation Semantics
//!
//! Evaluation is three-valued: `Some(true)`, `Some(false)`, or `None` when an
//! operand is not yet available (indicator warmup, no previous bar). `None`
//! never fires a signal, including under `NOT`.
//!
//! - Comparison rules: Evaluate at the current bar
//! - `CROSS_ABOVE`/`CROSS_BELOW`: Need the previous bar, `None` on the first
//! - `AND`: `false` if any child is `false`, else `None` if any is `None`
//! - `OR`: `true` if any child is `true`, else `None` if any is `None`
//! - `CONSECUTIVE(rule, N)`: Child true on each of the N bars ending now
//! - `ANY_OF(rule, N)`: Child true at least once in the last N bars
//!
//! The context only holds bars `0..=i`, so a rule cannot read the future.

use crate::domain::indicator::IndicatorValue;
use crate::domain::ohlcv::Bar;
use crate::domain::rule::{IndicatorRef, Operand, Rule};

const EPSILON: f64 = 1e-9;

/// Indicator readings per slot, one entry per bar fed so far.
pub type Readings = [Vec<Option<IndicatorValue>>];

pub struct EvalContext<'a> {
    bars: &'a [Bar],
    readings: &'a Readings,
}

impl<'a> EvalContext<'a> {
    /// `bars` must end at the current bar.
    pub fn new(bars: &'a [Bar], readings: &'a Readings) -> Self {
        EvalContext { bars, readings }
    }

    fn current(&self) -> Option<usize> {
        self.bars.len().checked_sub(1)
    }
}

/// Evaluate `rule` at the last bar of the context.
pub fn evaluate(rule: &Rule, ctx: &EvalContext<'_>) -> Option<bool> {
    let index = ctx.current()?;
    evaluate_at(rule, ctx, index)
}

/// True only when the rule is determined and satisfied.
pub fn fires(rule: &Rule, ctx: &EvalContext<'_>) -> bool {
    evaluate(rule, ctx) == Some(true)
}

fn evaluate_at(rule: &Rule, ctx: &EvalContext<'_>, index: usize) -> Option<bool> {
    match rule {
        Rule::CrossAbove { left, right } => {
            let prev = index.checked_sub(1)?;
            let (lc, rc) = pair(left, right, ctx, index)?;
            let (lp, rp) = pair(left, right, ctx, prev)?;
            Some(lc > rc && lp <= rp)
        }
        Rule::CrossBelow { left, right } => {
            let prev = index.checked_sub(1)?;
            let (lc, rc) = pair(left, right, ctx, index)?;
            let (lp, rp) = pair(left, right, ctx, prev)?;
            Some(lc < rc && lp >= rp)
        }
        Rule::Above { left, right } => {
            let (l, r) = pair(left, right, ctx, index)?;
            Some(l > r)
        }
        Rule::Below { left, right } => {
            let (l, r) = pair(left, right, ctx, index)?;
            Some(l < r)
        }
        Rule::Between {
            operand,
            lower,
            upper,
        } => {
            let val = resolve_operand(operand, ctx, index)?;
            Some(val >= *lower && val <= *upper)
        }
        Rule::Equals { left, right } => {
            let (l, r) = pair(left, right, ctx, index)?;
            Some((l - r).abs() < EPSILON)
        }
        Rule::And(rules) => all_of(rules.iter().map(|r| evaluate_at(r, ctx, index))),
        Rule::Or(rules) => any_of(rules.iter().map(|r| evaluate_at(r, ctx, index))),
        Rule::Not(rule) => evaluate_at(rule, ctx, index).map(|v| !v),
        Rule::Consecutive { rule, count } => {
            let start = (index + 1).checked_sub(*count)?;
            all_of((start..=index).map(|i| evaluate_at(rule, ctx, i)))
        }
        Rule::AnyOf { rule, count } => {
            let start = index.saturating_sub(count.saturating_sub(1));
            any_of((start..=index).map(|i| evaluate_at(rule, ctx, i)))
        }
    }
}

/// Kleene AND.
fn all_of(values: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut undetermined = false;
    for v in values {
        match v {
            Some(false) => return Some(false),
            None => undetermined = true,
            Some(true) => {}
        }
    }
    if undetermined { None } else { Some(true) }
}

/// Kleene OR.
fn any_of(values: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut undetermined = false;
    for v in values {
        match v {
            Some(true) => return Some(true),
            None => undetermined = true,
            Some(false) => {}
        }
    }
    if undetermined { None } else { Some(false) }
}

fn pair(
    left: &Operand,
    right: &Operand,
    ctx: &EvalContext<'_>,
    index: usize,
) -> Option<(f64, f64)> {
    Some((
        resolve_operand(left, ctx, index)?,
        resolve_operand(right, ctx, index)?,
    ))
}

fn resolve_operand(operand: &Operand, ctx: &EvalContext<'_>, index: usize) -> Option<f64> {
    match operand {
        Operand::Open => ctx.bars.get(index).map(|b| b.open),
        Operand::High => ctx.bars.get(index).map(|b| b.high),
        Operand::Low => ctx.bars.get(index).map(|b| b.low),
        Operand::Close => ctx.bars.get(index).map(|b| b.close),
        Operand::Volume => ctx.bars.get(index).map(|b| b.volume),
        Operand::Constant(v) => Some(*v),
        Operand::Indicator(ind_ref) => resolve_indicator(ind_ref, ctx, index),
        Operand::Reference(_) => None,
    }
}

fn resolve_indicator(ind_ref: &IndicatorRef, ctx: &EvalContext<'_>, index: usize) -> Option<f64> {
    if index >= ctx.bars.len() {
        return None;
    }
    ctx.readings
        .get(ind_ref.slot)?
        .get(index)?
        .as_ref()?
        .output(ind_ref.output)
}
