//! Strategy model: the YAML description, its validation, and binding of rule
//! operands to indicator slots.
//!
//! A [`Strategy`] is built once per invocation from a [`StrategyDescription`]
//! and is read-only afterwards. Binding happens here so the simulator never
//! looks up an indicator by name: every operand that names an indicator is
//! rewritten to an [`IndicatorRef`] holding the slot index into
//! [`Strategy::indicators`] and the output index into that indicator's value.
//! Two references with the same canonical [`IndicatorSpec`] share a slot.
//!
//! Descriptions in the older crossover layout (`strategy.type: sma_crossover`
//! with `entry: { fast, slow }` and `exit: { stop_loss_pct, take_profit_pct }`,
//! either at the top level or nested under `strategy:`) are expanded into
//! explicit rules before binding. Unknown keys are rejected everywhere so a
//! misplaced block fails loudly instead of being ignored.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::error::FluxbackError;
use crate::domain::indicator::rvol::INTRADAY_ANNUALIZATION;
use crate::domain::indicator::{IndicatorRegistry, IndicatorSpec};
use crate::domain::position::{Protection, Side};
use crate::domain::rule::{IndicatorCall, IndicatorRef, Operand, Rule};
use crate::domain::rule_parser;

const PRICE_FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

const LEGACY_POSITION_SIZE: f64 = 100.0;

// ---------------------------------------------------------------------------
// Description (serde)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyDescription {
    pub strategy: StrategyHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<IndicatorDeclaration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<CrossoverEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<CrossoverExit>,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default, skip_serializing_if = "ExecutionOverrides::is_empty")]
    pub execution: ExecutionOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyHeader {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Legacy crossover blocks may sit under `strategy:` instead of the top level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<CrossoverEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<CrossoverExit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_volatile_regime: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Entry,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDeclaration {
    #[serde(rename = "type")]
    pub kind: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizing: Option<SizingDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderDeclaration>,
}

/// Exactly one of `fraction` or `units`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizingDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderDeclaration {
    #[serde(rename = "type")]
    pub kind: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizing: Option<SizingDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_pct: Option<f64>,
}

/// Legacy crossover entry block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossoverEntry {
    #[serde(default = "default_legacy_fast")]
    pub fast: usize,
    #[serde(default = "default_legacy_slow")]
    pub slow: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_overbought: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_oversold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_threshold: Option<f64>,
}

/// Legacy exit block; values are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossoverExit {
    #[serde(default = "default_legacy_stop_loss")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_legacy_take_profit")]
    pub take_profit_pct: f64,
}

fn default_legacy_fast() -> usize {
    10
}

fn default_legacy_slow() -> usize {
    20
}

fn default_legacy_stop_loss() -> f64 {
    0.5
}

fn default_legacy_take_profit() -> f64 {
    1.0
}

/// Per-strategy overrides of the engine configuration. Unset fields keep the
/// value from the defaults or the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_cash: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_per_trade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_shorting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whole_units: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_free_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periods_per_year: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_volatile_regime: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage: Option<SlippageDeclaration>,
}

impl ExecutionOverrides {
    pub fn is_empty(&self) -> bool {
        *self == ExecutionOverrides::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlippageType {
    #[default]
    Fixed,
    Adaptive,
}

/// `execution.slippage`. A fixed model takes `pct`; the tick and volatility
/// fields configure the adaptive model and default to its standard values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlippageDeclaration {
    #[serde(default, rename = "type")]
    pub kind: SlippageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ticks: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_annualization: Option<f64>,
}

impl SlippageDeclaration {
    /// True when any adaptive-only field is set.
    pub fn has_adaptive_fields(&self) -> bool {
        self.base_ticks.is_some()
            || self.tick_size.is_some()
            || self.vol_multiplier.is_some()
            || self.vol_low.is_some()
            || self.vol_high.is_some()
            || self.low_factor.is_some()
            || self.high_factor.is_some()
            || self.vol_period.is_some()
            || self.vol_annualization.is_some()
    }
}

// ---------------------------------------------------------------------------
// Bound model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// Fraction of current cash, in (0, 1].
    Fraction(f64),
    /// Fixed quantity.
    Units(f64),
}

impl Default for Sizing {
    fn default() -> Self {
        Sizing::Fraction(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderKind {
    Market,
    /// Limit placed `offset_pct` percent through the signal bar's close:
    /// below it for buys, above it for sells.
    Limit { offset_pct: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryRule {
    pub side: Side,
    pub rule: Rule,
    pub sizing: Option<Sizing>,
    pub order: OrderKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitRule {
    /// Only fires for positions on this side when set.
    pub side: Option<Side>,
    pub rule: Rule,
    pub order: OrderKind,
}

impl ExitRule {
    pub fn applies_to(&self, side: Side) -> bool {
        self.side.is_none_or(|s| s == side)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradingRule {
    Entry(EntryRule),
    Exit(ExitRule),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskParams {
    pub sizing: Sizing,
    /// Percent; 0 disables.
    pub stop_loss_pct: f64,
    /// Percent; 0 disables.
    pub take_profit_pct: f64,
}

impl RiskParams {
    pub fn protection(&self) -> Protection {
        Protection {
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: String,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub description: Option<String>,
    /// Indicator slots referenced by the bound rules.
    pub indicators: Vec<IndicatorSpec>,
    /// Declaration order is dispatch order.
    pub rules: Vec<TradingRule>,
    pub risk: RiskParams,
    pub execution: ExecutionOverrides,
}

impl Strategy {
    /// Parse and bind a YAML strategy description.
    pub fn parse(yaml: &str, registry: &IndicatorRegistry) -> Result<Strategy, FluxbackError> {
        let description: StrategyDescription = serde_yaml::from_str(yaml)
            .map_err(|e| FluxbackError::strategy(format!("invalid strategy YAML: {e}")))?;
        Self::from_description(description, registry)
    }

    pub fn from_description(
        description: StrategyDescription,
        registry: &IndicatorRegistry,
    ) -> Result<Strategy, FluxbackError> {
        let description = expand_crossover(description)?;
        let header = description.strategy;
        if header.name.trim().is_empty() {
            return Err(FluxbackError::strategy("strategy.name must not be empty"));
        }

        let mut binder = Binder::new(registry);
        for decl in &description.indicators {
            binder.declare(decl)?;
        }

        let mut rules = Vec::with_capacity(description.rules.len());
        for (i, decl) in description.rules.iter().enumerate() {
            rules.push(bind_rule(&mut binder, decl).map_err(|e| match e {
                FluxbackError::StrategyFormat { reason } => {
                    FluxbackError::strategy(format!("rule {}: {reason}", i + 1))
                }
                other => other,
            })?);
        }
        if !rules.iter().any(|r| matches!(r, TradingRule::Entry(_))) {
            return Err(FluxbackError::strategy("strategy has no entry rule"));
        }

        let risk = bind_risk(&description.risk)?;

        Ok(Strategy {
            name: header.name,
            symbol: header.symbol,
            timeframe: header.timeframe,
            description: header.description,
            indicators: binder.specs,
            rules,
            risk,
            execution: description.execution,
        })
    }

    pub fn entry_rules(&self) -> impl Iterator<Item = &EntryRule> {
        self.rules.iter().filter_map(|r| match r {
            TradingRule::Entry(e) => Some(e),
            TradingRule::Exit(_) => None,
        })
    }

    pub fn exit_rules(&self) -> impl Iterator<Item = &ExitRule> {
        self.rules.iter().filter_map(|r| match r {
            TradingRule::Exit(e) => Some(e),
            TradingRule::Entry(_) => None,
        })
    }

    /// Largest `min_lookback` across the strategy's indicators (at least 1).
    pub fn max_lookback(&self, registry: &IndicatorRegistry) -> Result<usize, FluxbackError> {
        self.indicators
            .iter()
            .map(|spec| registry.min_lookback(spec))
            .try_fold(1, |acc, l| l.map(|l| acc.max(l)))
    }

    /// An equivalent description: every indicator declared in slot order and
    /// every rule written with canonical inline references.
    pub fn to_description(
        &self,
        registry: &IndicatorRegistry,
    ) -> Result<StrategyDescription, FluxbackError> {
        let indicators = self
            .indicators
            .iter()
            .map(|spec| {
                let descriptor = registry.get(&spec.name)?;
                Ok(IndicatorDeclaration {
                    id: None,
                    name: spec.name.clone(),
                    params: descriptor
                        .params
                        .iter()
                        .zip(&spec.params)
                        .map(|(p, v)| (p.name.clone(), *v))
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, FluxbackError>>()?;

        let rules = self
            .rules
            .iter()
            .map(|rule| match rule {
                TradingRule::Entry(e) => RuleDeclaration {
                    kind: RuleType::Entry,
                    side: Some(e.side),
                    expression: e.rule.to_string(),
                    sizing: e.sizing.map(sizing_declaration),
                    order: order_declaration(e.order),
                },
                TradingRule::Exit(x) => RuleDeclaration {
                    kind: RuleType::Exit,
                    side: x.side,
                    expression: x.rule.to_string(),
                    sizing: None,
                    order: order_declaration(x.order),
                },
            })
            .collect();

        Ok(StrategyDescription {
            strategy: StrategyHeader {
                name: self.name.clone(),
                kind: None,
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.clone(),
                description: self.description.clone(),
                entry: None,
                exit: None,
                exclude_volatile_regime: None,
            },
            indicators,
            rules,
            entry: None,
            exit: None,
            risk: RiskSection {
                sizing: Some(sizing_declaration(self.risk.sizing)),
                position_size: None,
                stop_loss_pct: Some(self.risk.stop_loss_pct),
                take_profit_pct: Some(self.risk.take_profit_pct),
            },
            execution: self.execution.clone(),
        })
    }

    pub fn to_yaml(&self, registry: &IndicatorRegistry) -> Result<String, FluxbackError> {
        serde_yaml::to_string(&self.to_description(registry)?)
            .map_err(|e| FluxbackError::strategy(format!("cannot serialize strategy: {e}")))
    }
}

fn sizing_declaration(sizing: Sizing) -> SizingDeclaration {
    match sizing {
        Sizing::Fraction(f) => SizingDeclaration {
            fraction: Some(f),
            units: None,
        },
        Sizing::Units(n) => SizingDeclaration {
            fraction: None,
            units: Some(n),
        },
    }
}

fn order_declaration(order: OrderKind) -> Option<OrderDeclaration> {
    match order {
        OrderKind::Market => None,
        OrderKind::Limit { offset_pct } => Some(OrderDeclaration {
            kind: OrderType::Limit,
            offset_pct: Some(offset_pct),
        }),
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

struct Binder<'r> {
    registry: &'r IndicatorRegistry,
    specs: Vec<IndicatorSpec>,
    aliases: HashMap<String, usize>,
}

impl<'r> Binder<'r> {
    fn new(registry: &'r IndicatorRegistry) -> Self {
        Binder {
            registry,
            specs: Vec::new(),
            aliases: HashMap::new(),
        }
    }

    /// Slot for `spec`, reusing an existing one with the same identity.
    fn intern(&mut self, spec: IndicatorSpec) -> usize {
        match self.specs.iter().position(|s| *s == spec) {
            Some(slot) => slot,
            None => {
                self.specs.push(spec);
                self.specs.len() - 1
            }
        }
    }

    fn declare(&mut self, decl: &IndicatorDeclaration) -> Result<(), FluxbackError> {
        let spec = self
            .registry
            .resolve_named(&decl.name, &decl.params)
            .map_err(|e| match e {
                FluxbackError::IndicatorNotFound { name } => {
                    FluxbackError::strategy(format!("unknown indicator '{name}'"))
                }
                other => other,
            })?;
        let slot = self.intern(spec);
        if let Some(id) = &decl.id {
            let key = id.to_ascii_lowercase();
            if !is_identifier(id) {
                return Err(FluxbackError::strategy(format!(
                    "indicator id '{id}' is not a valid identifier"
                )));
            }
            if PRICE_FIELDS.contains(&key.as_str()) || self.registry.contains(id) {
                return Err(FluxbackError::strategy(format!(
                    "indicator id '{id}' collides with a built-in name"
                )));
            }
            if self.aliases.insert(key, slot).is_some() {
                return Err(FluxbackError::strategy(format!(
                    "indicator id '{id}' is declared twice"
                )));
            }
        }
        Ok(())
    }

    fn bind_operand(&mut self, operand: &Operand) -> Result<Operand, FluxbackError> {
        match operand {
            Operand::Reference(call) => self.bind_call(call).map(Operand::Indicator),
            other => Ok(other.clone()),
        }
    }

    fn bind_call(&mut self, call: &IndicatorCall) -> Result<IndicatorRef, FluxbackError> {
        let alias = match call.args {
            None => self.aliases.get(&call.name.to_ascii_lowercase()).copied(),
            Some(_) => None,
        };
        let slot = match alias {
            Some(slot) => slot,
            None => {
                let args = call.args.as_deref().unwrap_or(&[]);
                let spec = self
                    .registry
                    .resolve_positional(&call.name, args)
                    .map_err(|e| match e {
                        FluxbackError::IndicatorNotFound { .. } if call.args.is_none() => {
                            FluxbackError::strategy(format!(
                                "'{}' at position {} is neither a declared id nor an indicator",
                                call.name, call.position
                            ))
                        }
                        FluxbackError::IndicatorNotFound { .. } => FluxbackError::strategy(format!(
                            "unknown indicator '{}' at position {}",
                            call.name, call.position
                        )),
                        other => other,
                    })?;
                self.intern(spec)
            }
        };

        let spec = &self.specs[slot];
        let descriptor = self.registry.get(&spec.name)?;
        let (output, label) = match &call.output {
            Some(name) => {
                let index = descriptor.output_index(name).ok_or_else(|| {
                    FluxbackError::strategy(format!(
                        "{} has no output '{}' (outputs: {})",
                        descriptor.name,
                        name,
                        descriptor.outputs.join(", ")
                    ))
                })?;
                (index, format!("{spec}.{}", descriptor.outputs[index]))
            }
            None if descriptor.outputs.len() > 1 => {
                return Err(FluxbackError::strategy(format!(
                    "{} has several outputs; select one of: {}",
                    descriptor.name,
                    descriptor.outputs.join(", ")
                )));
            }
            None => (0, spec.to_string()),
        };
        Ok(IndicatorRef {
            slot,
            output,
            label,
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn bind_rule(binder: &mut Binder<'_>, decl: &RuleDeclaration) -> Result<TradingRule, FluxbackError> {
    let parsed = rule_parser::parse(&decl.expression)?;
    let rule = parsed.try_map_operands(&mut |op| binder.bind_operand(op))?;
    let order = bind_order(decl.order.as_ref())?;
    Ok(match decl.kind {
        RuleType::Entry => TradingRule::Entry(EntryRule {
            side: decl.side.unwrap_or(Side::Long),
            rule,
            sizing: decl.sizing.as_ref().map(bind_sizing).transpose()?,
            order,
        }),
        RuleType::Exit => {
            if decl.sizing.is_some() {
                return Err(FluxbackError::strategy(
                    "exit rules close the whole position and take no sizing",
                ));
            }
            TradingRule::Exit(ExitRule {
                side: decl.side,
                rule,
                order,
            })
        }
    })
}

fn bind_sizing(decl: &SizingDeclaration) -> Result<Sizing, FluxbackError> {
    match (decl.fraction, decl.units) {
        (Some(f), None) if f.is_finite() && f > 0.0 && f <= 1.0 => Ok(Sizing::Fraction(f)),
        (Some(f), None) => Err(FluxbackError::strategy(format!(
            "sizing fraction must be in (0, 1], got {f}"
        ))),
        (None, Some(n)) if n.is_finite() && n > 0.0 => Ok(Sizing::Units(n)),
        (None, Some(n)) => Err(FluxbackError::strategy(format!(
            "sizing units must be positive, got {n}"
        ))),
        _ => Err(FluxbackError::strategy(
            "sizing needs exactly one of 'fraction' or 'units'",
        )),
    }
}

fn bind_order(decl: Option<&OrderDeclaration>) -> Result<OrderKind, FluxbackError> {
    match decl {
        None => Ok(OrderKind::Market),
        Some(OrderDeclaration {
            kind: OrderType::Market,
            offset_pct: None,
        }) => Ok(OrderKind::Market),
        Some(OrderDeclaration {
            kind: OrderType::Market,
            offset_pct: Some(_),
        }) => Err(FluxbackError::strategy("offset_pct only applies to limit orders")),
        Some(OrderDeclaration {
            kind: OrderType::Limit,
            offset_pct,
        }) => {
            let offset_pct = offset_pct.unwrap_or(0.0);
            if !offset_pct.is_finite() || !(0.0..100.0).contains(&offset_pct) {
                return Err(FluxbackError::strategy(format!(
                    "limit offset_pct must be in [0, 100), got {offset_pct}"
                )));
            }
            Ok(OrderKind::Limit { offset_pct })
        }
    }
}

fn bind_risk(risk: &RiskSection) -> Result<RiskParams, FluxbackError> {
    let sizing = match (&risk.sizing, risk.position_size) {
        (Some(decl), _) => bind_sizing(decl)?,
        (None, Some(units)) => bind_sizing(&SizingDeclaration {
            fraction: None,
            units: Some(units),
        })?,
        (None, None) => Sizing::default(),
    };
    let pct = |value: Option<f64>, key: &str| -> Result<f64, FluxbackError> {
        let v = value.unwrap_or(0.0);
        if v.is_finite() && v >= 0.0 {
            Ok(v)
        } else {
            Err(FluxbackError::strategy(format!(
                "risk.{key} must be a non-negative number, got {v}"
            )))
        }
    };
    Ok(RiskParams {
        sizing,
        stop_loss_pct: pct(risk.stop_loss_pct, "stop_loss_pct")?,
        take_profit_pct: pct(risk.take_profit_pct, "take_profit_pct")?,
    })
}

/// Move legacy blocks nested under `strategy:` to where the rest of the model
/// expects them. A block given in both places is ambiguous.
fn hoist_legacy_blocks(description: &mut StrategyDescription) -> Result<(), FluxbackError> {
    let header = &mut description.strategy;
    if let Some(entry) = header.entry.take() {
        if description.entry.replace(entry).is_some() {
            return Err(FluxbackError::strategy(
                "'entry' is given both at the top level and under 'strategy'",
            ));
        }
    }
    if let Some(exit) = header.exit.take() {
        if description.exit.replace(exit).is_some() {
            return Err(FluxbackError::strategy(
                "'exit' is given both at the top level and under 'strategy'",
            ));
        }
    }
    if let Some(exclude) = header.exclude_volatile_regime.take() {
        description
            .execution
            .exclude_volatile_regime
            .get_or_insert(exclude);
    }
    Ok(())
}

/// Rewrite the legacy crossover blocks into explicit rules. Descriptions that
/// already list rules are left alone apart from the risk defaults.
fn expand_crossover(
    mut description: StrategyDescription,
) -> Result<StrategyDescription, FluxbackError> {
    hoist_legacy_blocks(&mut description)?;
    if let Some(exit) = description.exit.take() {
        let risk = &mut description.risk;
        risk.stop_loss_pct.get_or_insert(exit.stop_loss_pct);
        risk.take_profit_pct.get_or_insert(exit.take_profit_pct);
    }
    let Some(entry) = description.entry.take() else {
        return Ok(description);
    };
    if !description.rules.is_empty() {
        return Ok(description);
    }

    let fast = format!("SMA({})", entry.fast);
    let slow = format!("SMA({})", entry.slow);
    let mut long_filters = vec![format!("CROSS_ABOVE({fast}, {slow})")];
    let mut short_filters = vec![format!("CROSS_BELOW({fast}, {slow})")];
    if let Some(ob) = entry.rsi_overbought {
        long_filters.push(format!("NOT(ABOVE(RSI(14), {ob}))"));
    }
    if let Some(os) = entry.rsi_oversold {
        short_filters.push(format!("NOT(BELOW(RSI(14), {os}))"));
    }
    if let Some(threshold) = entry.vol_threshold {
        let filter = format!("NOT(ABOVE(RVOL(20,{INTRADAY_ANNUALIZATION}), {threshold}))");
        long_filters.push(filter.clone());
        short_filters.push(filter);
    }
    let combine = |parts: Vec<String>| {
        if parts.len() == 1 {
            parts.concat()
        } else {
            format!("AND({})", parts.join(", "))
        }
    };

    let rule = |kind, side, expression| RuleDeclaration {
        kind,
        side: Some(side),
        expression,
        sizing: None,
        order: None,
    };
    description.rules = vec![
        rule(RuleType::Entry, Side::Long, combine(long_filters)),
        rule(RuleType::Entry, Side::Short, combine(short_filters)),
        rule(
            RuleType::Exit,
            Side::Long,
            format!("CROSS_BELOW({fast}, {slow})"),
        ),
        rule(
            RuleType::Exit,
            Side::Short,
            format!("CROSS_ABOVE({fast}, {slow})"),
        ),
    ];
    if description.risk.sizing.is_none() {
        description
            .risk
            .position_size
            .get_or_insert(LEGACY_POSITION_SIZE);
    }
    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    fn registry() -> IndicatorRegistry {
        IndicatorRegistry::with_builtins()
    }

    const SMA_CROSS: &str = r#"
strategy:
  name: sma_cross
  symbol: AAPL
  timeframe: 1d
indicators:
  - { id: fast, name: SMA, params: { period: 10 } }
rules:
  - type: entry
    expression: "CROSS_ABOVE(fast, SMA(30))"
    sizing: { fraction: 0.5 }
  - type: exit
    expression: "CROSS_BELOW(fast, SMA(30))"
risk:
  stop_loss_pct: 2.0
"#;

    #[test]
    fn parse_binds_aliases_and_inline_references() {
        let s = Strategy::parse(SMA_CROSS, &registry()).unwrap();
        assert_eq!(s.name, "sma_cross");
        assert_eq!(s.symbol.as_deref(), Some("AAPL"));
        assert_eq!(s.indicators.len(), 2);
        assert_eq!(s.indicators[0].to_string(), "SMA(10)");
        assert_eq!(s.indicators[1].to_string(), "SMA(30)");

        let entry = s.entry_rules().next().unwrap();
        assert_eq!(entry.side, Side::Long);
        assert_eq!(entry.sizing, Some(Sizing::Fraction(0.5)));
        assert_eq!(entry.order, OrderKind::Market);
        assert_eq!(entry.rule.to_string(), "CROSS_ABOVE(SMA(10), SMA(30))");
        match &entry.rule {
            Rule::CrossAbove {
                left: Operand::Indicator(l),
                right: Operand::Indicator(r),
            } => {
                assert_eq!((l.slot, r.slot), (0, 1));
            }
            other => panic!("unexpected rule {other:?}"),
        }
        assert_eq!(s.risk.stop_loss_pct, 2.0);
        assert_eq!(s.risk.take_profit_pct, 0.0);
        assert_eq!(s.risk.sizing, Sizing::Fraction(1.0));
    }

    #[test]
    fn identical_specs_share_a_slot() {
        let yaml = r#"
strategy: { name: dedupe }
indicators:
  - { name: RSI, params: { period: 14 } }
rules:
  - { type: entry, expression: "BELOW(RSI(14), 30)" }
  - { type: exit, expression: "ABOVE(RSI, 70)" }
"#;
        let s = Strategy::parse(yaml, &registry()).unwrap();
        assert_eq!(s.indicators.len(), 1);
    }

    #[test]
    fn multi_output_requires_selection() {
        let yaml = r#"
strategy: { name: bb }
rules:
  - { type: entry, expression: "BELOW(close, BOLLINGER(20,2))" }
"#;
        let err = Strategy::parse(yaml, &registry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrategyFormat);
        assert!(err.to_string().contains("several outputs"));

        let ok = yaml.replace("BOLLINGER(20,2))", "BOLLINGER(20,2).lower)");
        let s = Strategy::parse(&ok, &registry()).unwrap();
        let entry = s.entry_rules().next().unwrap();
        assert_eq!(entry.rule.to_string(), "BELOW(close, BOLLINGER(20,2).lower)");
    }

    #[test]
    fn unknown_output_rejected() {
        let yaml = r#"
strategy: { name: bb }
rules:
  - { type: entry, expression: "BELOW(close, BOLLINGER.bottom)" }
"#;
        assert!(Strategy::parse(yaml, &registry()).is_err());
    }

    #[test]
    fn unknown_inline_indicator_is_a_strategy_error() {
        let yaml = r#"
strategy: { name: x }
rules:
  - { type: entry, expression: "ABOVE(close, FOO(3))" }
"#;
        let err = Strategy::parse(yaml, &registry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrategyFormat);
        assert!(err.to_string().contains("unknown indicator 'FOO'"));
    }

    #[test]
    fn unknown_declared_indicator_is_a_strategy_error() {
        let yaml = r#"
strategy: { name: x }
indicators:
  - { id: f, name: FOO }
rules:
  - { type: entry, expression: "ABOVE(close, f)" }
"#;
        let err = Strategy::parse(yaml, &registry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrategyFormat);
        assert!(err.to_string().contains("FOO"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        for yaml in [
            "strategy: { name: x, colour: red }\nrules:\n  - { type: entry, expression: \"ABOVE(close, 1)\" }\n",
            "strategy: { name: x }\nrules:\n  - { type: entry, expression: \"ABOVE(close, 1)\" }\nexecution: { slipage_pct: 1 }\n",
            "strategy: { name: x }\nrules:\n  - { type: entry, expression: \"ABOVE(close, 1)\" }\nexecution: { slippage: { type: adaptive, ticks: 2 } }\n",
        ] {
            let err = Strategy::parse(yaml, &registry()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StrategyFormat, "{yaml}");
        }
    }

    #[test]
    fn undeclared_bare_name_is_a_strategy_error() {
        let yaml = r#"
strategy: { name: x }
rules:
  - { type: entry, expression: "ABOVE(close, slowline)" }
"#;
        let err = Strategy::parse(yaml, &registry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrategyFormat);
        assert!(err.to_string().contains("slowline"));
    }

    #[test]
    fn syntax_errors_keep_position() {
        let yaml = r#"
strategy: { name: x }
rules:
  - { type: entry, expression: "ABOVE(close 100)" }
"#;
        let err = Strategy::parse(yaml, &registry()).unwrap_err();
        assert!(matches!(err, FluxbackError::RuleParse(ref p) if p.position == 12));
        assert_eq!(err.kind(), ErrorKind::StrategyFormat);
    }

    #[test]
    fn missing_entry_rule() {
        let yaml = r#"
strategy: { name: x }
rules:
  - { type: exit, expression: "ABOVE(close, 1)" }
"#;
        let err = Strategy::parse(yaml, &registry()).unwrap_err();
        assert!(err.to_string().contains("no entry rule"));
    }

    #[test]
    fn malformed_yaml() {
        let err = Strategy::parse("strategy: [", &registry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrategyFormat);
    }

    #[test]
    fn invalid_sizing() {
        for sizing in ["{ fraction: 1.5 }", "{ units: 0 }", "{ fraction: 0.5, units: 3 }", "{}"] {
            let yaml = format!(
                "strategy: {{ name: x }}\nrules:\n  - {{ type: entry, expression: \"ABOVE(close, 1)\", sizing: {sizing} }}\n"
            );
            assert!(Strategy::parse(&yaml, &registry()).is_err(), "{sizing}");
        }
    }

    #[test]
    fn alias_collisions() {
        let twice = r#"
strategy: { name: x }
indicators:
  - { id: f, name: SMA }
  - { id: f, name: EMA }
rules:
  - { type: entry, expression: "ABOVE(close, f)" }
"#;
        assert!(Strategy::parse(twice, &registry()).is_err());

        let builtin = r#"
strategy: { name: x }
indicators:
  - { id: close, name: SMA }
rules:
  - { type: entry, expression: "ABOVE(close, 1)" }
"#;
        assert!(Strategy::parse(builtin, &registry()).is_err());
    }

    #[test]
    fn limit_orders_and_short_side() {
        let yaml = r#"
strategy: { name: x }
rules:
  - type: entry
    side: short
    expression: "BELOW(close, SMA(5))"
    order: { type: limit, offset_pct: 0.25 }
  - { type: exit, side: short, expression: "ABOVE(close, SMA(5))" }
"#;
        let s = Strategy::parse(yaml, &registry()).unwrap();
        let entry = s.entry_rules().next().unwrap();
        assert_eq!(entry.side, Side::Short);
        assert_eq!(entry.order, OrderKind::Limit { offset_pct: 0.25 });
        let exit = s.exit_rules().next().unwrap();
        assert!(exit.applies_to(Side::Short));
        assert!(!exit.applies_to(Side::Long));
    }

    #[test]
    fn legacy_crossover_layout_expands() {
        let yaml = r#"
strategy:
  name: legacy
  type: sma_crossover
  symbol: ES
entry:
  fast: 10
  slow: 20
  rsi_overbought: 70
exit:
  stop_loss_pct: 0.5
risk:
  position_size: 50
"#;
        let s = Strategy::parse(yaml, &registry()).unwrap();
        assert_eq!(s.entry_rules().count(), 2);
        assert_eq!(s.exit_rules().count(), 2);
        assert_eq!(s.risk.sizing, Sizing::Units(50.0));
        assert_eq!(s.risk.stop_loss_pct, 0.5);
        assert_eq!(s.risk.take_profit_pct, 1.0);
        let long = s.entry_rules().next().unwrap();
        assert_eq!(
            long.rule.to_string(),
            "AND(CROSS_ABOVE(SMA(10), SMA(20)), NOT(ABOVE(RSI(14), 70)))"
        );
    }

    #[test]
    fn legacy_blocks_nested_under_strategy() {
        let yaml = r#"
strategy:
  name: nested
  type: sma_crossover
  exclude_volatile_regime: true
  entry:
    fast: 5
    slow: 15
  exit:
    take_profit_pct: 2.0
execution:
  slippage:
    type: adaptive
    base_ticks: 2
"#;
        let s = Strategy::parse(yaml, &registry()).unwrap();
        assert_eq!(s.entry_rules().count(), 2);
        assert_eq!(
            s.entry_rules().next().unwrap().rule.to_string(),
            "CROSS_ABOVE(SMA(5), SMA(15))"
        );
        assert_eq!(s.risk.stop_loss_pct, 0.5);
        assert_eq!(s.risk.take_profit_pct, 2.0);
        assert_eq!(s.risk.sizing, Sizing::Units(100.0));
        assert_eq!(s.execution.exclude_volatile_regime, Some(true));
        let slippage = s.execution.slippage.as_ref().unwrap();
        assert_eq!(slippage.kind, SlippageType::Adaptive);
        assert_eq!(slippage.base_ticks, Some(2.0));
    }

    #[test]
    fn legacy_entry_defaults_and_duplicates() {
        let yaml = r#"
strategy:
  name: defaults
  entry: {}
"#;
        let s = Strategy::parse(yaml, &registry()).unwrap();
        assert_eq!(
            s.entry_rules().next().unwrap().rule.to_string(),
            "CROSS_ABOVE(SMA(10), SMA(20))"
        );

        let twice = r#"
strategy:
  name: twice
  entry: { fast: 5, slow: 10 }
entry: { fast: 5, slow: 10 }
"#;
        let err = Strategy::parse(twice, &registry()).unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn yaml_round_trip_preserves_rules() {
        let reg = registry();
        let s = Strategy::parse(SMA_CROSS, &reg).unwrap();
        let yaml = s.to_yaml(&reg).unwrap();
        let again = Strategy::parse(&yaml, &reg).unwrap();
        assert_eq!(s, again);
    }

    #[test]
    fn max_lookback_covers_all_slots() {
        let reg = registry();
        let s = Strategy::parse(SMA_CROSS, &reg).unwrap();
        assert_eq!(s.max_lookback(&reg).unwrap(), 30);
    }
}
