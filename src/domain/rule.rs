//! Rule AST data structures.
//!
//! This module defines the abstract syntax tree for trading rules:
//! - `Operand`: What can be compared (price fields, constants, indicators)
//! - `IndicatorCall`: An indicator reference as written, before binding
//! - `IndicatorRef`: A bound reference into the run's indicator slots
//! - `Rule`: The rule AST with comparison, composite, and temporal variants
//!
//! `Display` renders the canonical DSL text, which parses back to an equal rule.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Open,
    High,
    Low,
    Close,
    Volume,
    Constant(f64),
    /// Unresolved reference produced by the parser.
    Reference(IndicatorCall),
    /// Reference bound to an indicator slot by the strategy model.
    Indicator(IndicatorRef),
}

/// An indicator operand exactly as it appeared in the rule text:
/// `fast`, `SMA(20)`, `BOLLINGER(20,2).upper`, `bands.lower`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorCall {
    pub name: String,
    /// `None` when written without parentheses.
    pub args: Option<Vec<f64>>,
    pub output: Option<String>,
    /// Character offset in the rule text, for error messages.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRef {
    pub slot: usize,
    pub output: usize,
    /// Canonical text, e.g. `BOLLINGER(20,2).upper`.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    CrossAbove {
        left: Operand,
        right: Operand,
    },
    CrossBelow {
        left: Operand,
        right: Operand,
    },
    Above {
        left: Operand,
        right: Operand,
    },
    Below {
        left: Operand,
        right: Operand,
    },
    Between {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    Equals {
        left: Operand,
        right: Operand,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
    Consecutive {
        rule: Box<Rule>,
        count: usize,
    },
    AnyOf {
        rule: Box<Rule>,
        count: usize,
    },
}

impl Rule {
    /// Rebuild the rule with every operand passed through `f`.
    pub fn try_map_operands<E, F>(&self, f: &mut F) -> Result<Rule, E>
    where
        F: FnMut(&Operand) -> Result<Operand, E>,
    {
        Ok(match self {
            Rule::CrossAbove { left, right } => Rule::CrossAbove {
                left: f(left)?,
                right: f(right)?,
            },
            Rule::CrossBelow { left, right } => Rule::CrossBelow {
                left: f(left)?,
                right: f(right)?,
            },
            Rule::Above { left, right } => Rule::Above {
                left: f(left)?,
                right: f(right)?,
            },
            Rule::Below { left, right } => Rule::Below {
                left: f(left)?,
                right: f(right)?,
            },
            Rule::Equals { left, right } => Rule::Equals {
                left: f(left)?,
                right: f(right)?,
            },
            Rule::Between {
                operand,
                lower,
                upper,
            } => Rule::Between {
                operand: f(operand)?,
                lower: *lower,
                upper: *upper,
            },
            Rule::And(rules) => Rule::And(
                rules
                    .iter()
                    .map(|r| r.try_map_operands(f))
                    .collect::<Result<_, _>>()?,
            ),
            Rule::Or(rules) => Rule::Or(
                rules
                    .iter()
                    .map(|r| r.try_map_operands(f))
                    .collect::<Result<_, _>>()?,
            ),
            Rule::Not(rule) => Rule::Not(Box::new(rule.try_map_operands(f)?)),
            Rule::Consecutive { rule, count } => Rule::Consecutive {
                rule: Box::new(rule.try_map_operands(f)?),
                count: *count,
            },
            Rule::AnyOf { rule, count } => Rule::AnyOf {
                rule: Box::new(rule.try_map_operands(f)?),
                count: *count,
            },
        })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Open => write!(f, "open"),
            Operand::High => write!(f, "high"),
            Operand::Low => write!(f, "low"),
            Operand::Close => write!(f, "close"),
            Operand::Volume => write!(f, "volume"),
            Operand::Constant(v) => write!(f, "{v}"),
            Operand::Reference(call) => write!(f, "{call}"),
            Operand::Indicator(r) => write!(f, "{}", r.label),
        }
    }
}

impl fmt::Display for IndicatorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(args) = &self.args {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            write!(f, "({})", args.join(","))?;
        }
        if let Some(output) = &self.output {
            write!(f, ".{output}")?;
        }
        Ok(())
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, keyword: &str, rules: &[Rule]) -> fmt::Result {
    write!(f, "{keyword}(")?;
    for (i, rule) in rules.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{rule}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::CrossAbove { left, right } => write!(f, "CROSS_ABOVE({left}, {right})"),
            Rule::CrossBelow { left, right } => write!(f, "CROSS_BELOW({left}, {right})"),
            Rule::Above { left, right } => write!(f, "ABOVE({left}, {right})"),
            Rule::Below { left, right } => write!(f, "BELOW({left}, {right})"),
            Rule::Equals { left, right } => write!(f, "EQUALS({left}, {right})"),
            Rule::Between {
                operand,
                lower,
                upper,
            } => write!(f, "BETWEEN({operand}, {lower}, {upper})"),
            Rule::And(rules) => write_list(f, "AND", rules),
            Rule::Or(rules) => write_list(f, "OR", rules),
            Rule::Not(rule) => write!(f, "NOT({rule})"),
            Rule::Consecutive { rule, count } => write!(f, "CONSECUTIVE({rule}, {count})"),
            Rule::AnyOf { rule, count } => write!(f, "ANY_OF({rule}, {count})"),
        }
    }
}
