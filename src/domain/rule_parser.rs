//! Rule DSL parser.
//!
//! Recursive descent parser for the rule grammar. Converts text to an unbound
//! AST; indicator operands stay as [`IndicatorCall`]s until the strategy model
//! resolves them against the registry. Errors carry the character offset.
//! Nesting is capped at [`MAX_DEPTH`] rule levels.
//!
//! ```text
//! rule     := CMP '(' operand ',' operand ')'
//!           | BETWEEN '(' operand ',' num ',' num ')'
//!           | (AND | OR) '(' rule (',' rule)+ ')'
//!           | NOT '(' rule ')'
//!           | (CONSECUTIVE | ANY_OF) '(' rule ',' int ')'
//! CMP      := ABOVE | BELOW | CROSS_ABOVE | CROSS_BELOW | EQUALS
//! operand  := num | open | high | low | close | volume
//!           | ident [ '(' [num (',' num)*] ')' ] [ '.' ident ]
//! ```

use crate::domain::error::ParseError;
use crate::domain::rule::{IndicatorCall, Operand, Rule};

const COMPARISONS: [&str; 5] = ["CROSS_ABOVE", "CROSS_BELOW", "ABOVE", "BELOW", "EQUALS"];

/// Deepest rule nesting accepted; the outermost rule is level 1.
pub const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            let found = self.peek_word();
            Err(self.error(format!("expected '{}', found '{}'", keyword, found)))
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
            _ => {
                let found = self.peek_word();
                return Err(self.error(format!("expected identifier, found '{}'", found)));
            }
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            self.advance();
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }

        if start == self.pos {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    fn parse_count(&mut self) -> Result<usize, ParseError> {
        let start = self.pos;
        let count = self.parse_integer()?;
        if count == 0 {
            return Err(ParseError {
                message: "bar count must be at least 1".to_string(),
                position: start,
            });
        }
        Ok(count)
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            let num = self.parse_number()?;
            return Ok(Operand::Constant(num));
        }

        let position = self.pos;
        let name = self.parse_identifier()?;
        let field = match name.as_str() {
            "open" => Some(Operand::Open),
            "high" => Some(Operand::High),
            "low" => Some(Operand::Low),
            "close" => Some(Operand::Close),
            "volume" => Some(Operand::Volume),
            _ => None,
        };
        if let Some(field) = field {
            return Ok(field);
        }

        self.skip_whitespace();
        let args = if self.peek() == Some('(') {
            self.advance();
            Some(self.parse_args()?)
        } else {
            None
        };

        self.skip_whitespace();
        let output = if self.peek() == Some('.') {
            self.advance();
            Some(self.parse_identifier()?)
        } else {
            None
        };

        Ok(Operand::Reference(IndicatorCall {
            name,
            args,
            output,
            position,
        }))
    }

    /// Numeric argument list after the opening parenthesis.
    fn parse_args(&mut self) -> Result<Vec<f64>, ParseError> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_number()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(')') => {
                    self.advance();
                    return Ok(args);
                }
                Some(ch) => {
                    return Err(self.error(format!("expected ',' or ')', found '{}'", ch)));
                }
                None => return Err(self.error("expected ')', found end of input")),
            }
        }
    }

    fn parse_comparison(&mut self, keyword: &str) -> Result<Rule, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;

        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;

        Ok(match keyword {
            "CROSS_ABOVE" => Rule::CrossAbove { left, right },
            "CROSS_BELOW" => Rule::CrossBelow { left, right },
            "ABOVE" => Rule::Above { left, right },
            "BELOW" => Rule::Below { left, right },
            _ => Rule::Equals { left, right },
        })
    }

    fn parse_between(&mut self) -> Result<Rule, ParseError> {
        self.expect_keyword("BETWEEN")?;
        self.expect_char('(')?;

        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let lower = self.parse_number()?;
        self.expect_char(',')?;
        let upper = self.parse_number()?;
        self.expect_char(')')?;

        if lower > upper {
            return Err(self.error(format!(
                "BETWEEN lower bound {} exceeds upper bound {}",
                lower, upper
            )));
        }

        Ok(Rule::Between {
            operand,
            lower,
            upper,
        })
    }

    fn parse_rule(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();
        if self.depth == MAX_DEPTH {
            return Err(self.error(format!("rule nesting exceeds {MAX_DEPTH} levels")));
        }
        self.depth += 1;
        let rule = self.parse_rule_body();
        self.depth -= 1;
        rule
    }

    fn parse_rule_body(&mut self) -> Result<Rule, ParseError> {

        if let Some(keyword) = COMPARISONS.iter().copied().find(|k| self.peek_keyword(k)) {
            return self.parse_comparison(keyword);
        }
        if self.peek_keyword("BETWEEN") {
            return self.parse_between();
        }
        if self.peek_keyword("AND") {
            return Ok(Rule::And(self.parse_list("AND")?));
        }
        if self.peek_keyword("OR") {
            return Ok(Rule::Or(self.parse_list("OR")?));
        }
        if self.peek_keyword("NOT") {
            return self.parse_not();
        }
        if self.peek_keyword("CONSECUTIVE") {
            let (rule, count) = self.parse_temporal("CONSECUTIVE")?;
            return Ok(Rule::Consecutive { rule, count });
        }
        if self.peek_keyword("ANY_OF") {
            let (rule, count) = self.parse_temporal("ANY_OF")?;
            return Ok(Rule::AnyOf { rule, count });
        }

        let word = self.peek_word();
        Err(self.error(format!("expected rule, found '{}'", word)))
    }

    fn parse_list(&mut self, keyword: &str) -> Result<Vec<Rule>, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;

        let mut rules = vec![self.parse_rule()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            rules.push(self.parse_rule()?);
        }

        if rules.len() < 2 {
            return Err(self.error(format!("{} requires at least 2 rules", keyword)));
        }
        Ok(rules)
    }

    fn parse_not(&mut self) -> Result<Rule, ParseError> {
        self.expect_keyword("NOT")?;
        self.expect_char('(')?;
        let rule = self.parse_rule()?;
        self.expect_char(')')?;
        Ok(Rule::Not(Box::new(rule)))
    }

    fn parse_temporal(&mut self, keyword: &str) -> Result<(Box<Rule>, usize), ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;
        let rule = self.parse_rule()?;
        self.expect_char(',')?;
        let count = self.parse_count()?;
        self.expect_char(')')?;
        Ok((Box::new(rule), count))
    }

    fn parse(&mut self) -> Result<Rule, ParseError> {
        let rule = self.parse_rule()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after rule: '{}'",
                self.remaining()
            )));
        }
        Ok(rule)
    }
}

pub fn parse(input: &str) -> Result<Rule, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(op: &Operand) -> &IndicatorCall {
        match op {
            Operand::Reference(call) => call,
            other => panic!("expected reference, got {other:?}"),
        }
    }

    #[test]
    fn parse_above() {
        let rule = parse("ABOVE(close, 100)").unwrap();
        assert!(matches!(
            rule,
            Rule::Above {
                left: Operand::Close,
                right: Operand::Constant(100.0)
            }
        ));
    }

    #[test]
    fn parse_below_with_indicator() {
        let rule = parse("BELOW(SMA(20), SMA(50))").unwrap();
        match rule {
            Rule::Below { left, right } => {
                let l = reference(&left);
                assert_eq!(l.name, "SMA");
                assert_eq!(l.args, Some(vec![20.0]));
                assert_eq!(l.position, 6);
                assert_eq!(reference(&right).args, Some(vec![50.0]));
            }
            _ => panic!("expected Below rule"),
        }
    }

    #[test]
    fn parse_output_selection() {
        let rule = parse("BELOW(close, BOLLINGER(20, 2.5).lower)").unwrap();
        let Rule::Below { right, .. } = rule else {
            panic!("expected Below rule");
        };
        let call = reference(&right);
        assert_eq!(call.name, "BOLLINGER");
        assert_eq!(call.args, Some(vec![20.0, 2.5]));
        assert_eq!(call.output.as_deref(), Some("lower"));
    }

    #[test]
    fn parse_alias_and_bare_names() {
        let rule = parse("CROSS_ABOVE(fast, bands.upper)").unwrap();
        let Rule::CrossAbove { left, right } = rule else {
            panic!("expected CrossAbove rule");
        };
        assert_eq!(reference(&left).args, None);
        assert_eq!(reference(&right).output.as_deref(), Some("upper"));

        let rule = parse("ABOVE(OBV(), 0)").unwrap();
        let Rule::Above { left, .. } = rule else {
            panic!("expected Above rule");
        };
        assert_eq!(reference(&left).args, Some(vec![]));
    }

    #[test]
    fn parse_cross_below() {
        let rule = parse("CROSS_BELOW(close, EMA(200))").unwrap();
        assert!(matches!(rule, Rule::CrossBelow { .. }));
    }

    #[test]
    fn parse_between() {
        let rule = parse("BETWEEN(RSI(14), 30, 70)").unwrap();
        match rule {
            Rule::Between { lower, upper, .. } => {
                assert!((lower - 30.0).abs() < f64::EPSILON);
                assert!((upper - 70.0).abs() < f64::EPSILON);
            }
            _ => panic!("expected Between rule"),
        }
    }

    #[test]
    fn between_bounds_must_be_ordered() {
        assert!(parse("BETWEEN(close, 70, 30)").is_err());
    }

    #[test]
    fn parse_composites() {
        let rule =
            parse("AND(OR(ABOVE(close, 100), BELOW(close, 50)), NOT(EQUALS(volume, 0)))").unwrap();
        match rule {
            Rule::And(rules) => {
                assert_eq!(rules.len(), 2);
                assert!(matches!(rules[0], Rule::Or(_)));
                assert!(matches!(rules[1], Rule::Not(_)));
            }
            _ => panic!("expected And rule"),
        }
    }

    #[test]
    fn and_requires_two_children() {
        let err = parse("AND(ABOVE(close, 1))").unwrap_err();
        assert!(err.message.contains("at least 2"));
    }

    #[test]
    fn parse_temporal() {
        let rule = parse("CONSECUTIVE(ABOVE(close, 100), 3)").unwrap();
        assert!(matches!(rule, Rule::Consecutive { count: 3, .. }));
        let rule = parse("ANY_OF(ABOVE(close, 100), 5)").unwrap();
        assert!(matches!(rule, Rule::AnyOf { count: 5, .. }));
        assert!(parse("ANY_OF(ABOVE(close, 100), 0)").is_err());
    }

    #[test]
    fn parse_whitespace_handling() {
        let rule = parse("  ABOVE  (  close  ,  100  )  ").unwrap();
        assert!(matches!(rule, Rule::Above { .. }));
    }

    #[test]
    fn parse_price_fields() {
        for (input, expected) in [
            ("ABOVE(open, 100)", Operand::Open),
            ("ABOVE(high, 100)", Operand::High),
            ("ABOVE(low, 100)", Operand::Low),
            ("ABOVE(close, 100)", Operand::Close),
            ("ABOVE(volume, 100)", Operand::Volume),
        ] {
            match parse(input).unwrap() {
                Rule::Above { left, .. } => assert_eq!(left, expected),
                _ => panic!("expected Above rule"),
            }
        }
    }

    #[test]
    fn parse_negative_numbers() {
        let rule = parse("ABOVE(close, -100.5)").unwrap();
        assert!(matches!(
            rule,
            Rule::Above { right: Operand::Constant(v), .. } if (v + 100.5).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn error_position_points_at_problem() {
        let err = parse("ABOVE(close 100)").unwrap_err();
        assert_eq!(err.position, 12);
        assert!(err.message.contains("expected ','"));
    }

    #[test]
    fn trailing_input_rejected() {
        let err = parse("ABOVE(close, 1) extra").unwrap_err();
        assert!(err.message.contains("unexpected input"));
    }

    #[test]
    fn unknown_rule_keyword() {
        let err = parse("SOMETIMES(close, 1)").unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("SOMETIMES"));
    }

    #[test]
    fn display_round_trips() {
        for text in [
            "CROSS_ABOVE(SMA(10), SMA(30))",
            "AND(ABOVE(close, LAG(1)), NOT(BELOW(RSI(14), 30.5)))",
            "OR(CONSECUTIVE(ABOVE(fast, slow), 2), ANY_OF(EQUALS(volume, 0), 4))",
            "BETWEEN(BOLLINGER(20,2).middle, -1, 1)",
        ] {
            let rule = parse(text).unwrap();
            let again = parse(&rule.to_string()).unwrap();
            assert_eq!(
                strip_positions(&rule),
                strip_positions(&again),
                "round trip of {text}"
            );
        }
    }

    fn nested_not(levels: usize) -> String {
        let mut text = "NOT(".repeat(levels - 1);
        text.push_str("ABOVE(close, 1)");
        text.push_str(&")".repeat(levels - 1));
        text
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        assert!(parse(&nested_not(MAX_DEPTH)).is_ok());
    }

    #[test]
    fn nesting_past_the_limit_is_an_error() {
        let text = nested_not(MAX_DEPTH + 1);
        let err = parse(&text).unwrap_err();
        assert!(err.message.contains("nesting exceeds 64"));
        assert_eq!(err.position, 4 * MAX_DEPTH);

        let err = parse(&nested_not(10_000)).unwrap_err();
        assert!(err.message.contains("nesting"));
    }

    fn strip_positions(rule: &Rule) -> Rule {
        rule.try_map_operands(&mut |op| -> Result<Operand, ()> {
            Ok(match op {
                Operand::Reference(call) => Operand::Reference(IndicatorCall {
                    position: 0,
                    ..call.clone()
                }),
                other => other.clone(),
            })
        })
        .unwrap()
    }
}
