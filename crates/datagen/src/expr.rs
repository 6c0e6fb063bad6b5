//! Arithmetic expressions inside `${...}`.
//!
//! The grammar is deliberately small:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | path | '(' expr ')'
//! path    := IDENT ('.' IDENT)*
//! ```
//!
//! Paths resolve against variables first, then ranges. `range.min`,
//! `range.max` and `range.step` read the bounds; a bare range name draws a
//! fresh value. Anything else is rejected when the template is compiled.

use crate::error::{ConfigError, GenerationError};
use crate::number::Num;
use crate::range::RangeSpec;
use crate::registry::Registry;
use rand::Rng;
use serde_json::Value;

/// A parsed `${...}` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(Num),
    Path(Vec<String>),
    Neg(Box<Node>),
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Num),
    Ident(String),
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

/// What a path points at.
enum Target<'a> {
    Value(&'a Value),
    RangeDraw(&'a RangeSpec),
    RangeAttr(Num),
}

impl Expr {
    /// Parse the text between `${` and `}`.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConfigError::expression(source, "empty expression"));
        }

        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let root = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(ConfigError::expression(
                source,
                format!("unexpected {:?} after end of expression", token),
            ));
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check every referenced name against the registry.
    ///
    /// A lone path may resolve to any value (plain substitution); operands of
    /// arithmetic must be numeric.
    pub fn check(&self, registry: &Registry) -> Result<(), ConfigError> {
        match &self.root {
            Node::Path(path) => self.check_path(path, registry, false),
            node => self.check_node(node, registry),
        }
    }

    fn check_node(&self, node: &Node, registry: &Registry) -> Result<(), ConfigError> {
        match node {
            Node::Number(_) => Ok(()),
            Node::Path(path) => self.check_path(path, registry, true),
            Node::Neg(inner) => self.check_node(inner, registry),
            Node::Binary { lhs, rhs, .. } => {
                self.check_node(lhs, registry)?;
                self.check_node(rhs, registry)
            }
        }
    }

    fn check_path(
        &self,
        path: &[String],
        registry: &Registry,
        numeric: bool,
    ) -> Result<(), ConfigError> {
        match lookup(path, registry) {
            None => Err(ConfigError::UndefinedReference {
                kind: "variable or range",
                name: path.join("."),
            }),
            Some(Target::Value(value)) if numeric && Num::from_value(value).is_none() => {
                Err(ConfigError::expression(
                    &self.source,
                    format!("'{}' is not numeric", path.join(".")),
                ))
            }
            Some(_) => Ok(()),
        }
    }

    /// Evaluate against the registry.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        let num = match &self.root {
            Node::Path(path) => match lookup(path, registry) {
                Some(Target::Value(value)) => return Ok(value.clone()),
                Some(Target::RangeDraw(range)) => range.sample(rng),
                Some(Target::RangeAttr(n)) => n,
                None => return Err(GenerationError::NonNumeric(path.join("."))),
            },
            node => self.eval_num(node, registry, rng)?,
        };
        num.to_value()
            .ok_or_else(|| GenerationError::InvalidNumber(self.source.clone()))
    }

    fn eval_num<R: Rng + ?Sized>(
        &self,
        node: &Node,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<Num, GenerationError> {
        match node {
            Node::Number(n) => Ok(*n),
            Node::Path(path) => match lookup(path, registry) {
                Some(Target::Value(value)) => {
                    Num::from_value(value).ok_or_else(|| GenerationError::NonNumeric(path.join(".")))
                }
                Some(Target::RangeDraw(range)) => Ok(range.sample(rng)),
                Some(Target::RangeAttr(n)) => Ok(n),
                None => Err(GenerationError::NonNumeric(path.join("."))),
            },
            Node::Neg(inner) => match self.eval_num(inner, registry, rng)? {
                Num::Int(i) => i
                    .checked_neg()
                    .map(Num::Int)
                    .ok_or_else(|| GenerationError::Overflow(self.source.clone())),
                Num::Float(f) => Ok(Num::Float(-f)),
            },
            Node::Binary { op, lhs, rhs } => {
                let lhs = self.eval_num(lhs, registry, rng)?;
                let rhs = self.eval_num(rhs, registry, rng)?;
                self.apply(*op, lhs, rhs)
            }
        }
    }

    fn apply(&self, op: BinOp, lhs: Num, rhs: Num) -> Result<Num, GenerationError> {
        let overflow = || GenerationError::Overflow(self.source.clone());
        match (lhs, rhs) {
            (Num::Int(a), Num::Int(b)) => match op {
                BinOp::Add => a.checked_add(b).map(Num::Int).ok_or_else(overflow),
                BinOp::Sub => a.checked_sub(b).map(Num::Int).ok_or_else(overflow),
                BinOp::Mul => a.checked_mul(b).map(Num::Int).ok_or_else(overflow),
                BinOp::Div if b == 0 => Err(GenerationError::DivisionByZero(self.source.clone())),
                // Exact integer division stays an integer
                BinOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b).map(Num::Int).ok_or_else(overflow),
                BinOp::Div => Ok(Num::Float(a as f64 / b as f64)),
            },
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                match op {
                    BinOp::Add => Ok(Num::Float(a + b)),
                    BinOp::Sub => Ok(Num::Float(a - b)),
                    BinOp::Mul => Ok(Num::Float(a * b)),
                    BinOp::Div if b == 0.0 => {
                        Err(GenerationError::DivisionByZero(self.source.clone()))
                    }
                    BinOp::Div => Ok(Num::Float(a / b)),
                }
            }
        }
    }
}

fn lookup<'a>(path: &[String], registry: &'a Registry) -> Option<Target<'a>> {
    let (root, rest) = path.split_first()?;

    if let Some(value) = registry.variable(root) {
        let mut current = value;
        for segment in rest {
            current = current.get(segment.as_str())?;
        }
        return Some(Target::Value(current));
    }

    let range = registry.range(root)?;
    match rest {
        [] => Some(Target::RangeDraw(range)),
        [attr] => range.attribute(attr).map(Target::RangeAttr),
        _ => None,
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConfigError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let num = Num::parse_literal(&literal).ok_or_else(|| {
                    ConfigError::expression(source, format!("invalid number '{}'", literal))
                })?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ConfigError::expression(
                    source,
                    format!("unsupported character '{}'", other),
                ))
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::expression(self.source, message)
    }

    fn expr(&mut self) -> Result<Node, ConfigError> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.term()?;
            node = Node::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Node, ConfigError> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            node = Node::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Node, ConfigError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, ConfigError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(segment)) => path.push(segment),
                        _ => return Err(self.error("expected attribute name after '.'")),
                    }
                }
                Ok(Node::Path(path))
            }
            Some(Token::LParen) => {
                let node = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(node),
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(token) => Err(self.error(format!("unexpected {:?}", token))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::collections::HashMap;

    fn registry() -> Registry {
        let mut ranges = HashMap::new();
        ranges.insert(
            "price_range".to_string(),
            RangeSpec::new(Num::Int(1050), Num::Int(5000), Some(Num::Int(50))),
        );
        ranges.insert(
            "zero_to_one".to_string(),
            RangeSpec::new(Num::Int(0), Num::Int(0), None),
        );
        let mut variables = HashMap::new();
        variables.insert("tax".to_string(), json!(2));
        variables.insert("api_version".to_string(), json!("v2"));
        variables.insert("limits".to_string(), json!({"page": {"size": 25}}));
        Registry::new(HashMap::new(), HashMap::new(), ranges, variables).unwrap()
    }

    fn eval(src: &str) -> Result<Value, GenerationError> {
        let registry = registry();
        let expr = Expr::parse(src).unwrap();
        expr.check(&registry).unwrap();
        expr.evaluate(&registry, &mut StdRng::seed_from_u64(3))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("10 - 4 - 3").unwrap(), json!(3));
        assert_eq!(eval("-2 * 3").unwrap(), json!(-6));
    }

    #[test]
    fn test_range_attribute_arithmetic() {
        assert_eq!(eval("price_range.min / 100").unwrap(), json!(10.5));
        assert_eq!(eval("price_range.max / 100").unwrap(), json!(50));
        assert_eq!(eval("price_range.step * tax").unwrap(), json!(100));
    }

    #[test]
    fn test_bare_range_draws_value() {
        let v = eval("price_range").unwrap().as_i64().unwrap();
        assert!((1050..=5000).contains(&v));
    }

    #[test]
    fn test_variable_substitution_keeps_type() {
        assert_eq!(eval("api_version").unwrap(), json!("v2"));
        assert_eq!(eval("limits.page.size").unwrap(), json!(25));
    }

    #[test]
    fn test_division_by_zero_is_generation_error() {
        assert!(matches!(
            eval("tax / 0"),
            Err(GenerationError::DivisionByZero(_))
        ));
        assert!(matches!(
            eval("100 / zero_to_one"),
            Err(GenerationError::DivisionByZero(_))
        ));
        assert!(matches!(
            eval("1.5 / 0"),
            Err(GenerationError::DivisionByZero(_))
        ));
    }

    #[test]
    fn test_overflow_is_generation_error() {
        assert!(matches!(
            eval("9223372036854775807 + 1"),
            Err(GenerationError::Overflow(_))
        ));
    }

    #[test]
    fn test_float_operand_makes_float() {
        assert_eq!(eval("tax * 1.5").unwrap(), json!(3.0));
    }

    #[test]
    fn test_parse_errors() {
        for src in ["", "1 +", "(1 + 2", "a..b", "a ** 2", "price_range.min % 2", "1 2"] {
            assert!(Expr::parse(src).is_err(), "expected parse error for {:?}", src);
        }
    }

    #[test]
    fn test_check_rejects_unknown_names() {
        let registry = registry();
        for src in ["missing", "price_range.avg", "price_range.min.x", "limits.page.count"] {
            let expr = Expr::parse(src).unwrap();
            assert!(
                matches!(
                    expr.check(&registry),
                    Err(ConfigError::UndefinedReference { .. })
                ),
                "expected undefined reference for {:?}",
                src
            );
        }
    }

    #[test]
    fn test_check_rejects_arithmetic_on_strings() {
        let registry = registry();
        let expr = Expr::parse("api_version + 1").unwrap();
        assert!(matches!(
            expr.check(&registry),
            Err(ConfigError::InvalidExpression { .. })
        ));
    }
}
