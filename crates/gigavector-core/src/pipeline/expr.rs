//! Filter and rerank expression parsing and evaluation.
//!
//! Expressions are parsed once when a pipeline is built and evaluated per
//! candidate. Evaluation is total: missing metadata keys, bad coercions
//! and division by zero produce `Null`/zero rather than errors, so a
//! malformed expression can demote candidates but never fail a query.

use pest::iterators::Pair;
use pest::Parser as PestParser;
use pest_derive::Parser;

use crate::error::{Error, Result};
use crate::store::Metadata;

#[derive(Parser)]
#[grammar = "pipeline/expr.pest"]
struct ExprParser;

/// Binary operators, in evaluation precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parsed expression tree.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Number(f64),
    Str(String),
    /// The candidate's current score.
    Score,
    /// Metadata projection; falls back to the identifier's own text when
    /// the key is absent, so `lang = en` reads naturally.
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    /// Numeric view; strings coerce when parseable, everything else is 0.
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Num(n) => *n,
            Self::Str(s) => s.parse().unwrap_or(0.0),
            Self::Bool(b) => f64::from(*b),
            Self::Null => 0.0,
        }
    }

    /// Truthiness for filter phases.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Num(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Null => false,
        }
    }

    fn coerced_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
            Self::Bool(b) => Some(f64::from(*b)),
            Self::Null => None,
        }
    }
}

impl Expr {
    /// Parses an expression string.
    ///
    /// # Errors
    ///
    /// Returns `Expr` with the parser's message on invalid input.
    pub fn parse(input: &str) -> Result<Self> {
        let mut pairs = ExprParser::parse(Rule::expression, input)
            .map_err(|e| Error::Expr(format!("failed to parse '{input}': {e}")))?;
        let expression = pairs
            .next()
            .ok_or_else(|| Error::Expr(format!("empty expression '{input}'")))?;
        let or_expr = expression
            .into_inner()
            .find(|p| p.as_rule() == Rule::or_expr)
            .ok_or_else(|| Error::Expr(format!("empty expression '{input}'")))?;
        Ok(Self::from_or(or_expr))
    }

    fn from_or(pair: Pair<'_, Rule>) -> Self {
        Self::fold_binary(pair, |rule| match rule {
            Rule::or_op => Some(BinOp::Or),
            _ => None,
        })
    }

    fn fold_binary(pair: Pair<'_, Rule>, op_of: fn(Rule) -> Option<BinOp>) -> Self {
        let mut inner = pair.into_inner();
        let first = inner.next().expect("binary rule has an operand");
        let mut expr = Self::from_pair(first);
        let mut pending = None;
        for item in inner {
            if let Some(op) = op_of(item.as_rule()) {
                pending = Some(op);
            } else if let Some(op) = pending.take() {
                expr = Self::Binary(op, Box::new(expr), Box::new(Self::from_pair(item)));
            }
        }
        expr
    }

    fn from_pair(pair: Pair<'_, Rule>) -> Self {
        match pair.as_rule() {
            Rule::or_expr => Self::from_or(pair),
            Rule::and_expr => Self::fold_binary(pair, |rule| match rule {
                Rule::and_op => Some(BinOp::And),
                _ => None,
            }),
            Rule::not_expr => {
                let mut inner = pair.into_inner();
                let first = inner.next().expect("not_expr has an operand");
                if first.as_rule() == Rule::not_op {
                    let operand = inner.next().expect("not_op has an operand");
                    Self::Unary(UnaryOp::Not, Box::new(Self::from_pair(operand)))
                } else {
                    Self::from_pair(first)
                }
            }
            Rule::comparison => {
                let mut inner = pair.into_inner();
                let left = Self::from_pair(inner.next().expect("comparison has an operand"));
                match (inner.next(), inner.next()) {
                    (Some(op), Some(right)) => {
                        let op = match op.as_str() {
                            "==" | "=" => BinOp::Eq,
                            "!=" => BinOp::Ne,
                            "<=" => BinOp::Le,
                            ">=" => BinOp::Ge,
                            "<" => BinOp::Lt,
                            _ => BinOp::Gt,
                        };
                        Self::Binary(op, Box::new(left), Box::new(Self::from_pair(right)))
                    }
                    _ => left,
                }
            }
            Rule::sum => Self::fold_binary_by_text(pair),
            Rule::product => Self::fold_binary_by_text(pair),
            Rule::unary => {
                let mut inner = pair.into_inner();
                let first = inner.next().expect("unary has an operand");
                if first.as_rule() == Rule::neg_op {
                    let operand = inner.next().expect("neg_op has an operand");
                    Self::Unary(UnaryOp::Neg, Box::new(Self::from_pair(operand)))
                } else {
                    Self::from_pair(first)
                }
            }
            Rule::atom | Rule::group => {
                let inner = pair
                    .into_inner()
                    .next()
                    .expect("atom wraps a single value");
                Self::from_pair(inner)
            }
            Rule::number => Self::Number(pair.as_str().parse().unwrap_or(0.0)),
            Rule::string => {
                let text = pair.as_str();
                Self::Str(text[1..text.len() - 1].to_string())
            }
            Rule::score_var => Self::Score,
            Rule::ident => Self::Ident(pair.as_str().to_string()),
            other => unreachable!("unexpected rule {other:?}"),
        }
    }

    fn fold_binary_by_text(pair: Pair<'_, Rule>) -> Self {
        let mut inner = pair.into_inner();
        let first = inner.next().expect("binary rule has an operand");
        let mut expr = Self::from_pair(first);
        let mut pending: Option<BinOp> = None;
        for item in inner {
            match item.as_rule() {
                Rule::add_op | Rule::mul_op => {
                    pending = Some(match item.as_str() {
                        "+" => BinOp::Add,
                        "-" => BinOp::Sub,
                        "*" => BinOp::Mul,
                        _ => BinOp::Div,
                    });
                }
                _ => {
                    if let Some(op) = pending.take() {
                        expr = Self::Binary(op, Box::new(expr), Box::new(Self::from_pair(item)));
                    }
                }
            }
        }
        expr
    }

    /// Evaluates against a candidate's score and metadata.
    pub fn eval(&self, score: f32, metadata: Option<&Metadata>) -> Value {
        match self {
            Self::Number(n) => Value::Num(*n),
            Self::Str(s) => Value::Str(s.clone()),
            Self::Score => Value::Num(f64::from(score)),
            Self::Ident(key) => match metadata.and_then(|m| m.get(key)) {
                Some(v) => Value::Str(v.clone()),
                // Bare identifiers double as string literals so equality
                // against unquoted values reads naturally.
                None => Value::Str(key.clone()),
            },
            Self::Unary(UnaryOp::Not, e) => Value::Bool(!e.eval(score, metadata).is_truthy()),
            Self::Unary(UnaryOp::Neg, e) => {
                Value::Num(-e.eval(score, metadata).as_number())
            }
            Self::Binary(op, l, r) => {
                let left = l.eval(score, metadata);
                match op {
                    BinOp::And => {
                        if !left.is_truthy() {
                            return Value::Bool(false);
                        }
                        Value::Bool(r.eval(score, metadata).is_truthy())
                    }
                    BinOp::Or => {
                        if left.is_truthy() {
                            return Value::Bool(true);
                        }
                        Value::Bool(r.eval(score, metadata).is_truthy())
                    }
                    _ => {
                        let right = r.eval(score, metadata);
                        Self::eval_scalar(*op, &left, &right)
                    }
                }
            }
        }
    }

    fn eval_scalar(op: BinOp, left: &Value, right: &Value) -> Value {
        match op {
            BinOp::Add => Value::Num(left.as_number() + right.as_number()),
            BinOp::Sub => Value::Num(left.as_number() - right.as_number()),
            BinOp::Mul => Value::Num(left.as_number() * right.as_number()),
            BinOp::Div => {
                let divisor = right.as_number();
                if divisor == 0.0 {
                    Value::Num(0.0)
                } else {
                    Value::Num(left.as_number() / divisor)
                }
            }
            BinOp::Eq => Value::Bool(Self::values_equal(left, right)),
            BinOp::Ne => Value::Bool(!Self::values_equal(left, right)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                match (left.coerced_num(), right.coerced_num()) {
                    (Some(a), Some(b)) => Value::Bool(match op {
                        BinOp::Lt => a < b,
                        BinOp::Le => a <= b,
                        BinOp::Gt => a > b,
                        _ => a >= b,
                    }),
                    _ => Value::Bool(false),
                }
            }
            BinOp::And | BinOp::Or => unreachable!("handled with short-circuiting"),
        }
    }

    fn values_equal(left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => match (left.coerced_num(), right.coerced_num()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}
