//! # Scalar Expression IR
//!
//! This module defines the expression tree used everywhere in the optimizer:
//! filter predicates, join conditions, projection assignments, and the
//! equality classes of the inference engine all hold `Expression` values.
//!
//! ## Design Points
//!
//! - **Structural identity**: expressions derive `Eq` and `Hash` so they can
//!   key hash maps (the equality inference unions expressions, not symbols).
//!   `OrderedFloat` keeps `Double` literals hashable.
//! - **Flat conjunctions**: `And`/`Or` hold a `Vec` of operands rather than a
//!   nested binary tree. Predicate decomposition works on conjunct lists, and
//!   a flat representation avoids rebalancing churn during rewrites.
//! - **Opaque `Try`**: a `Try` wrapper marks a subtree whose evaluation
//!   errors are converted to NULL at runtime. Symbol substitution must not
//!   reach into it, because inlining could move an error-producing
//!   computation across the guard. `inline_symbols` leaves `Try` bodies
//!   untouched.
//! - **Deterministic rendering**: `Display` produces a stable SQL-ish string.
//!   The equality inference orders class members by (symbol count, rendered
//!   length, rendered text), so the rendering doubles as a tiebreaker.

use crate::types::Type;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// An opaque column identifier within a plan. Symbols are global to a plan:
/// two occurrences of the same name refer to the same column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Reference this symbol as an expression.
    pub fn to_expression(&self) -> Expression {
        Expression::Symbol(self.clone())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Constant values appearing in expressions.
///
/// `Double` is wrapped in `OrderedFloat` so that literal values can live in
/// `Eq + Hash` contexts (equality classes, assignment maps).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL.
    Null,
    Boolean(bool),
    Bigint(i64),
    Double(OrderedFloat<f64>),
    Varchar(String),
    /// Days since the Unix epoch.
    Date(i32),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// The natural type of this value. NULL has no natural type.
    pub fn value_type(&self) -> Type {
        match self {
            ScalarValue::Null => Type::Unknown,
            ScalarValue::Boolean(_) => Type::Boolean,
            ScalarValue::Bigint(_) => Type::Bigint,
            ScalarValue::Double(_) => Type::Double,
            ScalarValue::Varchar(_) => Type::Varchar,
            ScalarValue::Date(_) => Type::Date,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Null-safe equality test (`IS DISTINCT FROM`). Never yields NULL.
    IsDistinctFrom,
}

impl ComparisonOp {
    /// True for operators whose operand order does not matter.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ComparisonOp::Eq | ComparisonOp::NotEq | ComparisonOp::IsDistinctFrom
        )
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
            ComparisonOp::IsDistinctFrom => "IS DISTINCT FROM",
        };
        write!(f, "{}", s)
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, ArithmeticOp::Add | ArithmeticOp::Mul)
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        };
        write!(f, "{}", s)
    }
}

/// The scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    /// Reference to a column by symbol.
    Symbol(Symbol),
    /// Constant literal.
    Literal(ScalarValue),
    /// Binary comparison (`a = b`, `price > 100`, ...).
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Binary arithmetic (`a + 1`, `x * y`, ...).
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Conjunction over a flat operand list.
    And(Vec<Expression>),
    /// Disjunction over a flat operand list.
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// `expr IS NULL`.
    IsNull(Box<Expression>),
    /// Named function call. Determinism is resolved through the function
    /// registry by name.
    Function { name: String, args: Vec<Expression> },
    /// `CAST(expr AS type)`.
    Cast { expr: Box<Expression>, target: Type },
    /// Error-suppressing wrapper. Opaque to symbol inlining.
    Try(Box<Expression>),
}

impl Expression {
    pub fn true_literal() -> Expression {
        Expression::Literal(ScalarValue::Boolean(true))
    }

    pub fn false_literal() -> Expression {
        Expression::Literal(ScalarValue::Boolean(false))
    }

    pub fn null_literal() -> Expression {
        Expression::Literal(ScalarValue::Null)
    }

    pub fn bigint(value: i64) -> Expression {
        Expression::Literal(ScalarValue::Bigint(value))
    }

    pub fn comparison(op: ComparisonOp, left: Expression, right: Expression) -> Expression {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Shorthand for an equality comparison.
    pub fn equality(left: Expression, right: Expression) -> Expression {
        Expression::comparison(ComparisonOp::Eq, left, right)
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Expression {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_true_literal(&self) -> bool {
        matches!(self, Expression::Literal(ScalarValue::Boolean(true)))
    }

    pub fn is_false_literal(&self) -> bool {
        matches!(self, Expression::Literal(ScalarValue::Boolean(false)))
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expression::Literal(ScalarValue::Null))
    }

    /// The literal value, if this expression is a literal.
    pub fn literal_value(&self) -> Option<&ScalarValue> {
        match self {
            Expression::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Direct children of this node, in syntactic order.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Symbol(_) | Expression::Literal(_) => vec![],
            Expression::Comparison { left, right, .. }
            | Expression::Arithmetic { left, right, .. } => vec![left, right],
            Expression::And(terms) | Expression::Or(terms) => terms.iter().collect(),
            Expression::Not(operand) | Expression::IsNull(operand) | Expression::Try(operand) => {
                vec![operand]
            }
            Expression::Function { args, .. } => args.iter().collect(),
            Expression::Cast { expr, .. } => vec![expr],
        }
    }

    /// Pre-order traversal over this expression and all sub-expressions,
    /// including the expression itself.
    pub fn pre_order(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }

    /// Rebuild this node with each direct child replaced by `f(child)`.
    /// Leaves are returned unchanged. Callers that must keep `Try` bodies
    /// opaque handle the `Try` variant before delegating here.
    pub fn map_children(&self, mut f: impl FnMut(&Expression) -> Expression) -> Expression {
        match self {
            Expression::Symbol(_) | Expression::Literal(_) => self.clone(),
            Expression::Comparison { op, left, right } => Expression::Comparison {
                op: *op,
                left: Box::new(f(left)),
                right: Box::new(f(right)),
            },
            Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
                op: *op,
                left: Box::new(f(left)),
                right: Box::new(f(right)),
            },
            Expression::And(terms) => Expression::And(terms.iter().map(&mut f).collect()),
            Expression::Or(terms) => Expression::Or(terms.iter().map(&mut f).collect()),
            Expression::Not(operand) => Expression::Not(Box::new(f(operand))),
            Expression::IsNull(operand) => Expression::IsNull(Box::new(f(operand))),
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args.iter().map(&mut f).collect(),
            },
            Expression::Cast { expr, target } => Expression::Cast {
                expr: Box::new(f(expr)),
                target: *target,
            },
            Expression::Try(body) => Expression::Try(Box::new(f(body))),
        }
    }

    /// Every symbol referenced by this expression, deduplicated, in a
    /// deterministic order.
    pub fn unique_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        for e in self.pre_order() {
            if let Expression::Symbol(s) = e {
                out.insert(s.clone());
            }
        }
        out
    }

    /// Every symbol reference, with duplicates, in pre-order.
    pub fn all_symbols(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        for e in self.pre_order() {
            if let Expression::Symbol(s) = e {
                out.push(s.clone());
            }
        }
        out
    }

    /// True if any sub-expression is a `Try` wrapper.
    pub fn contains_try(&self) -> bool {
        self.pre_order().any(|e| matches!(e, Expression::Try(_)))
    }

    /// Rewrite symbol references according to `mapping`, recursing into every
    /// subtree except `Try` bodies, which stay opaque. Symbols absent from
    /// the mapping are left as-is.
    pub fn inline_symbols(&self, mapping: &HashMap<Symbol, Expression>) -> Expression {
        match self {
            Expression::Symbol(s) => mapping.get(s).cloned().unwrap_or_else(|| self.clone()),
            Expression::Literal(_) => self.clone(),
            Expression::Comparison { op, left, right } => Expression::Comparison {
                op: *op,
                left: Box::new(left.inline_symbols(mapping)),
                right: Box::new(right.inline_symbols(mapping)),
            },
            Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
                op: *op,
                left: Box::new(left.inline_symbols(mapping)),
                right: Box::new(right.inline_symbols(mapping)),
            },
            Expression::And(terms) => {
                Expression::And(terms.iter().map(|t| t.inline_symbols(mapping)).collect())
            }
            Expression::Or(terms) => {
                Expression::Or(terms.iter().map(|t| t.inline_symbols(mapping)).collect())
            }
            Expression::Not(operand) => Expression::Not(Box::new(operand.inline_symbols(mapping))),
            Expression::IsNull(operand) => {
                Expression::IsNull(Box::new(operand.inline_symbols(mapping)))
            }
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.inline_symbols(mapping)).collect(),
            },
            Expression::Cast { expr, target } => Expression::Cast {
                expr: Box::new(expr.inline_symbols(mapping)),
                target: *target,
            },
            // Try bodies are opaque to inlining.
            Expression::Try(_) => self.clone(),
        }
    }

    /// Replace every occurrence of `target` (as a whole subtree) with
    /// `replacement`. Used by the equality inference to derive new class
    /// members; candidates never contain `Try`, so this recurses everywhere.
    pub fn replace_subexpression(
        &self,
        target: &Expression,
        replacement: &Expression,
    ) -> Expression {
        if self == target {
            return replacement.clone();
        }
        match self {
            Expression::Symbol(_) | Expression::Literal(_) => self.clone(),
            Expression::Comparison { op, left, right } => Expression::Comparison {
                op: *op,
                left: Box::new(left.replace_subexpression(target, replacement)),
                right: Box::new(right.replace_subexpression(target, replacement)),
            },
            Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
                op: *op,
                left: Box::new(left.replace_subexpression(target, replacement)),
                right: Box::new(right.replace_subexpression(target, replacement)),
            },
            Expression::And(terms) => Expression::And(
                terms
                    .iter()
                    .map(|t| t.replace_subexpression(target, replacement))
                    .collect(),
            ),
            Expression::Or(terms) => Expression::Or(
                terms
                    .iter()
                    .map(|t| t.replace_subexpression(target, replacement))
                    .collect(),
            ),
            Expression::Not(operand) => Expression::Not(Box::new(
                operand.replace_subexpression(target, replacement),
            )),
            Expression::IsNull(operand) => Expression::IsNull(Box::new(
                operand.replace_subexpression(target, replacement),
            )),
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.replace_subexpression(target, replacement))
                    .collect(),
            },
            Expression::Cast { expr, target: ty } => Expression::Cast {
                expr: Box::new(expr.replace_subexpression(target, replacement)),
                target: *ty,
            },
            Expression::Try(body) => Expression::Try(Box::new(
                body.replace_subexpression(target, replacement),
            )),
        }
    }
}

/// Pre-order iterator over an expression tree.
pub struct PreOrder<'a> {
    stack: Vec<&'a Expression>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a Expression;

    fn next(&mut self) -> Option<&'a Expression> {
        let next = self.stack.pop()?;
        let children = next.children();
        for child in children.into_iter().rev() {
            self.stack.push(child);
        }
        Some(next)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(v) => write!(f, "{}", v),
            ScalarValue::Bigint(v) => write!(f, "{}", v),
            ScalarValue::Double(v) => write!(f, "{}", v.0),
            ScalarValue::Varchar(v) => write!(f, "'{}'", v),
            ScalarValue::Date(v) => write!(f, "DATE {}", v),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Symbol(s) => write!(f, "{}", s),
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Comparison { op, left, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::And(terms) => {
                write!(f, "(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Expression::Or(terms) => {
                write!(f, "(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Expression::Not(operand) => write!(f, "(NOT {})", operand),
            Expression::IsNull(operand) => write!(f, "({} IS NULL)", operand),
            Expression::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expression::Cast { expr, target } => write!(f, "CAST({} AS {})", expr, target),
            Expression::Try(body) => write!(f, "TRY({})", body),
        }
    }
}
