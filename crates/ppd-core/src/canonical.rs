//! # Canonical Forms
//!
//! Two expressions can be syntactically different and still mean the same
//! thing (`a = b` vs `b = a`, `1 + x` vs `x + 1`). The optimizer needs a
//! cheap, deterministic notion of equivalence to decide whether a rewrite
//! actually changed anything: too strict and plans get revisited forever, too
//! lax and rewrites are lost. The canonical form here constant-folds first,
//! then orders the operands of commutative operators by a fixed sort key.
//!
//! The sort key (symbol reference count, rendered length, rendered text) is
//! shared with the equality inference, which uses it to pick stable class
//! representatives.

use crate::expr::{ComparisonOp, Expression, ScalarValue};
use crate::interpreter;
use crate::types::{Type, TypeAnalyzer, TypeProvider};

/// Ordering key for expressions: prefers fewer symbol references, then
/// smaller renderings, then lexicographic. Total and deterministic.
pub fn canonical_sort_key(expr: &Expression) -> (usize, usize, String) {
    let rendered = expr.to_string();
    (expr.all_symbols().len(), rendered.len(), rendered)
}

/// Rewrite `expr` into canonical form: constant folding plus deterministic
/// ordering of commutative operands.
pub fn canonicalize(expr: &Expression) -> Expression {
    order_commutative(&interpreter::optimize(expr))
}

fn order_commutative(expr: &Expression) -> Expression {
    match expr {
        Expression::Symbol(_) | Expression::Literal(_) => expr.clone(),
        Expression::Comparison { op, left, right } => {
            let mut left = order_commutative(left);
            let mut right = order_commutative(right);
            if op.is_commutative() && canonical_sort_key(&right) < canonical_sort_key(&left) {
                std::mem::swap(&mut left, &mut right);
            }
            Expression::Comparison {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expression::Arithmetic { op, left, right } => {
            let mut left = order_commutative(left);
            let mut right = order_commutative(right);
            if op.is_commutative() && canonical_sort_key(&right) < canonical_sort_key(&left) {
                std::mem::swap(&mut left, &mut right);
            }
            Expression::Arithmetic {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expression::And(terms) => {
            let mut terms: Vec<Expression> = terms.iter().map(order_commutative).collect();
            terms.sort_by_key(canonical_sort_key);
            terms.dedup();
            Expression::And(terms)
        }
        Expression::Or(terms) => {
            let mut terms: Vec<Expression> = terms.iter().map(order_commutative).collect();
            terms.sort_by_key(canonical_sort_key);
            terms.dedup();
            Expression::Or(terms)
        }
        Expression::Not(operand) => Expression::Not(Box::new(order_commutative(operand))),
        Expression::IsNull(operand) => Expression::IsNull(Box::new(order_commutative(operand))),
        Expression::Function { name, args } => Expression::Function {
            name: name.clone(),
            args: args.iter().map(order_commutative).collect(),
        },
        Expression::Cast { expr: inner, target } => Expression::Cast {
            expr: Box::new(order_commutative(inner)),
            target: *target,
        },
        // Canonicalizing inside a Try could reorder an error-producing
        // computation; leave the body alone.
        Expression::Try(_) => expr.clone(),
    }
}

/// Structural equivalence after canonicalization.
pub fn are_expressions_equivalent(left: &Expression, right: &Expression) -> bool {
    canonicalize(left) == canonicalize(right)
}

/// Remove no-op and lossless casts from comparisons: `CAST(x AS t) op lit`
/// becomes `x op lit'` when the literal converts to the type of `x` without
/// loss. Recurses through boolean structure but not into opaque subtrees.
pub fn unwrap_casts(
    analyzer: &TypeAnalyzer,
    types: &TypeProvider,
    expr: &Expression,
) -> Expression {
    match expr {
        Expression::And(terms) => {
            Expression::And(terms.iter().map(|t| unwrap_casts(analyzer, types, t)).collect())
        }
        Expression::Or(terms) => {
            Expression::Or(terms.iter().map(|t| unwrap_casts(analyzer, types, t)).collect())
        }
        Expression::Not(operand) => {
            Expression::Not(Box::new(unwrap_casts(analyzer, types, operand)))
        }
        Expression::Comparison { op, left, right } => {
            if let Some(rewritten) = try_unwrap_comparison(analyzer, types, *op, left, right) {
                return rewritten;
            }
            if let Some(rewritten) = try_unwrap_comparison(analyzer, types, flip(*op), right, left)
            {
                return rewritten;
            }
            expr.clone()
        }
        _ => expr.clone(),
    }
}

fn flip(op: ComparisonOp) -> ComparisonOp {
    match op {
        ComparisonOp::Lt => ComparisonOp::Gt,
        ComparisonOp::LtEq => ComparisonOp::GtEq,
        ComparisonOp::Gt => ComparisonOp::Lt,
        ComparisonOp::GtEq => ComparisonOp::LtEq,
        other => other,
    }
}

fn try_unwrap_comparison(
    analyzer: &TypeAnalyzer,
    types: &TypeProvider,
    op: ComparisonOp,
    left: &Expression,
    right: &Expression,
) -> Option<Expression> {
    let (inner, target) = match left {
        Expression::Cast { expr, target } => (expr.as_ref(), *target),
        _ => return None,
    };
    let literal = right.literal_value()?;
    let source_type = analyzer.get_type(types, inner);
    if source_type == Type::Unknown {
        return None;
    }
    if source_type == target {
        return Some(Expression::comparison(op, inner.clone(), right.clone()));
    }
    let converted = convert_literal(literal, source_type)?;
    Some(Expression::comparison(
        op,
        inner.clone(),
        Expression::Literal(converted),
    ))
}

/// Lossless conversion of a literal into `target`, or `None`.
fn convert_literal(value: &ScalarValue, target: Type) -> Option<ScalarValue> {
    if value.value_type() == target {
        return Some(value.clone());
    }
    match (value, target) {
        (ScalarValue::Double(d), Type::Bigint) => {
            let v = d.0;
            (v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64)
                .then(|| ScalarValue::Bigint(v as i64))
        }
        (ScalarValue::Bigint(v), Type::Double) => {
            let d = *v as f64;
            (d as i64 == *v).then(|| ScalarValue::Double(ordered_float::OrderedFloat(d)))
        }
        _ => None,
    }
}
