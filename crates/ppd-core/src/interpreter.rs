//! # Expression Interpreter
//!
//! Single-pass, bottom-up constant folding over the expression IR with SQL
//! three-valued logic. The folder is used in three places: simplifying the
//! predicate left at a table scan, simplifying rewritten join predicates, and
//! testing whether a predicate rejects null-padded rows when deciding if an
//! outer join can become an inner join.
//!
//! The folder is deliberately conservative: anything it cannot prove is left
//! untouched (function calls, division by zero, lossy casts). It never
//! errors.

use crate::expr::{ArithmeticOp, ComparisonOp, Expression, ScalarValue};
use crate::types::Type;
use ordered_float::OrderedFloat;

/// Fold every constant subtree of `expr`, returning the simplified
/// expression.
pub fn optimize(expr: &Expression) -> Expression {
    match expr {
        Expression::Symbol(_) | Expression::Literal(_) => expr.clone(),
        Expression::And(terms) => fold_and(terms),
        Expression::Or(terms) => fold_or(terms),
        Expression::Not(operand) => {
            let folded = optimize(operand);
            if let Some(value) = folded.literal_value() {
                match value {
                    ScalarValue::Boolean(b) => {
                        return Expression::Literal(ScalarValue::Boolean(!b));
                    }
                    ScalarValue::Null => return Expression::null_literal(),
                    _ => {}
                }
            }
            Expression::Not(Box::new(folded))
        }
        Expression::IsNull(operand) => {
            let folded = optimize(operand);
            if let Some(value) = folded.literal_value() {
                return Expression::Literal(ScalarValue::Boolean(value.is_null()));
            }
            Expression::IsNull(Box::new(folded))
        }
        Expression::Comparison { op, left, right } => {
            let left = optimize(left);
            let right = optimize(right);
            if let (Some(l), Some(r)) = (left.literal_value(), right.literal_value()) {
                if let Some(result) = evaluate_comparison(*op, l, r) {
                    return Expression::Literal(result);
                }
            }
            Expression::Comparison {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expression::Arithmetic { op, left, right } => {
            let left = optimize(left);
            let right = optimize(right);
            if let (Some(l), Some(r)) = (left.literal_value(), right.literal_value()) {
                if let Some(result) = evaluate_arithmetic(*op, l, r) {
                    return Expression::Literal(result);
                }
            }
            Expression::Arithmetic {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expression::Function { name, args } => Expression::Function {
            name: name.clone(),
            args: args.iter().map(optimize).collect(),
        },
        Expression::Cast { expr: inner, target } => {
            let folded = optimize(inner);
            if let Some(value) = folded.literal_value() {
                if let Some(converted) = cast_value(value, *target) {
                    return Expression::Literal(converted);
                }
            }
            Expression::Cast {
                expr: Box::new(folded),
                target: *target,
            }
        }
        Expression::Try(body) => {
            let folded = optimize(body);
            // A literal cannot fail at runtime, so the guard is redundant.
            if folded.literal_value().is_some() {
                return folded;
            }
            Expression::Try(Box::new(folded))
        }
    }
}

fn fold_and(terms: &[Expression]) -> Expression {
    let mut remaining = Vec::new();
    for term in terms {
        let folded = optimize(term);
        if folded.is_false_literal() {
            return Expression::false_literal();
        }
        if folded.is_true_literal() {
            continue;
        }
        match folded {
            Expression::And(inner) => remaining.extend(inner),
            other => remaining.push(other),
        }
    }
    match remaining.len() {
        0 => Expression::true_literal(),
        1 => remaining.into_iter().next().expect("non-empty"),
        _ => Expression::And(remaining),
    }
}

fn fold_or(terms: &[Expression]) -> Expression {
    let mut remaining = Vec::new();
    for term in terms {
        let folded = optimize(term);
        if folded.is_true_literal() {
            return Expression::true_literal();
        }
        if folded.is_false_literal() {
            continue;
        }
        match folded {
            Expression::Or(inner) => remaining.extend(inner),
            other => remaining.push(other),
        }
    }
    match remaining.len() {
        0 => Expression::false_literal(),
        1 => remaining.into_iter().next().expect("non-empty"),
        _ => Expression::Or(remaining),
    }
}

fn as_double(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Bigint(v) => Some(*v as f64),
        ScalarValue::Double(v) => Some(v.0),
        _ => None,
    }
}

/// Evaluate a comparison on two literal values. `None` means the values are
/// not comparable and the expression is left as-is.
fn evaluate_comparison(
    op: ComparisonOp,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Option<ScalarValue> {
    if op == ComparisonOp::IsDistinctFrom {
        // Null-safe: NULL is distinct from everything except NULL.
        let distinct = match (left, right) {
            (ScalarValue::Null, ScalarValue::Null) => false,
            (ScalarValue::Null, _) | (_, ScalarValue::Null) => true,
            _ => return compare(left, right).map(|ord| ScalarValue::Boolean(ord != std::cmp::Ordering::Equal)),
        };
        return Some(ScalarValue::Boolean(distinct));
    }
    if left.is_null() || right.is_null() {
        return Some(ScalarValue::Null);
    }
    let ord = compare(left, right)?;
    let result = match op {
        ComparisonOp::Eq => ord == std::cmp::Ordering::Equal,
        ComparisonOp::NotEq => ord != std::cmp::Ordering::Equal,
        ComparisonOp::Lt => ord == std::cmp::Ordering::Less,
        ComparisonOp::LtEq => ord != std::cmp::Ordering::Greater,
        ComparisonOp::Gt => ord == std::cmp::Ordering::Greater,
        ComparisonOp::GtEq => ord != std::cmp::Ordering::Less,
        ComparisonOp::IsDistinctFrom => unreachable!("handled above"),
    };
    Some(ScalarValue::Boolean(result))
}

fn compare(left: &ScalarValue, right: &ScalarValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (ScalarValue::Boolean(l), ScalarValue::Boolean(r)) => Some(l.cmp(r)),
        (ScalarValue::Varchar(l), ScalarValue::Varchar(r)) => Some(l.cmp(r)),
        (ScalarValue::Date(l), ScalarValue::Date(r)) => Some(l.cmp(r)),
        (ScalarValue::Bigint(l), ScalarValue::Bigint(r)) => Some(l.cmp(r)),
        _ => {
            let l = as_double(left)?;
            let r = as_double(right)?;
            l.partial_cmp(&r)
        }
    }
}

fn evaluate_arithmetic(
    op: ArithmeticOp,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Option<ScalarValue> {
    if left.is_null() || right.is_null() {
        return Some(ScalarValue::Null);
    }
    if let (ScalarValue::Bigint(l), ScalarValue::Bigint(r)) = (left, right) {
        let result = match op {
            ArithmeticOp::Add => l.checked_add(*r),
            ArithmeticOp::Sub => l.checked_sub(*r),
            ArithmeticOp::Mul => l.checked_mul(*r),
            ArithmeticOp::Div => l.checked_div(*r),
            ArithmeticOp::Mod => l.checked_rem(*r),
        };
        // Overflow and division by zero are runtime errors; leave the
        // expression unevaluated so execution reports them.
        return result.map(ScalarValue::Bigint);
    }
    let l = as_double(left)?;
    let r = as_double(right)?;
    let result = match op {
        ArithmeticOp::Add => l + r,
        ArithmeticOp::Sub => l - r,
        ArithmeticOp::Mul => l * r,
        ArithmeticOp::Div => {
            if r == 0.0 {
                return None;
            }
            l / r
        }
        ArithmeticOp::Mod => {
            if r == 0.0 {
                return None;
            }
            l % r
        }
    };
    Some(ScalarValue::Double(OrderedFloat(result)))
}

/// Lossless literal casts. Lossy conversions are left to runtime.
fn cast_value(value: &ScalarValue, target: Type) -> Option<ScalarValue> {
    if value.is_null() {
        return Some(ScalarValue::Null);
    }
    if value.value_type() == target {
        return Some(value.clone());
    }
    match (value, target) {
        (ScalarValue::Bigint(v), Type::Double) => {
            let d = *v as f64;
            (d as i64 == *v).then(|| ScalarValue::Double(OrderedFloat(d)))
        }
        (ScalarValue::Double(v), Type::Bigint) => {
            let d = v.0;
            (d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64)
                .then(|| ScalarValue::Bigint(d as i64))
        }
        _ => None,
    }
}

/// Encodes a constant value back into the expression IR, coercing numeric
/// values to the requested type when lossless.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralEncoder;

impl LiteralEncoder {
    pub fn new() -> Self {
        LiteralEncoder
    }

    pub fn to_expression(&self, value: ScalarValue, ty: Type) -> Expression {
        if value.value_type() != ty {
            if let Some(coerced) = cast_value(&value, ty) {
                return Expression::Literal(coerced);
            }
        }
        Expression::Literal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Symbol;

    fn sym(name: &str) -> Expression {
        Symbol::new(name).to_expression()
    }

    #[test]
    fn test_comparison_folds() {
        let expr = Expression::comparison(ComparisonOp::Gt, Expression::bigint(2), Expression::bigint(1));
        assert!(optimize(&expr).is_true_literal());
    }

    #[test]
    fn test_null_comparison_folds_to_null() {
        let expr = Expression::comparison(ComparisonOp::Gt, Expression::null_literal(), Expression::bigint(1));
        assert!(optimize(&expr).is_null_literal());
    }

    #[test]
    fn test_is_distinct_from_is_null_safe() {
        let expr = Expression::comparison(
            ComparisonOp::IsDistinctFrom,
            Expression::null_literal(),
            Expression::null_literal(),
        );
        assert!(optimize(&expr).is_false_literal());
    }

    #[test]
    fn test_and_short_circuits() {
        let expr = Expression::And(vec![
            Expression::false_literal(),
            Expression::comparison(ComparisonOp::Gt, sym("a"), Expression::bigint(1)),
        ]);
        assert!(optimize(&expr).is_false_literal());
    }

    #[test]
    fn test_and_keeps_null_member() {
        let expr = Expression::And(vec![Expression::true_literal(), Expression::null_literal()]);
        assert!(optimize(&expr).is_null_literal());
    }

    #[test]
    fn test_division_by_zero_is_left_unevaluated() {
        let expr = Expression::arithmetic(ArithmeticOp::Div, Expression::bigint(1), Expression::bigint(0));
        assert_eq!(optimize(&expr), expr);
    }

    #[test]
    fn test_try_of_literal_unwraps() {
        let expr = Expression::Try(Box::new(Expression::arithmetic(
            ArithmeticOp::Add,
            Expression::bigint(1),
            Expression::bigint(2),
        )));
        assert_eq!(optimize(&expr), Expression::bigint(3));
    }

    #[test]
    fn test_symbols_are_untouched() {
        let expr = Expression::comparison(ComparisonOp::Eq, sym("a"), sym("b"));
        assert_eq!(optimize(&expr), expr);
    }
}
