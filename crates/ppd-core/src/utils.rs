//! # Boolean Expression Utilities
//!
//! Predicates are manipulated as lists of top-level AND-conjuncts throughout
//! the optimizer. This module provides the split/combine pair plus the
//! determinism checks that gate most pushdown decisions.
//!
//! `extract_conjuncts` and `combine_conjuncts` are inverses up to
//! normalization: combining drops TRUE, collapses on FALSE, deduplicates
//! syntactically identical conjuncts, and never materializes a single-element
//! AND.

use crate::expr::Expression;
use crate::functions::FunctionResolver;

/// Flatten nested conjunctions into a list of conjuncts.
///
/// TRUE conjuncts are dropped; any FALSE conjunct short-circuits the whole
/// list to `[FALSE]`.
pub fn extract_conjuncts(expr: &Expression) -> Vec<Expression> {
    let mut out = Vec::new();
    if !collect_conjuncts(expr, &mut out) {
        return vec![Expression::false_literal()];
    }
    out
}

/// Returns false when a FALSE conjunct was found.
fn collect_conjuncts(expr: &Expression, out: &mut Vec<Expression>) -> bool {
    match expr {
        Expression::And(terms) => terms.iter().all(|t| collect_conjuncts(t, out)),
        e if e.is_true_literal() => true,
        e if e.is_false_literal() => false,
        e => {
            out.push(e.clone());
            true
        }
    }
}

/// Combine conjuncts back into one predicate.
///
/// Empty input yields TRUE, a singleton yields the element itself, and any
/// FALSE input collapses the result to FALSE. Duplicate conjuncts are kept
/// once, preserving first-occurrence order.
pub fn combine_conjuncts<I>(conjuncts: I) -> Expression
where
    I: IntoIterator<Item = Expression>,
{
    let mut flattened = Vec::new();
    for conjunct in conjuncts {
        for part in extract_conjuncts(&conjunct) {
            if part.is_false_literal() {
                return Expression::false_literal();
            }
            if !flattened.contains(&part) {
                flattened.push(part);
            }
        }
    }
    match flattened.len() {
        0 => Expression::true_literal(),
        1 => flattened.into_iter().next().expect("non-empty"),
        _ => Expression::And(flattened),
    }
}

/// True iff no sub-expression is a non-deterministic function call. A `Try`
/// wrapper is deterministic iff its body is.
pub fn is_deterministic(expr: &Expression, resolver: &dyn FunctionResolver) -> bool {
    expr.pre_order().all(|e| match e {
        Expression::Function { name, .. } => resolver.is_deterministic(name),
        _ => true,
    })
}

/// The deterministic conjuncts of `expr`, recombined.
pub fn filter_deterministic_conjuncts(
    expr: &Expression,
    resolver: &dyn FunctionResolver,
) -> Expression {
    combine_conjuncts(
        extract_conjuncts(expr)
            .into_iter()
            .filter(|c| is_deterministic(c, resolver)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ComparisonOp, Symbol};
    use crate::functions::BuiltinFunctions;

    fn sym(name: &str) -> Expression {
        Symbol::new(name).to_expression()
    }

    fn gt(left: Expression, right: Expression) -> Expression {
        Expression::comparison(ComparisonOp::Gt, left, right)
    }

    #[test]
    fn test_extract_flattens_nested_and() {
        let expr = Expression::And(vec![
            gt(sym("a"), Expression::bigint(1)),
            Expression::And(vec![
                gt(sym("b"), Expression::bigint(2)),
                gt(sym("c"), Expression::bigint(3)),
            ]),
        ]);
        assert_eq!(extract_conjuncts(&expr).len(), 3);
    }

    #[test]
    fn test_extract_short_circuits_on_false() {
        let expr = Expression::And(vec![
            gt(sym("a"), Expression::bigint(1)),
            Expression::false_literal(),
        ]);
        assert_eq!(extract_conjuncts(&expr), vec![Expression::false_literal()]);
    }

    #[test]
    fn test_combine_of_empty_is_true() {
        assert!(combine_conjuncts(vec![]).is_true_literal());
    }

    #[test]
    fn test_combine_deduplicates() {
        let conjunct = gt(sym("a"), Expression::bigint(1));
        let combined = combine_conjuncts(vec![conjunct.clone(), conjunct.clone()]);
        assert_eq!(combined, conjunct);
    }

    #[test]
    fn test_determinism_of_try_follows_body() {
        let resolver = BuiltinFunctions::new();
        let rand = Expression::Function {
            name: "rand".to_string(),
            args: vec![],
        };
        assert!(!is_deterministic(&Expression::Try(Box::new(rand)), &resolver));
        assert!(is_deterministic(
            &Expression::Try(Box::new(sym("a"))),
            &resolver
        ));
    }

    #[test]
    fn test_filter_deterministic_conjuncts() {
        let resolver = BuiltinFunctions::new();
        let rand = Expression::comparison(
            ComparisonOp::Lt,
            Expression::Function {
                name: "rand".to_string(),
                args: vec![],
            },
            Expression::bigint(1),
        );
        let keep = gt(sym("a"), Expression::bigint(1));
        let expr = Expression::And(vec![rand, keep.clone()]);
        assert_eq!(filter_deterministic_conjuncts(&expr, &resolver), keep);
    }
}
