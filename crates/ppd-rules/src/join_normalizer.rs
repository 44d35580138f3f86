//! # Outer Join Normalization
//!
//! An outer join pads unmatched rows with nulls on its null-producing side.
//! If the predicate sitting above the join can never accept such a padded
//! row, the padding is unobservable and the join can run as an inner join,
//! which unlocks far more aggressive pushdown.
//!
//! The test is constructive: substitute NULL for every symbol of the
//! null-producing side in each deterministic conjunct and constant-fold. If
//! any conjunct folds to FALSE or NULL, every padded row would be rejected.

use ppd_core::expr::{Expression, Symbol};
use ppd_core::functions::FunctionResolver;
use ppd_core::interpreter;
use ppd_core::plan::{JoinNode, JoinType};
use ppd_core::utils::{extract_conjuncts, is_deterministic};
use std::collections::HashMap;

pub struct JoinNormalizer<'a> {
    resolver: &'a dyn FunctionResolver,
}

impl<'a> JoinNormalizer<'a> {
    pub fn new(resolver: &'a dyn FunctionResolver) -> Self {
        JoinNormalizer { resolver }
    }

    /// Downgrade the join type as far as `inherited_predicate` allows:
    /// LEFT/RIGHT become INNER when the predicate rejects rows padded with
    /// nulls on the null-producing side, and FULL becomes LEFT, RIGHT, or
    /// INNER depending on which sides' padded rows are rejected.
    pub fn try_normalize_outer_to_inner(
        &self,
        node: &JoinNode,
        inherited_predicate: &Expression,
    ) -> JoinNode {
        match node.join_type {
            JoinType::Inner => node.clone(),
            JoinType::Full => {
                // Rejecting null-padded left symbols eliminates the rows
                // produced for unmatched right input, leaving a LEFT join;
                // symmetrically for the right side.
                let to_left = self.rejects_null_rows(
                    &node.left.output_symbols(),
                    inherited_predicate,
                );
                let to_right = self.rejects_null_rows(
                    &node.right.output_symbols(),
                    inherited_predicate,
                );
                let join_type = match (to_left, to_right) {
                    (true, true) => JoinType::Inner,
                    (true, false) => JoinType::Left,
                    (false, true) => JoinType::Right,
                    (false, false) => JoinType::Full,
                };
                JoinNode {
                    join_type,
                    ..node.clone()
                }
            }
            JoinType::Left => {
                if self.rejects_null_rows(&node.right.output_symbols(), inherited_predicate) {
                    JoinNode {
                        join_type: JoinType::Inner,
                        ..node.clone()
                    }
                } else {
                    node.clone()
                }
            }
            JoinType::Right => {
                if self.rejects_null_rows(&node.left.output_symbols(), inherited_predicate) {
                    JoinNode {
                        join_type: JoinType::Inner,
                        ..node.clone()
                    }
                } else {
                    node.clone()
                }
            }
        }
    }

    /// True if some deterministic conjunct of `predicate` evaluates to FALSE
    /// or NULL whenever every symbol in `null_symbols` is NULL.
    pub fn rejects_null_rows(&self, null_symbols: &[Symbol], predicate: &Expression) -> bool {
        let nulls: HashMap<Symbol, Expression> = null_symbols
            .iter()
            .map(|s| (s.clone(), Expression::null_literal()))
            .collect();
        extract_conjuncts(predicate)
            .iter()
            .filter(|conjunct| is_deterministic(conjunct, self.resolver))
            .any(|conjunct| {
                let substituted = conjunct.inline_symbols(&nulls);
                let folded = interpreter::optimize(&substituted);
                folded.is_false_literal() || folded.is_null_literal()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppd_core::expr::ComparisonOp;
    use ppd_core::functions::BuiltinFunctions;

    fn sym(name: &str) -> Expression {
        Symbol::new(name).to_expression()
    }

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().copied().map(Symbol::new).collect()
    }

    #[test]
    fn test_comparison_rejects_null_rows() {
        let resolver = BuiltinFunctions::new();
        let normalizer = JoinNormalizer::new(&resolver);
        let predicate = Expression::comparison(ComparisonOp::Gt, sym("y"), Expression::bigint(0));
        assert!(normalizer.rejects_null_rows(&symbols(&["y"]), &predicate));
    }

    #[test]
    fn test_is_null_check_does_not_reject() {
        let resolver = BuiltinFunctions::new();
        let normalizer = JoinNormalizer::new(&resolver);
        // `y IS NULL` is satisfied by the padded row, so the outer join
        // stays observable.
        let predicate = Expression::IsNull(Box::new(sym("y")));
        assert!(!normalizer.rejects_null_rows(&symbols(&["y"]), &predicate));
    }

    #[test]
    fn test_non_deterministic_conjunct_is_ignored() {
        let resolver = BuiltinFunctions::new();
        let normalizer = JoinNormalizer::new(&resolver);
        let predicate = Expression::comparison(
            ComparisonOp::Gt,
            Expression::Function {
                name: "rand".to_string(),
                args: vec![sym("y")],
            },
            Expression::bigint(0),
        );
        assert!(!normalizer.rejects_null_rows(&symbols(&["y"]), &predicate));
    }

    #[test]
    fn test_unrelated_symbol_does_not_reject() {
        let resolver = BuiltinFunctions::new();
        let normalizer = JoinNormalizer::new(&resolver);
        let predicate = Expression::comparison(ComparisonOp::Gt, sym("x"), Expression::bigint(0));
        assert!(!normalizer.rejects_null_rows(&symbols(&["y"]), &predicate));
    }
}
