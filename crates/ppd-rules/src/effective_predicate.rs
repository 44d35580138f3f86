//! # Effective Predicate Extraction
//!
//! Computes, for any subplan, a predicate that is guaranteed to hold for
//! every row the subplan produces. The summary is sound but deliberately
//! incomplete: whenever a node's guarantees cannot be expressed in terms of
//! its own output symbols, the extractor falls back to TRUE rather than
//! guessing.
//!
//! The pushdown pass feeds these summaries into its equality inferences so
//! that constraints known on one side of a join can be replicated to the
//! other side.

use crate::equality_inference::EqualityInference;
use ppd_core::expr::{Expression, Symbol};
use ppd_core::functions::FunctionResolver;
use ppd_core::plan::{JoinType, PlanNode};
use ppd_core::session::Session;
use ppd_core::types::TypeProvider;
use ppd_core::utils::{
    combine_conjuncts, extract_conjuncts, filter_deterministic_conjuncts, is_deterministic,
};
use std::collections::HashSet;

/// Summarizes the predicates implied by a subplan's execution.
#[derive(Debug, Clone, Copy)]
pub struct EffectivePredicateExtractor {
    use_table_properties: bool,
}

impl EffectivePredicateExtractor {
    pub fn new(use_table_properties: bool) -> Self {
        EffectivePredicateExtractor {
            use_table_properties,
        }
    }

    /// A predicate implied by every row of `node`'s output. Only references
    /// symbols in `node`'s output list.
    pub fn extract(
        &self,
        session: &Session,
        node: &PlanNode,
        types: &TypeProvider,
        resolver: &dyn FunctionResolver,
    ) -> Expression {
        match node {
            PlanNode::TableScan(scan) => {
                if self.use_table_properties && session.is_pushdown_with_table_properties() {
                    scan.enforced_constraint
                        .clone()
                        .unwrap_or_else(Expression::true_literal)
                } else {
                    Expression::true_literal()
                }
            }
            PlanNode::Filter(filter) => {
                let underlying = self.extract(session, &filter.source, types, resolver);
                // Dynamic filter markers are runtime hints, not row
                // guarantees; they must not be replicated as facts.
                let own = extract_conjuncts(&filter.predicate)
                    .into_iter()
                    .filter(|conjunct| is_deterministic(conjunct, resolver))
                    .filter(|conjunct| crate::dynamic_filters::get_descriptor(conjunct).is_none());
                combine_conjuncts(std::iter::once(underlying).chain(own))
            }
            PlanNode::Project(project) => {
                let underlying = self.extract(session, &project.source, types, resolver);
                // Express the source guarantees through the assignments by
                // treating each deterministic assignment as an equality
                // `output = expr` and rewriting into the output scope.
                let assignment_equalities: Vec<Expression> = project
                    .assignments
                    .iter()
                    .filter(|(_, expr)| is_deterministic(expr, resolver))
                    .filter(|(symbol, expr)| *expr != symbol.to_expression())
                    .map(|(symbol, expr)| {
                        Expression::equality(symbol.to_expression(), expr.clone())
                    })
                    .collect();
                let mut sources: Vec<&Expression> = vec![&underlying];
                sources.extend(assignment_equalities.iter());
                let inference = EqualityInference::new(resolver, &sources);

                let scope: HashSet<Symbol> = node.output_symbols().into_iter().collect();
                let mut conjuncts = Vec::new();
                for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &underlying)
                {
                    if let Some(rewritten) = inference.rewrite(&conjunct, &scope) {
                        conjuncts.push(rewritten);
                    }
                }
                conjuncts.extend(
                    inference
                        .generate_equalities_partitioned_by(&scope)
                        .scope_equalities,
                );
                combine_conjuncts(conjuncts)
            }
            PlanNode::Aggregation(aggregation) => {
                let underlying = self.extract(session, &aggregation.source, types, resolver);
                let scope: HashSet<Symbol> = aggregation.grouping_keys().into_iter().collect();
                let inference = EqualityInference::new(resolver, &[&underlying]);
                let mut conjuncts = Vec::new();
                for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &underlying)
                {
                    if let Some(rewritten) = inference.rewrite(&conjunct, &scope) {
                        conjuncts.push(rewritten);
                    }
                }
                conjuncts.extend(
                    inference
                        .generate_equalities_partitioned_by(&scope)
                        .scope_equalities,
                );
                combine_conjuncts(conjuncts)
            }
            PlanNode::Join(join) => {
                let outputs: HashSet<Symbol> = join.output_symbols.iter().cloned().collect();
                match join.join_type {
                    JoinType::Inner => {
                        let left = self.extract(session, &join.left, types, resolver);
                        let right = self.extract(session, &join.right, types, resolver);
                        let mut conjuncts = vec![left, right];
                        conjuncts
                            .extend(join.criteria.iter().map(|clause| clause.to_expression()));
                        if let Some(filter) = &join.filter {
                            conjuncts.push(filter_deterministic_conjuncts(filter, resolver));
                        }
                        restrict_to_scope(combine_conjuncts(conjuncts), &outputs)
                    }
                    // Rows of the null-producing side may be replaced by
                    // nulls, so only the preserved side's summary survives.
                    JoinType::Left => restrict_to_scope(
                        self.extract(session, &join.left, types, resolver),
                        &outputs,
                    ),
                    JoinType::Right => restrict_to_scope(
                        self.extract(session, &join.right, types, resolver),
                        &outputs,
                    ),
                    JoinType::Full => Expression::true_literal(),
                }
            }
            PlanNode::SemiJoin(semi) => self.extract(session, &semi.source, types, resolver),
            PlanNode::Sort(sort) => self.extract(session, &sort.source, types, resolver),
            PlanNode::Sample(sample) => self.extract(session, &sample.source, types, resolver),
            PlanNode::Window(window) => self.extract(session, &window.source, types, resolver),
            PlanNode::MarkDistinct(mark) => self.extract(session, &mark.source, types, resolver),
            PlanNode::AssignUniqueId(assign) => {
                self.extract(session, &assign.source, types, resolver)
            }
            PlanNode::Exchange(exchange) if exchange.sources.len() == 1 => {
                let underlying = self.extract(session, &exchange.sources[0], types, resolver);
                let mapping: std::collections::HashMap<Symbol, Expression> = exchange.inputs[0]
                    .iter()
                    .zip(exchange.output_symbols.iter())
                    .map(|(input, output)| (input.clone(), output.to_expression()))
                    .collect();
                let outputs: HashSet<Symbol> = exchange.output_symbols.iter().cloned().collect();
                restrict_to_scope(underlying.inline_symbols(&mapping), &outputs)
            }
            // Union, multi-input exchanges, grouping-set expansion, unnest,
            // and spatial joins make no per-row guarantees we can express.
            _ => Expression::true_literal(),
        }
    }
}

/// Keep only conjuncts whose symbols all lie in `scope`.
fn restrict_to_scope(predicate: Expression, scope: &HashSet<Symbol>) -> Expression {
    combine_conjuncts(
        extract_conjuncts(&predicate)
            .into_iter()
            .filter(|conjunct| conjunct.unique_symbols().iter().all(|s| scope.contains(s))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppd_core::expr::ComparisonOp;
    use ppd_core::functions::BuiltinFunctions;
    use ppd_core::plan::{
        Assignments, FilterNode, PlanNodeId, ProjectNode, TableHandle, TableScanNode,
    };
    use std::sync::Arc;

    fn scan(id: u64, symbols: &[&str]) -> Arc<PlanNode> {
        Arc::new(PlanNode::TableScan(TableScanNode {
            id: PlanNodeId(id),
            table: TableHandle {
                schema: "test".to_string(),
                name: "t".to_string(),
            },
            output_symbols: symbols.iter().copied().map(Symbol::new).collect(),
            enforced_constraint: None,
        }))
    }

    fn sym(name: &str) -> Expression {
        Symbol::new(name).to_expression()
    }

    #[test]
    fn test_filter_contributes_deterministic_conjuncts() {
        let extractor = EffectivePredicateExtractor::new(false);
        let resolver = BuiltinFunctions::new();
        let predicate = Expression::And(vec![
            Expression::comparison(ComparisonOp::Gt, sym("a"), Expression::bigint(0)),
            Expression::comparison(
                ComparisonOp::Lt,
                Expression::Function {
                    name: "rand".to_string(),
                    args: vec![],
                },
                Expression::bigint(1),
            ),
        ]);
        let filter = PlanNode::Filter(FilterNode {
            id: PlanNodeId(1),
            source: scan(0, &["a"]),
            predicate,
        });

        let effective = extractor.extract(
            &Session::new(),
            &filter,
            &TypeProvider::new(),
            &resolver,
        );
        assert_eq!(
            effective,
            Expression::comparison(ComparisonOp::Gt, sym("a"), Expression::bigint(0))
        );
    }

    #[test]
    fn test_project_renames_source_guarantees() {
        let extractor = EffectivePredicateExtractor::new(false);
        let resolver = BuiltinFunctions::new();
        let filter = Arc::new(PlanNode::Filter(FilterNode {
            id: PlanNodeId(1),
            source: scan(0, &["a"]),
            predicate: Expression::comparison(ComparisonOp::Gt, sym("a"), Expression::bigint(5)),
        }));
        let mut builder = Assignments::builder();
        builder.put(Symbol::new("b"), sym("a"));
        let project = PlanNode::Project(ProjectNode {
            id: PlanNodeId(2),
            source: filter,
            assignments: builder.build(),
        });

        let effective = extractor.extract(
            &Session::new(),
            &project,
            &TypeProvider::new(),
            &resolver,
        );
        assert_eq!(
            effective,
            Expression::comparison(ComparisonOp::Gt, sym("b"), Expression::bigint(5))
        );
    }

    #[test]
    fn test_table_scan_constraint_requires_session_flag() {
        let resolver = BuiltinFunctions::new();
        let constraint = Expression::comparison(ComparisonOp::Gt, sym("a"), Expression::bigint(0));
        let scan_node = PlanNode::TableScan(TableScanNode {
            id: PlanNodeId(0),
            table: TableHandle {
                schema: "test".to_string(),
                name: "t".to_string(),
            },
            output_symbols: vec![Symbol::new("a")],
            enforced_constraint: Some(constraint.clone()),
        });

        let extractor = EffectivePredicateExtractor::new(true);
        let off = extractor.extract(
            &Session::new(),
            &scan_node,
            &TypeProvider::new(),
            &resolver,
        );
        assert!(off.is_true_literal());

        let on = extractor.extract(
            &Session::new().with_pushdown_table_properties(true),
            &scan_node,
            &TypeProvider::new(),
            &resolver,
        );
        assert_eq!(on, constraint);
    }
}
