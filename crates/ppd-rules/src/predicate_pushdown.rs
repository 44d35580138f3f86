//! # Predicate Pushdown
//!
//! Moves filter predicates as close to the data sources as possible. The
//! pass walks the plan top-down carrying one *inherited predicate* (initially
//! TRUE); every operator decides how much of that predicate its inputs can
//! absorb, hands the absorbable part down (renamed into input symbols where
//! needed), and materializes the rest as a filter above itself.
//!
//! ## What Each Operator Allows
//!
//! - **Filter** fuses its own predicate into the inherited one.
//! - **Project** inlines conjuncts through its assignments when that cannot
//!   duplicate expensive computation.
//! - **Joins** split the predicate into left, right, join, and post-join
//!   parts using equality inference over the inherited predicate, the join
//!   condition, and the effective predicates of both inputs. Outer joins are
//!   first downgraded to inner joins when the predicate rejects null-padded
//!   rows, and inner equi-joins optionally sprout dynamic filter markers on
//!   their probe side.
//! - **Aggregation, GroupId, MarkDistinct, Window** accept conjuncts over
//!   their grouping/partitioning columns only.
//! - **Union and Exchange** replicate the predicate into every input under
//!   the per-input symbol mapping.
//! - **Sort, Sample, AssignUniqueId** are transparent carriers.
//! - Everything else keeps the predicate above itself.
//!
//! Rows never change meaning: each rewrite preserves the node's output
//! symbol contract, appending an identity projection when reconstruction
//! reorders columns.

use crate::dynamic_filters;
use crate::effective_predicate::EffectivePredicateExtractor;
use crate::equality_inference::EqualityInference;
use crate::join_normalizer::JoinNormalizer;
use crate::PlanOptimizer;
use ppd_core::canonical::{are_expressions_equivalent, canonicalize, unwrap_casts};
use ppd_core::expr::{ComparisonOp, Expression, Symbol};
use ppd_core::functions::FunctionResolver;
use ppd_core::interpreter::{self, LiteralEncoder};
use ppd_core::plan::{
    AggregationNode, Assignments, EquiJoinClause, ExchangeNode, FilterNode, JoinNode, JoinType,
    PlanNode, PlanNodeIdAllocator, ProjectNode, SemiJoinNode, SpatialJoinNode, SpatialJoinType,
    SymbolAllocator, UnionNode, UnnestNode,
};
use ppd_core::session::{Session, WarningCollector};
use ppd_core::types::{TypeAnalyzer, TypeProvider};
use ppd_core::utils::{
    combine_conjuncts, extract_conjuncts, filter_deterministic_conjuncts, is_deterministic,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// The predicate pushdown optimizer.
pub struct PredicatePushdown {
    resolver: Arc<dyn FunctionResolver>,
    type_analyzer: TypeAnalyzer,
    use_table_properties: bool,
    dynamic_filtering: bool,
}

impl PredicatePushdown {
    pub fn new(
        resolver: Arc<dyn FunctionResolver>,
        type_analyzer: TypeAnalyzer,
        use_table_properties: bool,
        dynamic_filtering: bool,
    ) -> Self {
        PredicatePushdown {
            resolver,
            type_analyzer,
            use_table_properties,
            dynamic_filtering,
        }
    }
}

impl PlanOptimizer for PredicatePushdown {
    fn optimize(
        &self,
        plan: Arc<PlanNode>,
        session: &Session,
        types: &TypeProvider,
        symbol_allocator: &mut SymbolAllocator,
        id_allocator: &mut PlanNodeIdAllocator,
        _warnings: &mut WarningCollector,
    ) -> Arc<PlanNode> {
        debug!(root = %plan.id(), "running predicate pushdown");
        let mut rewriter = Rewriter {
            resolver: self.resolver.as_ref(),
            type_analyzer: self.type_analyzer,
            literal_encoder: LiteralEncoder::new(),
            extractor: EffectivePredicateExtractor::new(self.use_table_properties),
            dynamic_filtering: self.dynamic_filtering,
            session,
            types,
            symbol_allocator,
            id_allocator,
        };
        rewriter.rewrite(&plan, Expression::true_literal())
    }
}

struct Rewriter<'a> {
    resolver: &'a dyn FunctionResolver,
    type_analyzer: TypeAnalyzer,
    literal_encoder: LiteralEncoder,
    extractor: EffectivePredicateExtractor,
    dynamic_filtering: bool,
    session: &'a Session,
    types: &'a TypeProvider,
    symbol_allocator: &'a mut SymbolAllocator,
    id_allocator: &'a mut PlanNodeIdAllocator,
}

impl<'a> Rewriter<'a> {
    fn rewrite(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        match &**node {
            PlanNode::Filter(filter) => self.visit_filter(node, filter, inherited),
            PlanNode::Project(project) => self.visit_project(node, project, inherited),
            PlanNode::Window(_) => self.visit_window(node, inherited),
            PlanNode::Aggregation(_) => self.visit_aggregation(node, inherited),
            PlanNode::GroupId(_) => self.visit_group_id(node, inherited),
            PlanNode::MarkDistinct(_) => self.visit_mark_distinct(node, inherited),
            PlanNode::Union(union) => self.visit_union(node, union, inherited),
            PlanNode::Exchange(exchange) => self.visit_exchange(node, exchange, inherited),
            PlanNode::Join(join) => self.visit_join(node, join, inherited),
            PlanNode::SemiJoin(semi) => self.visit_semi_join(node, semi, inherited),
            PlanNode::SpatialJoin(spatial) => self.visit_spatial_join(node, spatial, inherited),
            PlanNode::Unnest(_) => self.visit_unnest(node, inherited),
            PlanNode::Sort(_) | PlanNode::Sample(_) => self.default_rewrite(node, inherited),
            PlanNode::AssignUniqueId(_) => self.visit_assign_unique_id(node, inherited),
            PlanNode::TableScan(_) => self.visit_table_scan(node, inherited),
        }
    }

    /// Fallback: the predicate cannot move below this node. Recurse with
    /// TRUE and keep the inherited predicate as a filter above.
    fn visit_plan(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        let rewritten = self.default_rewrite(node, Expression::true_literal());
        self.with_filter(rewritten, inherited)
    }

    /// Rewrite every child with `child_predicate`, rebuilding the node
    /// (same id) only if some child changed.
    fn default_rewrite(
        &mut self,
        node: &Arc<PlanNode>,
        child_predicate: Expression,
    ) -> Arc<PlanNode> {
        let mut new_sources = Vec::new();
        let mut changed = false;
        for source in node.sources() {
            let rewritten = self.rewrite(source, child_predicate.clone());
            if !Arc::ptr_eq(&rewritten, source) {
                changed = true;
            }
            new_sources.push(rewritten);
        }
        if changed {
            Arc::new(node.replace_sources(new_sources))
        } else {
            node.clone()
        }
    }

    /// Wrap `node` in a filter unless the predicate is TRUE. TRUE filters
    /// are never materialized.
    fn with_filter(&mut self, node: Arc<PlanNode>, predicate: Expression) -> Arc<PlanNode> {
        if predicate.is_true_literal() {
            return node;
        }
        Arc::new(PlanNode::Filter(FilterNode {
            id: self.id_allocator.next_id(),
            source: node,
            predicate,
        }))
    }

    fn visit_filter(
        &mut self,
        node: &Arc<PlanNode>,
        filter: &FilterNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        // Dynamic filter markers in this node's predicate were planted by an
        // earlier pass; the owning join re-synthesizes them (with the same
        // ids) into the inherited predicate on this pass. Carrying the old
        // copies forward would leave markers no join has registered.
        let (own_conjuncts, _) = dynamic_filters::extract_dynamic_filters(&filter.predicate);
        let rewritten = self.rewrite(
            &filter.source,
            combine_conjuncts(own_conjuncts.into_iter().chain(std::iter::once(inherited))),
        );
        // If the rewrite reproduced an equivalent filter over an unchanged
        // source, keep the original node.
        if let PlanNode::Filter(rewritten_filter) = &*rewritten {
            if Arc::ptr_eq(&rewritten_filter.source, &filter.source)
                && are_expressions_equivalent(&rewritten_filter.predicate, &filter.predicate)
            {
                return node.clone();
            }
        }
        rewritten
    }

    fn visit_table_scan(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        let predicate = self.simplify_expression(&inherited);
        if !predicate.is_true_literal() {
            let filter = FilterNode {
                id: self.id_allocator.next_id(),
                source: node.clone(),
                predicate,
            };
            return Arc::new(PlanNode::Filter(filter));
        }
        node.clone()
    }

    fn visit_project(
        &mut self,
        node: &Arc<PlanNode>,
        project: &ProjectNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let deterministic_outputs: HashSet<Symbol> = project
            .assignments
            .iter()
            .filter(|(_, expression)| is_deterministic(expression, self.resolver))
            .map(|(symbol, _)| symbol.clone())
            .collect();

        // A conjunct may only move below the projection if every symbol it
        // reads is computed deterministically.
        let (deterministic_conjuncts, non_deterministic_conjuncts): (Vec<_>, Vec<_>) =
            extract_conjuncts(&inherited).into_iter().partition(|conjunct| {
                conjunct
                    .unique_symbols()
                    .iter()
                    .all(|s| deterministic_outputs.contains(s))
            });

        let (inlining, non_inlining): (Vec<_>, Vec<_>) = deterministic_conjuncts
            .into_iter()
            .partition(|conjunct| self.is_inlining_candidate(conjunct, project));

        let assignments = project.assignments.as_map();
        let inlined_conjuncts: Vec<Expression> = inlining
            .iter()
            .map(|conjunct| {
                let inlined = conjunct.inline_symbols(&assignments);
                // Normalize so that cast unwrapping sees a canonical shape.
                let canonical = canonicalize(&inlined);
                unwrap_casts(&self.type_analyzer, self.symbol_allocator.types(), &canonical)
            })
            .collect();

        let rewritten = self.default_rewrite(node, combine_conjuncts(inlined_conjuncts));

        let mut residual = non_inlining;
        residual.extend(non_deterministic_conjuncts);
        self.with_filter(rewritten, combine_conjuncts(residual))
    }

    /// A conjunct is inlined below a projection when every projection output
    /// it references either maps to a literal or symbol reference, or occurs
    /// exactly once (so a complex assignment is not duplicated). Conjuncts
    /// containing `Try` are never inlined.
    fn is_inlining_candidate(&self, conjunct: &Expression, project: &ProjectNode) -> bool {
        if conjunct.contains_try() {
            return false;
        }
        let outputs: HashSet<Symbol> = project.assignments.outputs().into_iter().collect();
        let mut usage_counts: HashMap<Symbol, usize> = HashMap::new();
        for symbol in conjunct.all_symbols() {
            if outputs.contains(&symbol) {
                *usage_counts.entry(symbol).or_insert(0) += 1;
            }
        }
        usage_counts.iter().all(|(symbol, count)| {
            *count == 1
                || matches!(
                    project.assignments.get(symbol),
                    Some(Expression::Literal(_)) | Some(Expression::Symbol(_))
                )
        })
    }

    fn visit_window(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        let PlanNode::Window(window) = &**node else {
            unreachable!("visit_window on non-window node");
        };
        // A conjunct is constant within a window partition when it is a
        // deterministic function of the partitioning symbols.
        let partition_symbols: HashSet<Symbol> = window.partition_by.iter().cloned().collect();
        let (pushable, residual): (Vec<_>, Vec<_>) =
            extract_conjuncts(&inherited).into_iter().partition(|conjunct| {
                is_deterministic(conjunct, self.resolver)
                    && conjunct
                        .unique_symbols()
                        .iter()
                        .all(|s| partition_symbols.contains(s))
            });

        let rewritten = self.default_rewrite(node, combine_conjuncts(pushable));
        self.with_filter(rewritten, combine_conjuncts(residual))
    }

    fn visit_group_id(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        let PlanNode::GroupId(group_id) = &**node else {
            unreachable!("visit_group_id on non-group-id node");
        };
        // Only columns present in every grouping set keep their value on
        // every generated row; conjuncts over them push through, renamed to
        // the underlying source symbols.
        let common = group_id.common_grouping_columns();
        let mapping: HashMap<Symbol, Expression> = group_id
            .grouping_columns
            .iter()
            .filter(|(output, _)| common.contains(output))
            .map(|(output, source)| (output.clone(), source.to_expression()))
            .collect();

        let (pushable, residual): (Vec<_>, Vec<_>) =
            extract_conjuncts(&inherited).into_iter().partition(|conjunct| {
                conjunct
                    .unique_symbols()
                    .iter()
                    .all(|s| mapping.contains_key(s))
            });

        let pushed = combine_conjuncts(pushable).inline_symbols(&mapping);
        let rewritten = self.default_rewrite(node, pushed);
        self.with_filter(rewritten, combine_conjuncts(residual))
    }

    fn visit_mark_distinct(
        &mut self,
        node: &Arc<PlanNode>,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let PlanNode::MarkDistinct(mark) = &**node else {
            unreachable!("visit_mark_distinct on non-mark-distinct node");
        };
        let pushable_symbols: HashSet<Symbol> = mark.distinct_symbols.iter().cloned().collect();
        let (pushable, residual): (Vec<_>, Vec<_>) =
            extract_conjuncts(&inherited).into_iter().partition(|conjunct| {
                conjunct
                    .unique_symbols()
                    .iter()
                    .all(|s| pushable_symbols.contains(s))
            });

        let rewritten = self.default_rewrite(node, combine_conjuncts(pushable));
        self.with_filter(rewritten, combine_conjuncts(residual))
    }

    fn visit_union(
        &mut self,
        node: &Arc<PlanNode>,
        union: &UnionNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let mut modified = false;
        let mut new_sources = Vec::new();
        for (index, source) in union.sources.iter().enumerate() {
            let source_predicate = inherited.inline_symbols(&union.source_symbol_map(index));
            let rewritten = self.rewrite(source, source_predicate);
            if !Arc::ptr_eq(&rewritten, source) {
                modified = true;
            }
            new_sources.push(rewritten);
        }
        if modified {
            return Arc::new(PlanNode::Union(UnionNode {
                sources: new_sources,
                ..union.clone()
            }));
        }
        node.clone()
    }

    fn visit_exchange(
        &mut self,
        node: &Arc<PlanNode>,
        exchange: &ExchangeNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let mut modified = false;
        let mut new_sources = Vec::new();
        for (index, source) in exchange.sources.iter().enumerate() {
            let source_predicate = inherited.inline_symbols(&exchange.source_symbol_map(index));
            let rewritten = self.rewrite(source, source_predicate);
            if !Arc::ptr_eq(&rewritten, source) {
                modified = true;
            }
            new_sources.push(rewritten);
        }
        if modified {
            return Arc::new(PlanNode::Exchange(ExchangeNode {
                sources: new_sources,
                ..exchange.clone()
            }));
        }
        node.clone()
    }

    fn visit_assign_unique_id(
        &mut self,
        node: &Arc<PlanNode>,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let PlanNode::AssignUniqueId(assign) = &**node else {
            unreachable!("visit_assign_unique_id on wrong node");
        };
        assert!(
            !inherited.unique_symbols().contains(&assign.id_column),
            "predicate must not reference the generated unique id column {}",
            assign.id_column
        );
        self.default_rewrite(node, inherited)
    }

    fn visit_aggregation(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        let PlanNode::Aggregation(aggregation) = &**node else {
            unreachable!("visit_aggregation on non-aggregation node");
        };
        // A global grouping set produces a row even for empty input, so no
        // conjunct may be evaluated below it.
        if aggregation.has_empty_grouping_set() {
            return self.visit_plan(node, inherited);
        }

        let equality_inference = EqualityInference::new(self.resolver, &[&inherited]);

        let mut pushdown_conjuncts = Vec::new();
        let mut post_aggregation_conjuncts = Vec::new();

        for conjunct in extract_conjuncts(&inherited) {
            if !is_deterministic(&conjunct, self.resolver) {
                post_aggregation_conjuncts.push(conjunct);
            }
        }
        let deterministic_inherited = filter_deterministic_conjuncts(&inherited, self.resolver);

        let grouping_keys: HashSet<Symbol> = aggregation.grouping_keys().into_iter().collect();
        for conjunct in
            EqualityInference::non_inferrable_conjuncts(self.resolver, &deterministic_inherited)
        {
            if let Some(group_id) = &aggregation.group_id_symbol {
                if conjunct.unique_symbols().contains(group_id) {
                    // The aggregation synthesizes group id values for the
                    // global grouping set, so conditions on the group id
                    // must run after it.
                    post_aggregation_conjuncts.push(conjunct);
                    continue;
                }
            }
            match equality_inference.rewrite(&conjunct, &grouping_keys) {
                Some(rewritten) => pushdown_conjuncts.push(rewritten),
                None => post_aggregation_conjuncts.push(conjunct),
            }
        }

        let partition = equality_inference.generate_equalities_partitioned_by(&grouping_keys);
        pushdown_conjuncts.extend(partition.scope_equalities);
        post_aggregation_conjuncts.extend(partition.scope_complement_equalities);
        post_aggregation_conjuncts.extend(partition.scope_straddling_equalities);

        let rewritten_source =
            self.rewrite(&aggregation.source, combine_conjuncts(pushdown_conjuncts));

        let output = if Arc::ptr_eq(&rewritten_source, &aggregation.source) {
            node.clone()
        } else {
            Arc::new(PlanNode::Aggregation(AggregationNode {
                source: rewritten_source,
                ..aggregation.clone()
            }))
        };
        self.with_filter(output, combine_conjuncts(post_aggregation_conjuncts))
    }

    fn visit_unnest(&mut self, node: &Arc<PlanNode>, inherited: Expression) -> Arc<PlanNode> {
        let PlanNode::Unnest(unnest) = &**node else {
            unreachable!("visit_unnest on non-unnest node");
        };
        // Right and full unnest semantics null-pad the replicated side, so
        // nothing may be pushed below.
        if unnest.join_type == JoinType::Right || unnest.join_type == JoinType::Full {
            return self.with_filter(node.clone(), inherited);
        }

        let equality_inference = EqualityInference::new(self.resolver, &[&inherited]);

        let mut pushdown_conjuncts = Vec::new();
        let mut post_unnest_conjuncts = Vec::new();

        for conjunct in extract_conjuncts(&inherited) {
            if !is_deterministic(&conjunct, self.resolver) {
                post_unnest_conjuncts.push(conjunct);
            }
        }
        let deterministic_inherited = filter_deterministic_conjuncts(&inherited, self.resolver);

        let replicated: HashSet<Symbol> = unnest.replicate_symbols.iter().cloned().collect();
        for conjunct in
            EqualityInference::non_inferrable_conjuncts(self.resolver, &deterministic_inherited)
        {
            match equality_inference.rewrite(&conjunct, &replicated) {
                Some(rewritten) => pushdown_conjuncts.push(rewritten),
                None => post_unnest_conjuncts.push(conjunct),
            }
        }

        let partition = equality_inference.generate_equalities_partitioned_by(&replicated);
        pushdown_conjuncts.extend(partition.scope_equalities);
        post_unnest_conjuncts.extend(partition.scope_complement_equalities);
        post_unnest_conjuncts.extend(partition.scope_straddling_equalities);

        let rewritten_source = self.rewrite(&unnest.source, combine_conjuncts(pushdown_conjuncts));

        let output = if Arc::ptr_eq(&rewritten_source, &unnest.source) {
            node.clone()
        } else {
            Arc::new(PlanNode::Unnest(UnnestNode {
                source: rewritten_source,
                ..unnest.clone()
            }))
        };
        self.with_filter(output, combine_conjuncts(post_unnest_conjuncts))
    }

    fn visit_join(
        &mut self,
        node: &Arc<PlanNode>,
        join: &JoinNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        // An outer join whose inherited predicate rejects null-padded rows
        // is an inner join in disguise.
        let normalizer = JoinNormalizer::new(self.resolver);
        let join = normalizer.try_normalize_outer_to_inner(join, &inherited);
        let type_changed = match &**node {
            PlanNode::Join(original) => original.join_type != join.join_type,
            _ => unreachable!("visit_join on non-join node"),
        };
        trace!(id = %join.id, join_type = ?join.join_type, "rewriting join");

        let left_effective =
            self.extractor
                .extract(self.session, &join.left, self.types, self.resolver);
        let right_effective =
            self.extractor
                .extract(self.session, &join.right, self.types, self.resolver);
        let join_predicate = extract_join_predicate(&join);

        let left_outputs = join.left.output_symbols();
        let right_outputs = join.right.output_symbols();

        let (left_predicate, right_predicate, mut post_join_predicate, new_join_predicate) =
            match join.join_type {
                JoinType::Inner => {
                    let result = process_inner_join(
                        self.resolver,
                        &inherited,
                        &left_effective,
                        &right_effective,
                        &join_predicate,
                        &left_outputs,
                        &right_outputs,
                    );
                    (
                        result.left_predicate,
                        result.right_predicate,
                        result.post_join_predicate,
                        result.join_predicate,
                    )
                }
                JoinType::Left => {
                    let result = process_limited_outer_join(
                        self.resolver,
                        &inherited,
                        &left_effective,
                        &right_effective,
                        &join_predicate,
                        &left_outputs,
                        &right_outputs,
                    );
                    (
                        result.outer_join_predicate,
                        result.inner_join_predicate,
                        result.post_join_predicate,
                        result.join_predicate,
                    )
                }
                JoinType::Right => {
                    let result = process_limited_outer_join(
                        self.resolver,
                        &inherited,
                        &right_effective,
                        &left_effective,
                        &join_predicate,
                        &right_outputs,
                        &left_outputs,
                    );
                    (
                        result.inner_join_predicate,
                        result.outer_join_predicate,
                        result.post_join_predicate,
                        result.join_predicate,
                    )
                }
                JoinType::Full => (
                    Expression::true_literal(),
                    Expression::true_literal(),
                    inherited.clone(),
                    join_predicate.clone(),
                ),
            };

        let mut new_join_predicate = self.simplify_expression(&new_join_predicate);
        if new_join_predicate.is_false_literal() {
            // Downstream join planning expects a comparison shape, not a
            // literal; keep an unsatisfiable comparison instead.
            new_join_predicate =
                Expression::equality(Expression::bigint(0), Expression::bigint(1));
        }

        // Identity projections for the existing inputs; non-symbol equality
        // sides get materialized into fresh symbols below.
        let mut left_projections = Assignments::builder();
        left_projections.put_identities(left_outputs.iter().cloned());
        let mut right_projections = Assignments::builder();
        right_projections.put_identities(right_outputs.iter().cloned());

        let mut equi_join_clauses = Vec::new();
        let mut join_filter_conjuncts = Vec::new();
        for conjunct in extract_conjuncts(&new_join_predicate) {
            if is_join_equality(self.resolver, &conjunct, &left_outputs, &right_outputs) {
                let Expression::Comparison { left, right, .. } = &conjunct else {
                    unreachable!("join equality is a comparison");
                };
                let aligned = left
                    .unique_symbols()
                    .iter()
                    .all(|s| left_outputs.contains(s));
                let (left_expression, right_expression) = if aligned {
                    ((**left).clone(), (**right).clone())
                } else {
                    ((**right).clone(), (**left).clone())
                };

                let left_symbol = self.symbol_for_expression(&left_expression);
                if !left_outputs.contains(&left_symbol) {
                    left_projections.put(left_symbol.clone(), left_expression);
                }
                let right_symbol = self.symbol_for_expression(&right_expression);
                if !right_outputs.contains(&right_symbol) {
                    right_projections.put(right_symbol.clone(), right_expression);
                }
                equi_join_clauses.push(EquiJoinClause::new(left_symbol, right_symbol));
            } else {
                join_filter_conjuncts.push(conjunct);
            }
        }

        let (new_dynamic_filters, dynamic_filter_predicates) =
            self.create_dynamic_filters(&join, &equi_join_clauses);
        let left_predicate = combine_conjuncts(
            std::iter::once(left_predicate).chain(dynamic_filter_predicates),
        );

        let clauses_unmodified =
            clause_set(&equi_join_clauses) == clause_set(&join.criteria);
        let (mut left_source, mut right_source) = if clauses_unmodified {
            (
                self.rewrite(&join.left, left_predicate),
                self.rewrite(&join.right, right_predicate),
            )
        } else {
            let left_project = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: join.left.clone(),
                assignments: left_projections.build(),
            }));
            let right_project = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: join.right.clone(),
                assignments: right_projections.build(),
            }));
            (
                self.rewrite(&left_project, left_predicate),
                self.rewrite(&right_project, right_predicate),
            )
        };

        let mut new_join_filter = match combine_conjuncts(join_filter_conjuncts) {
            filter if filter.is_true_literal() => None,
            filter => Some(filter),
        };

        if join.join_type == JoinType::Inner
            && new_join_filter.is_some()
            && equi_join_clauses.is_empty()
        {
            // Without any equi clause the join executes as a nested loop,
            // which has no filter support; evaluate the condition above it.
            post_join_predicate = combine_conjuncts(vec![
                post_join_predicate,
                new_join_filter.take().expect("filter present"),
            ]);
        }

        let filters_equivalent = match (&new_join_filter, &join.filter) {
            (None, None) => true,
            (Some(new), Some(old)) => are_expressions_equivalent(new, old),
            _ => false,
        };

        let changed = !Arc::ptr_eq(&left_source, &join.left)
            || !Arc::ptr_eq(&right_source, &join.right)
            || !filters_equivalent
            || new_dynamic_filters != join.dynamic_filters
            || !clauses_unmodified;

        let mut output = if changed {
            left_source = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: left_source,
                assignments: left_projections.build(),
            }));
            right_source = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: right_source,
                assignments: right_projections.build(),
            }));
            let mut output_symbols = left_source.output_symbols();
            output_symbols.extend(right_source.output_symbols());
            Arc::new(PlanNode::Join(JoinNode {
                id: join.id,
                join_type: join.join_type,
                left: left_source,
                right: right_source,
                criteria: equi_join_clauses,
                output_symbols,
                filter: new_join_filter,
                distribution_type: join.distribution_type,
                dynamic_filters: new_dynamic_filters,
            }))
        } else if type_changed {
            Arc::new(PlanNode::Join(join.clone()))
        } else {
            node.clone()
        };

        output = self.with_filter(output, post_join_predicate);

        if join.output_symbols != output.output_symbols() {
            output = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: output,
                assignments: Assignments::identity(join.output_symbols.iter().cloned()),
            }));
        }
        output
    }

    /// Register one dynamic filter per equi clause on inner joins when the
    /// feature is enabled. Returns the id-to-build-symbol map and the
    /// probe-side marker conjuncts.
    ///
    /// Ids are a pure function of the owning join's node id and the clause
    /// symbols. The join keeps its node id through reconstruction, so a
    /// second pass over already-rewritten output reproduces the identical
    /// registrations and markers instead of minting fresh ids.
    fn create_dynamic_filters(
        &self,
        join: &JoinNode,
        equi_join_clauses: &[EquiJoinClause],
    ) -> (BTreeMap<String, Symbol>, Vec<Expression>) {
        let mut filters = BTreeMap::new();
        let mut predicates = Vec::new();
        if join.join_type == JoinType::Inner
            && self.dynamic_filtering
            && self.session.is_dynamic_filtering_enabled()
        {
            for clause in equi_join_clauses {
                let id = format!("df_{}_{}_{}", join.id, clause.left, clause.right);
                if filters.contains_key(&id) {
                    continue;
                }
                predicates.push(dynamic_filters::create_dynamic_filter_expression(
                    &id,
                    &clause.left,
                ));
                filters.insert(id, clause.right.clone());
            }
        }
        (filters, predicates)
    }

    fn visit_semi_join(
        &mut self,
        node: &Arc<PlanNode>,
        semi: &SemiJoinNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let semi_output_reference = semi.semi_join_output.to_expression();
        if extract_conjuncts(&inherited).contains(&semi_output_reference) {
            self.visit_filtering_semi_join(node, semi, inherited)
        } else {
            self.visit_non_filtering_semi_join(node, semi, inherited)
        }
    }

    /// The predicate does not test membership, so the filtering source is
    /// untouched and the source side absorbs what it can.
    fn visit_non_filtering_semi_join(
        &mut self,
        node: &Arc<PlanNode>,
        semi: &SemiJoinNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let mut source_conjuncts = Vec::new();
        let mut post_join_conjuncts = Vec::new();

        let rewritten_filtering_source =
            self.default_rewrite(&semi.filtering_source, Expression::true_literal());

        let source_scope: HashSet<Symbol> = semi.source.output_symbols().into_iter().collect();
        let inherited_inference = EqualityInference::new(self.resolver, &[&inherited]);
        for conjunct in EqualityInference::non_inferrable_conjuncts(self.resolver, &inherited) {
            match inherited_inference.rewrite(&conjunct, &source_scope) {
                // Each source row appears exactly once in the output, so
                // even non-deterministic conjuncts may move below.
                Some(rewritten) => source_conjuncts.push(rewritten),
                None => post_join_conjuncts.push(conjunct),
            }
        }

        let partition = inherited_inference.generate_equalities_partitioned_by(&source_scope);
        source_conjuncts.extend(partition.scope_equalities);
        post_join_conjuncts.extend(partition.scope_complement_equalities);
        post_join_conjuncts.extend(partition.scope_straddling_equalities);

        let rewritten_source = self.rewrite(&semi.source, combine_conjuncts(source_conjuncts));

        let output = if Arc::ptr_eq(&rewritten_source, &semi.source)
            && Arc::ptr_eq(&rewritten_filtering_source, &semi.filtering_source)
        {
            node.clone()
        } else {
            Arc::new(PlanNode::SemiJoin(SemiJoinNode {
                source: rewritten_source,
                filtering_source: rewritten_filtering_source,
                ..semi.clone()
            }))
        };
        self.with_filter(output, combine_conjuncts(post_join_conjuncts))
    }

    /// The predicate keeps only matching rows, so the membership test acts
    /// like an inner equi join on `source_key = filter_key`, and constraints
    /// may travel across it in both directions.
    fn visit_filtering_semi_join(
        &mut self,
        node: &Arc<PlanNode>,
        semi: &SemiJoinNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let deterministic_inherited =
            filter_deterministic_conjuncts(&inherited, self.resolver);
        let source_effective = filter_deterministic_conjuncts(
            &self
                .extractor
                .extract(self.session, &semi.source, self.types, self.resolver),
            self.resolver,
        );
        let filtering_effective = filter_deterministic_conjuncts(
            &self.extractor.extract(
                self.session,
                &semi.filtering_source,
                self.types,
                self.resolver,
            ),
            self.resolver,
        );
        let join_expression = Expression::equality(
            semi.source_join_symbol.to_expression(),
            semi.filtering_source_join_symbol.to_expression(),
        );

        let all_inference = EqualityInference::new(
            self.resolver,
            &[
                &deterministic_inherited,
                &source_effective,
                &filtering_effective,
                &join_expression,
            ],
        );
        let all_without_source_inferred = EqualityInference::new(
            self.resolver,
            &[
                &deterministic_inherited,
                &filtering_effective,
                &join_expression,
            ],
        );
        let all_without_filtering_inferred = EqualityInference::new(
            self.resolver,
            &[&deterministic_inherited, &source_effective, &join_expression],
        );

        let source_scope: HashSet<Symbol> = semi.source.output_symbols().into_iter().collect();
        let filter_scope: HashSet<Symbol> =
            semi.filtering_source.output_symbols().into_iter().collect();

        let mut source_conjuncts = Vec::new();
        let mut filtering_source_conjuncts = Vec::new();
        let mut post_join_conjuncts = Vec::new();

        for conjunct in EqualityInference::non_inferrable_conjuncts(self.resolver, &inherited) {
            match all_inference.rewrite(&conjunct, &source_scope) {
                // One output row per source row, so non-deterministic
                // conjuncts are safe on the source side.
                Some(rewritten) => source_conjuncts.push(rewritten),
                None => post_join_conjuncts.push(conjunct),
            }
        }

        // The filtering side is logically re-evaluated per source row, so
        // only deterministic conjuncts may move there.
        for conjunct in
            EqualityInference::non_inferrable_conjuncts(self.resolver, &deterministic_inherited)
        {
            if let Some(rewritten) = all_inference.rewrite(&conjunct, &filter_scope) {
                filtering_source_conjuncts.push(rewritten);
            }
        }

        // Exchange effective predicates across the membership test.
        for conjunct in
            EqualityInference::non_inferrable_conjuncts(self.resolver, &filtering_effective)
        {
            if let Some(rewritten) = all_inference.rewrite(&conjunct, &source_scope) {
                source_conjuncts.push(rewritten);
            }
        }
        for conjunct in
            EqualityInference::non_inferrable_conjuncts(self.resolver, &source_effective)
        {
            if let Some(rewritten) = all_inference.rewrite(&conjunct, &filter_scope) {
                filtering_source_conjuncts.push(rewritten);
            }
        }

        source_conjuncts.extend(
            all_without_source_inferred
                .generate_equalities_partitioned_by(&source_scope)
                .scope_equalities,
        );
        filtering_source_conjuncts.extend(
            all_without_filtering_inferred
                .generate_equalities_partitioned_by(&filter_scope)
                .scope_equalities,
        );

        let rewritten_source = self.rewrite(&semi.source, combine_conjuncts(source_conjuncts));
        let rewritten_filtering_source = self.rewrite(
            &semi.filtering_source,
            combine_conjuncts(filtering_source_conjuncts),
        );

        let output = if Arc::ptr_eq(&rewritten_source, &semi.source)
            && Arc::ptr_eq(&rewritten_filtering_source, &semi.filtering_source)
        {
            node.clone()
        } else {
            Arc::new(PlanNode::SemiJoin(SemiJoinNode {
                source: rewritten_source,
                filtering_source: rewritten_filtering_source,
                ..semi.clone()
            }))
        };
        self.with_filter(output, combine_conjuncts(post_join_conjuncts))
    }

    fn visit_spatial_join(
        &mut self,
        node: &Arc<PlanNode>,
        spatial: &SpatialJoinNode,
        inherited: Expression,
    ) -> Arc<PlanNode> {
        let normalizer = JoinNormalizer::new(self.resolver);
        let spatial = if spatial.join_type == SpatialJoinType::Left
            && normalizer.rejects_null_rows(&spatial.right.output_symbols(), &inherited)
        {
            SpatialJoinNode {
                join_type: SpatialJoinType::Inner,
                ..spatial.clone()
            }
        } else {
            spatial.clone()
        };
        let type_changed = match &**node {
            PlanNode::SpatialJoin(original) => original.join_type != spatial.join_type,
            _ => unreachable!("visit_spatial_join on wrong node"),
        };

        let left_effective =
            self.extractor
                .extract(self.session, &spatial.left, self.types, self.resolver);
        let right_effective =
            self.extractor
                .extract(self.session, &spatial.right, self.types, self.resolver);
        let join_predicate = spatial.filter.clone();

        let left_outputs = spatial.left.output_symbols();
        let right_outputs = spatial.right.output_symbols();

        let (left_predicate, right_predicate, post_join_predicate, new_join_predicate) =
            match spatial.join_type {
                SpatialJoinType::Inner => {
                    let result = process_inner_join(
                        self.resolver,
                        &inherited,
                        &left_effective,
                        &right_effective,
                        &join_predicate,
                        &left_outputs,
                        &right_outputs,
                    );
                    (
                        result.left_predicate,
                        result.right_predicate,
                        result.post_join_predicate,
                        result.join_predicate,
                    )
                }
                SpatialJoinType::Left => {
                    let result = process_limited_outer_join(
                        self.resolver,
                        &inherited,
                        &left_effective,
                        &right_effective,
                        &join_predicate,
                        &left_outputs,
                        &right_outputs,
                    );
                    (
                        result.outer_join_predicate,
                        result.inner_join_predicate,
                        result.post_join_predicate,
                        result.join_predicate,
                    )
                }
            };

        let new_join_predicate = self.simplify_expression(&new_join_predicate);
        assert!(
            !new_join_predicate.is_false_literal(),
            "spatial join predicate is missing"
        );

        let left_source = self.rewrite(&spatial.left, left_predicate);
        let right_source = self.rewrite(&spatial.right, right_predicate);

        let mut output = if !Arc::ptr_eq(&left_source, &spatial.left)
            || !Arc::ptr_eq(&right_source, &spatial.right)
            || !are_expressions_equivalent(&new_join_predicate, &join_predicate)
        {
            let left_source = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: left_source,
                assignments: Assignments::identity(left_outputs.iter().cloned()),
            }));
            let right_source = Arc::new(PlanNode::Project(ProjectNode {
                id: self.id_allocator.next_id(),
                source: right_source,
                assignments: Assignments::identity(right_outputs.iter().cloned()),
            }));
            Arc::new(PlanNode::SpatialJoin(SpatialJoinNode {
                left: left_source,
                right: right_source,
                filter: new_join_predicate,
                ..spatial.clone()
            }))
        } else if type_changed {
            Arc::new(PlanNode::SpatialJoin(spatial.clone()))
        } else {
            node.clone()
        };

        output = self.with_filter(output, post_join_predicate);
        output
    }

    /// Materialize a non-symbol expression behind a fresh symbol; plain
    /// symbol references pass through.
    fn symbol_for_expression(&mut self, expression: &Expression) -> Symbol {
        if let Expression::Symbol(symbol) = expression {
            return symbol.clone();
        }
        let ty = self
            .type_analyzer
            .get_type(self.symbol_allocator.types(), expression);
        self.symbol_allocator.new_symbol_for(expression, ty)
    }

    fn simplify_expression(&self, expression: &Expression) -> Expression {
        let folded = interpreter::optimize(expression);
        if let Expression::Literal(value) = &folded {
            let ty = self
                .type_analyzer
                .get_type(self.symbol_allocator.types(), expression);
            return self.literal_encoder.to_expression(value.clone(), ty);
        }
        folded
    }
}

/// The join condition as one predicate: equi clauses plus the residual
/// filter.
fn extract_join_predicate(join: &JoinNode) -> Expression {
    let mut conjuncts: Vec<Expression> =
        join.criteria.iter().map(|clause| clause.to_expression()).collect();
    if let Some(filter) = &join.filter {
        conjuncts.push(filter.clone());
    }
    combine_conjuncts(conjuncts)
}

/// A conjunct usable as an equi clause: a deterministic equality whose sides
/// reference symbols wholly contained in opposite join inputs.
fn is_join_equality(
    resolver: &dyn FunctionResolver,
    expression: &Expression,
    left_symbols: &[Symbol],
    right_symbols: &[Symbol],
) -> bool {
    if !is_deterministic(expression, resolver) {
        return false;
    }
    let Expression::Comparison {
        op: ComparisonOp::Eq,
        left,
        right,
    } = expression
    else {
        return false;
    };
    let left_side = left.unique_symbols();
    let right_side = right.unique_symbols();
    if left_side.is_empty() || right_side.is_empty() {
        return false;
    }
    let contained =
        |symbols: &std::collections::BTreeSet<Symbol>, side: &[Symbol]| {
            symbols.iter().all(|s| side.contains(s))
        };
    (contained(&left_side, left_symbols) && contained(&right_side, right_symbols))
        || (contained(&left_side, right_symbols) && contained(&right_side, left_symbols))
}

fn clause_set(clauses: &[EquiJoinClause]) -> HashSet<(Symbol, Symbol)> {
    clauses
        .iter()
        .map(|clause| (clause.left.clone(), clause.right.clone()))
        .collect()
}

struct InnerJoinPushDownResult {
    left_predicate: Expression,
    right_predicate: Expression,
    join_predicate: Expression,
    post_join_predicate: Expression,
}

/// Split the predicates of an inner join into a part for each input, a
/// residual join condition, and (always TRUE here) a post-join part.
fn process_inner_join(
    resolver: &dyn FunctionResolver,
    inherited_predicate: &Expression,
    left_effective_predicate: &Expression,
    right_effective_predicate: &Expression,
    join_predicate: &Expression,
    left_symbols: &[Symbol],
    right_symbols: &[Symbol],
) -> InnerJoinPushDownResult {
    let left_scope: HashSet<Symbol> = left_symbols.iter().cloned().collect();
    let right_scope: HashSet<Symbol> = right_symbols.iter().cloned().collect();
    assert!(
        left_effective_predicate
            .unique_symbols()
            .iter()
            .all(|s| left_scope.contains(s)),
        "left effective predicate must only reference left output symbols"
    );
    assert!(
        right_effective_predicate
            .unique_symbols()
            .iter()
            .all(|s| right_scope.contains(s)),
        "right effective predicate must only reference right output symbols"
    );

    let mut left_push_down = Vec::new();
    let mut right_push_down = Vec::new();
    let mut join_conjuncts = Vec::new();

    // Non-deterministic conjuncts cannot be localized; they stay in the
    // join condition slot.
    for conjunct in extract_conjuncts(inherited_predicate) {
        if !is_deterministic(&conjunct, resolver) {
            join_conjuncts.push(conjunct);
        }
    }
    let inherited = filter_deterministic_conjuncts(inherited_predicate, resolver);
    for conjunct in extract_conjuncts(join_predicate) {
        if !is_deterministic(&conjunct, resolver) {
            join_conjuncts.push(conjunct);
        }
    }
    let join_predicate = filter_deterministic_conjuncts(join_predicate, resolver);
    let left_effective = filter_deterministic_conjuncts(left_effective_predicate, resolver);
    let right_effective = filter_deterministic_conjuncts(right_effective_predicate, resolver);

    // Inline constants implied by the inherited predicate into each
    // effective predicate. Both rewrites stay inside their own scope.
    let predicate_inference = EqualityInference::new(resolver, &[&inherited]);
    let simplified_left_effective = predicate_inference
        .rewrite(&left_effective, &left_scope)
        .expect("left effective predicate is closed over the left scope");
    let simplified_right_effective = predicate_inference
        .rewrite(&right_effective, &right_scope)
        .expect("right effective predicate is closed over the right scope");

    // Simplify the inherited predicate with equalities the inputs already
    // guarantee.
    let assertions = EqualityInference::new(resolver, &[&left_effective, &right_effective]);
    let both_scopes: HashSet<Symbol> = left_scope.union(&right_scope).cloned().collect();
    let inherited = assertions
        .rewrite(&inherited, &both_scopes)
        .expect("inherited predicate references symbols outside the join scope");

    let all_inference = EqualityInference::new(
        resolver,
        &[
            &inherited,
            &left_effective,
            &right_effective,
            &join_predicate,
            &simplified_left_effective,
            &simplified_right_effective,
        ],
    );
    let all_without_left_inferred = EqualityInference::new(
        resolver,
        &[
            &inherited,
            &right_effective,
            &join_predicate,
            &simplified_right_effective,
        ],
    );
    let all_without_right_inferred = EqualityInference::new(
        resolver,
        &[
            &inherited,
            &left_effective,
            &join_predicate,
            &simplified_left_effective,
        ],
    );

    left_push_down.extend(
        all_without_left_inferred
            .generate_equalities_partitioned_by(&left_scope)
            .scope_equalities,
    );
    right_push_down.extend(
        all_without_right_inferred
            .generate_equalities_partitioned_by(&right_scope)
            .scope_equalities,
    );
    // Equalities bridging the two sides become the join condition.
    join_conjuncts.extend(
        all_inference
            .generate_equalities_partitioned_by(&left_scope)
            .scope_straddling_equalities,
    );

    for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &inherited) {
        let left_rewritten = all_inference.rewrite(&conjunct, &left_scope);
        if let Some(rewritten) = &left_rewritten {
            left_push_down.push(rewritten.clone());
        }
        let right_rewritten = all_inference.rewrite(&conjunct, &right_scope);
        if let Some(rewritten) = &right_rewritten {
            right_push_down.push(rewritten.clone());
        }
        if left_rewritten.is_none() && right_rewritten.is_none() {
            join_conjuncts.push(conjunct);
        }
    }

    // Replicate each input's guarantees to the opposite side where the
    // equalities allow it.
    for conjunct in
        EqualityInference::non_inferrable_conjuncts(resolver, &simplified_right_effective)
    {
        if let Some(rewritten) = all_inference.rewrite(&conjunct, &left_scope) {
            left_push_down.push(rewritten);
        }
    }
    for conjunct in
        EqualityInference::non_inferrable_conjuncts(resolver, &simplified_left_effective)
    {
        if let Some(rewritten) = all_inference.rewrite(&conjunct, &right_scope) {
            right_push_down.push(rewritten);
        }
    }

    for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &join_predicate) {
        let left_rewritten = all_inference.rewrite(&conjunct, &left_scope);
        if let Some(rewritten) = &left_rewritten {
            left_push_down.push(rewritten.clone());
        }
        let right_rewritten = all_inference.rewrite(&conjunct, &right_scope);
        if let Some(rewritten) = &right_rewritten {
            right_push_down.push(rewritten.clone());
        }
        if left_rewritten.is_none() && right_rewritten.is_none() {
            join_conjuncts.push(conjunct);
        }
    }

    InnerJoinPushDownResult {
        left_predicate: combine_conjuncts(left_push_down),
        right_predicate: combine_conjuncts(right_push_down),
        join_predicate: combine_conjuncts(join_conjuncts),
        post_join_predicate: Expression::true_literal(),
    }
}

struct OuterJoinPushDownResult {
    outer_join_predicate: Expression,
    inner_join_predicate: Expression,
    join_predicate: Expression,
    post_join_predicate: Expression,
}

/// Split the predicates of a LEFT or RIGHT join, with `outer` naming the
/// row-preserving side and `inner` the null-producing side.
///
/// The asymmetry is in what may cross to the inner side: a conjunct survives
/// null padding only if it is implied for every non-padded row, which is
/// exactly when it can be rewritten from outer-side facts through equalities
/// validated against both effective predicates and the join condition.
fn process_limited_outer_join(
    resolver: &dyn FunctionResolver,
    inherited_predicate: &Expression,
    outer_effective_predicate: &Expression,
    inner_effective_predicate: &Expression,
    join_predicate: &Expression,
    outer_symbols: &[Symbol],
    inner_symbols: &[Symbol],
) -> OuterJoinPushDownResult {
    let outer_scope: HashSet<Symbol> = outer_symbols.iter().cloned().collect();
    let inner_scope: HashSet<Symbol> = inner_symbols.iter().cloned().collect();
    assert!(
        outer_effective_predicate
            .unique_symbols()
            .iter()
            .all(|s| outer_scope.contains(s)),
        "outer effective predicate must only reference outer output symbols"
    );
    assert!(
        inner_effective_predicate
            .unique_symbols()
            .iter()
            .all(|s| inner_scope.contains(s)),
        "inner effective predicate must only reference inner output symbols"
    );

    let mut outer_push_down = Vec::new();
    let mut inner_push_down = Vec::new();
    let mut post_join_conjuncts = Vec::new();
    let mut join_conjuncts = Vec::new();

    for conjunct in extract_conjuncts(inherited_predicate) {
        if !is_deterministic(&conjunct, resolver) {
            post_join_conjuncts.push(conjunct);
        }
    }
    let inherited = filter_deterministic_conjuncts(inherited_predicate, resolver);

    let outer_effective = filter_deterministic_conjuncts(outer_effective_predicate, resolver);
    let inner_effective = filter_deterministic_conjuncts(inner_effective_predicate, resolver);
    for conjunct in extract_conjuncts(join_predicate) {
        if !is_deterministic(&conjunct, resolver) {
            join_conjuncts.push(conjunct);
        }
    }
    let join_predicate = filter_deterministic_conjuncts(join_predicate, resolver);

    let inherited_inference = EqualityInference::new(resolver, &[&inherited]);
    let outer_inference = EqualityInference::new(resolver, &[&inherited, &outer_effective]);

    let equality_partition = inherited_inference.generate_equalities_partitioned_by(&outer_scope);
    let outer_only_inherited_equalities =
        combine_conjuncts(equality_partition.scope_equalities.clone());

    // The only inference allowed to move conjuncts into the inner side:
    // outer-side equalities may bridge through the join condition only when
    // validated against the effective predicates of both inputs.
    let potential_null_symbol_inference = EqualityInference::new(
        resolver,
        &[
            &outer_only_inherited_equalities,
            &outer_effective,
            &inner_effective,
            &join_predicate,
        ],
    );

    let potential_null_symbol_inference_without_inner_inferred = EqualityInference::new(
        resolver,
        &[
            &outer_only_inherited_equalities,
            &outer_effective,
            &join_predicate,
        ],
    );
    inner_push_down.extend(
        potential_null_symbol_inference_without_inner_inferred
            .generate_equalities_partitioned_by(&inner_scope)
            .scope_equalities,
    );

    let join_equality_partition = EqualityInference::new(resolver, &[&join_predicate])
        .generate_equalities_partitioned_by(&inner_scope);
    inner_push_down.extend(join_equality_partition.scope_equalities);
    join_conjuncts.extend(join_equality_partition.scope_complement_equalities);
    join_conjuncts.extend(join_equality_partition.scope_straddling_equalities);

    outer_push_down.extend(equality_partition.scope_equalities);
    post_join_conjuncts.extend(equality_partition.scope_complement_equalities);
    post_join_conjuncts.extend(equality_partition.scope_straddling_equalities);

    for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &inherited) {
        if let Some(outer_rewritten) = outer_inference.rewrite(&conjunct, &outer_scope) {
            outer_push_down.push(outer_rewritten.clone());
            // A conjunct crosses to the inner side only via its outer form.
            if let Some(inner_rewritten) =
                potential_null_symbol_inference.rewrite(&outer_rewritten, &inner_scope)
            {
                inner_push_down.push(inner_rewritten);
            }
        } else {
            post_join_conjuncts.push(conjunct);
        }
    }

    for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &outer_effective) {
        if let Some(rewritten) = potential_null_symbol_inference.rewrite(&conjunct, &inner_scope) {
            inner_push_down.push(rewritten);
        }
    }

    for conjunct in EqualityInference::non_inferrable_conjuncts(resolver, &join_predicate) {
        match potential_null_symbol_inference.rewrite(&conjunct, &inner_scope) {
            Some(rewritten) => inner_push_down.push(rewritten),
            None => join_conjuncts.push(conjunct),
        }
    }

    OuterJoinPushDownResult {
        outer_join_predicate: combine_conjuncts(outer_push_down),
        inner_join_predicate: combine_conjuncts(inner_push_down),
        join_predicate: combine_conjuncts(join_conjuncts),
        post_join_predicate: combine_conjuncts(post_join_conjuncts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppd_core::functions::BuiltinFunctions;

    fn sym(name: &str) -> Expression {
        Symbol::new(name).to_expression()
    }

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().copied().map(Symbol::new).collect()
    }

    #[test]
    fn test_inner_join_pushes_inherited_to_both_sides() {
        let resolver = BuiltinFunctions::new();
        let result = process_inner_join(
            &resolver,
            &Expression::comparison(ComparisonOp::Gt, sym("l_x"), Expression::bigint(5)),
            &Expression::true_literal(),
            &Expression::true_literal(),
            &Expression::equality(sym("l_x"), sym("r_x")),
            &symbols(&["l_x", "l_y"]),
            &symbols(&["r_x", "r_y"]),
        );
        assert_eq!(
            result.left_predicate,
            Expression::comparison(ComparisonOp::Gt, sym("l_x"), Expression::bigint(5))
        );
        assert_eq!(
            result.right_predicate,
            Expression::comparison(ComparisonOp::Gt, sym("r_x"), Expression::bigint(5))
        );
        assert_eq!(
            result.join_predicate,
            Expression::equality(sym("l_x"), sym("r_x"))
        );
        assert!(result.post_join_predicate.is_true_literal());
    }

    #[test]
    fn test_outer_join_keeps_unrelated_conjunct_post_join() {
        let resolver = BuiltinFunctions::new();
        let result = process_limited_outer_join(
            &resolver,
            &Expression::comparison(ComparisonOp::Gt, sym("inner_y"), Expression::bigint(0)),
            &Expression::true_literal(),
            &Expression::true_literal(),
            &Expression::equality(sym("outer_k"), sym("inner_k")),
            &symbols(&["outer_k"]),
            &symbols(&["inner_k", "inner_y"]),
        );
        // The conjunct references the null-producing side only, so it must
        // stay above the join.
        assert!(result.outer_join_predicate.is_true_literal());
        assert_eq!(
            result.post_join_predicate,
            Expression::comparison(ComparisonOp::Gt, sym("inner_y"), Expression::bigint(0))
        );
        assert!(are_expressions_equivalent(
            &result.join_predicate,
            &Expression::equality(sym("outer_k"), sym("inner_k"))
        ));
    }

    #[test]
    fn test_outer_side_constraint_crosses_to_inner_side() {
        let resolver = BuiltinFunctions::new();
        let result = process_limited_outer_join(
            &resolver,
            &Expression::equality(sym("outer_k"), Expression::bigint(7)),
            &Expression::true_literal(),
            &Expression::true_literal(),
            &Expression::equality(sym("outer_k"), sym("inner_k")),
            &symbols(&["outer_k"]),
            &symbols(&["inner_k"]),
        );
        let expected_outer = Expression::equality(Expression::bigint(7), sym("outer_k"));
        let expected_inner = Expression::equality(Expression::bigint(7), sym("inner_k"));
        assert!(extract_conjuncts(&result.outer_join_predicate).contains(&expected_outer));
        assert!(extract_conjuncts(&result.inner_join_predicate).contains(&expected_inner));
    }

    #[test]
    fn test_join_equality_recognition() {
        let resolver = BuiltinFunctions::new();
        let left = symbols(&["a", "b"]);
        let right = symbols(&["x", "y"]);

        assert!(is_join_equality(
            &resolver,
            &Expression::equality(sym("a"), sym("x")),
            &left,
            &right
        ));
        // Reversed sides still qualify.
        assert!(is_join_equality(
            &resolver,
            &Expression::equality(sym("y"), sym("b")),
            &left,
            &right
        ));
        // Same-side equality is a filter, not a clause.
        assert!(!is_join_equality(
            &resolver,
            &Expression::equality(sym("a"), sym("b")),
            &left,
            &right
        ));
        // A constant side has no symbols to anchor a clause.
        assert!(!is_join_equality(
            &resolver,
            &Expression::equality(sym("a"), Expression::bigint(1)),
            &left,
            &right
        ));
    }
}
