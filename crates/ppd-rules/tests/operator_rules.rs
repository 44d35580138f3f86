//! Per-operator pushdown rules: carriers, grouping operators, unnest,
//! spatial joins, and the fatal unique-id invariant.

use ppd_core::canonical::are_expressions_equivalent;
use ppd_core::expr::{ComparisonOp, Expression, Symbol};
use ppd_core::functions::BuiltinFunctions;
use ppd_core::plan::{
    AssignUniqueIdNode, ExchangeNode, ExchangeType, FilterNode, GroupIdNode, JoinType,
    MarkDistinctNode, PlanNode, PlanNodeId, PlanNodeIdAllocator, SortItem, SortNode,
    SpatialJoinNode, SpatialJoinType, SymbolAllocator, TableHandle, TableScanNode, UnnestNode,
    WindowNode,
};
use ppd_core::session::{Session, WarningCollector};
use ppd_core::types::{Type, TypeAnalyzer, TypeProvider};
use ppd_rules::{PlanOptimizer, PredicatePushdown};
use std::sync::Arc;

fn symbol(name: &str) -> Symbol {
    Symbol::new(name)
}

fn sym(name: &str) -> Expression {
    Symbol::new(name).to_expression()
}

fn bigint(value: i64) -> Expression {
    Expression::bigint(value)
}

fn gt(left: Expression, right: Expression) -> Expression {
    Expression::comparison(ComparisonOp::Gt, left, right)
}

fn eq(left: Expression, right: Expression) -> Expression {
    Expression::equality(left, right)
}

struct Planner {
    ids: PlanNodeIdAllocator,
    types: TypeProvider,
}

impl Planner {
    fn new() -> Self {
        Planner {
            ids: PlanNodeIdAllocator::new(),
            types: TypeProvider::new(),
        }
    }

    fn next_id(&mut self) -> PlanNodeId {
        self.ids.next_id()
    }

    fn scan(&mut self, table: &str, columns: &[&str]) -> Arc<PlanNode> {
        for column in columns {
            self.types.put(symbol(column), Type::Bigint);
        }
        Arc::new(PlanNode::TableScan(TableScanNode {
            id: self.next_id(),
            table: TableHandle {
                schema: "test".to_string(),
                name: table.to_string(),
            },
            output_symbols: columns.iter().copied().map(Symbol::new).collect(),
            enforced_constraint: None,
        }))
    }

    fn filter(&mut self, source: Arc<PlanNode>, predicate: Expression) -> Arc<PlanNode> {
        Arc::new(PlanNode::Filter(FilterNode {
            id: self.next_id(),
            source,
            predicate,
        }))
    }

    fn optimize(&mut self, plan: Arc<PlanNode>) -> Arc<PlanNode> {
        let optimizer = PredicatePushdown::new(
            Arc::new(BuiltinFunctions::new()),
            TypeAnalyzer::new(),
            true,
            true,
        );
        let mut symbol_allocator = SymbolAllocator::new(self.types.clone());
        let mut warnings = WarningCollector::new();
        optimizer.optimize(
            plan,
            &Session::new(),
            &self.types,
            &mut symbol_allocator,
            &mut self.ids,
            &mut warnings,
        )
    }
}

fn expect_filter(node: &Arc<PlanNode>) -> &FilterNode {
    match &**node {
        PlanNode::Filter(filter) => filter,
        other => panic!("expected filter, got {:?}", other.id()),
    }
}

#[test]
fn test_sort_is_transparent() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["x"]);
    let sort = Arc::new(PlanNode::Sort(SortNode {
        id: planner.next_id(),
        source: scan,
        order_by: vec![SortItem {
            symbol: symbol("x"),
            ascending: true,
            nulls_first: false,
        }],
    }));
    let plan = planner.filter(sort, gt(sym("x"), bigint(0)));

    let optimized = planner.optimize(plan);

    let PlanNode::Sort(sort) = &*optimized else {
        panic!("expected sort at the root");
    };
    let pushed = expect_filter(&sort.source);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("x"), bigint(0))
    ));
}

#[test]
fn test_window_partition_conjunct_pushes_down() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["p", "v"]);
    planner.types.put(symbol("rnk"), Type::Bigint);
    let window = Arc::new(PlanNode::Window(WindowNode {
        id: planner.next_id(),
        source: scan,
        partition_by: vec![symbol("p")],
        functions: vec![(
            symbol("rnk"),
            Expression::Function {
                name: "rank".to_string(),
                args: vec![],
            },
        )],
    }));
    let plan = planner.filter(
        window,
        Expression::And(vec![gt(sym("p"), bigint(0)), gt(sym("rnk"), bigint(1))]),
    );

    let optimized = planner.optimize(plan);

    // Only the partition-key conjunct is constant within a partition.
    let top = expect_filter(&optimized);
    assert!(are_expressions_equivalent(
        &top.predicate,
        &gt(sym("rnk"), bigint(1))
    ));
    let PlanNode::Window(window) = &*top.source else {
        panic!("expected window below the residual filter");
    };
    let pushed = expect_filter(&window.source);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("p"), bigint(0))
    ));
}

#[test]
fn test_group_id_common_column_renames_through() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["k1", "k2", "v"]);
    for name in ["g1", "g2", "gid"] {
        planner.types.put(symbol(name), Type::Bigint);
    }
    let group_id = Arc::new(PlanNode::GroupId(GroupIdNode {
        id: planner.next_id(),
        source: scan,
        grouping_sets: vec![vec![symbol("g1"), symbol("g2")], vec![symbol("g1")]],
        grouping_columns: vec![
            (symbol("g1"), symbol("k1")),
            (symbol("g2"), symbol("k2")),
        ],
        aggregation_arguments: vec![symbol("v")],
        group_id_symbol: symbol("gid"),
    }));
    let plan = planner.filter(
        group_id,
        Expression::And(vec![eq(sym("g1"), bigint(1)), eq(sym("g2"), bigint(2))]),
    );

    let optimized = planner.optimize(plan);

    // g1 is in every grouping set, so its conjunct pushes down renamed to
    // the source column; g2 is nulled out in some sets and must stay above.
    let top = expect_filter(&optimized);
    assert!(are_expressions_equivalent(
        &top.predicate,
        &eq(sym("g2"), bigint(2))
    ));
    let PlanNode::GroupId(group_id) = &*top.source else {
        panic!("expected group id below the residual filter");
    };
    let pushed = expect_filter(&group_id.source);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &eq(sym("k1"), bigint(1))
    ));
}

#[test]
fn test_mark_distinct_splits_on_distinct_symbols() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["d", "o"]);
    planner.types.put(symbol("marker"), Type::Boolean);
    let mark = Arc::new(PlanNode::MarkDistinct(MarkDistinctNode {
        id: planner.next_id(),
        source: scan,
        marker_symbol: symbol("marker"),
        distinct_symbols: vec![symbol("d")],
    }));
    let plan = planner.filter(
        mark,
        Expression::And(vec![gt(sym("d"), bigint(0)), sym("marker")]),
    );

    let optimized = planner.optimize(plan);

    let top = expect_filter(&optimized);
    assert!(are_expressions_equivalent(&top.predicate, &sym("marker")));
    let PlanNode::MarkDistinct(mark) = &*top.source else {
        panic!("expected mark distinct below the residual filter");
    };
    let pushed = expect_filter(&mark.source);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("d"), bigint(0))
    ));
}

#[test]
fn test_exchange_maps_predicate_into_inputs() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["x1"]);
    planner.types.put(symbol("a"), Type::Bigint);
    let exchange = Arc::new(PlanNode::Exchange(ExchangeNode {
        id: planner.next_id(),
        exchange_type: ExchangeType::Repartition,
        sources: vec![scan],
        inputs: vec![vec![symbol("x1")]],
        output_symbols: vec![symbol("a")],
    }));
    let plan = planner.filter(exchange, gt(sym("a"), bigint(0)));

    let optimized = planner.optimize(plan);

    let PlanNode::Exchange(exchange) = &*optimized else {
        panic!("expected exchange at the root");
    };
    let pushed = expect_filter(&exchange.sources[0]);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("x1"), bigint(0))
    ));
}

#[test]
fn test_assign_unique_id_is_transparent() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["x"]);
    planner.types.put(symbol("unique"), Type::Bigint);
    let assign = Arc::new(PlanNode::AssignUniqueId(AssignUniqueIdNode {
        id: planner.next_id(),
        source: scan,
        id_column: symbol("unique"),
    }));
    let plan = planner.filter(assign, gt(sym("x"), bigint(0)));

    let optimized = planner.optimize(plan);

    let PlanNode::AssignUniqueId(assign) = &*optimized else {
        panic!("expected assign unique id at the root");
    };
    let pushed = expect_filter(&assign.source);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("x"), bigint(0))
    ));
}

#[test]
#[should_panic(expected = "unique id column")]
fn test_predicate_on_unique_id_column_is_fatal() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["x"]);
    planner.types.put(symbol("unique"), Type::Bigint);
    let assign = Arc::new(PlanNode::AssignUniqueId(AssignUniqueIdNode {
        id: planner.next_id(),
        source: scan,
        id_column: symbol("unique"),
    }));
    let plan = planner.filter(assign, gt(sym("unique"), bigint(0)));

    planner.optimize(plan);
}

#[test]
fn test_unnest_pushes_replicate_conjuncts_only() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["r", "arr"]);
    planner.types.put(symbol("e"), Type::Bigint);
    let unnest = Arc::new(PlanNode::Unnest(UnnestNode {
        id: planner.next_id(),
        source: scan,
        replicate_symbols: vec![symbol("r")],
        unnest_symbols: vec![(symbol("arr"), vec![symbol("e")])],
        ordinality_symbol: None,
        join_type: JoinType::Inner,
        filter: None,
    }));
    let plan = planner.filter(
        unnest,
        Expression::And(vec![gt(sym("r"), bigint(0)), gt(sym("e"), bigint(0))]),
    );

    let optimized = planner.optimize(plan);

    let top = expect_filter(&optimized);
    assert!(are_expressions_equivalent(
        &top.predicate,
        &gt(sym("e"), bigint(0))
    ));
    let PlanNode::Unnest(unnest) = &*top.source else {
        panic!("expected unnest below the residual filter");
    };
    let pushed = expect_filter(&unnest.source);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("r"), bigint(0))
    ));
}

#[test]
fn test_right_unnest_blocks_pushdown() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["r", "arr"]);
    planner.types.put(symbol("e"), Type::Bigint);
    let unnest = Arc::new(PlanNode::Unnest(UnnestNode {
        id: planner.next_id(),
        source: scan.clone(),
        replicate_symbols: vec![symbol("r")],
        unnest_symbols: vec![(symbol("arr"), vec![symbol("e")])],
        ordinality_symbol: None,
        join_type: JoinType::Right,
        filter: None,
    }));
    let plan = planner.filter(unnest, gt(sym("r"), bigint(0)));

    let optimized = planner.optimize(plan.clone());

    // Nothing moves; the original filter node survives untouched.
    assert!(Arc::ptr_eq(&optimized, &plan));
}

#[test]
fn test_try_conjunct_is_not_inlined_through_projection() {
    let mut planner = Planner::new();
    let scan = planner.scan("t", &["x"]);
    planner.types.put(symbol("a"), Type::Bigint);
    let project = Arc::new(PlanNode::Project(ppd_core::plan::ProjectNode {
        id: planner.next_id(),
        source: scan.clone(),
        assignments: {
            let mut builder = ppd_core::plan::Assignments::builder();
            builder.put(
                symbol("a"),
                Expression::arithmetic(ppd_core::expr::ArithmeticOp::Add, sym("x"), bigint(1)),
            );
            builder.build()
        },
    }));
    let plan = planner.filter(
        project,
        gt(Expression::Try(Box::new(sym("a"))), bigint(0)),
    );

    let optimized = planner.optimize(plan);

    // The Try conjunct stays above the projection and the scan is untouched.
    let top = expect_filter(&optimized);
    assert!(top.predicate.contains_try());
    let PlanNode::Project(project) = &*top.source else {
        panic!("expected projection below the try filter");
    };
    assert!(Arc::ptr_eq(&project.source, &scan));
}

#[test]
fn test_spatial_join_pushes_one_sided_conjunct() {
    let mut planner = Planner::new();
    let left = planner.scan("l", &["l_g", "l_x"]);
    let right = planner.scan("r", &["r_g"]);
    let spatial_predicate = Expression::Function {
        name: "st_contains".to_string(),
        args: vec![sym("l_g"), sym("r_g")],
    };
    let mut output_symbols = left.output_symbols();
    output_symbols.extend(right.output_symbols());
    let spatial = Arc::new(PlanNode::SpatialJoin(SpatialJoinNode {
        id: planner.next_id(),
        join_type: SpatialJoinType::Inner,
        left,
        right,
        output_symbols,
        filter: spatial_predicate.clone(),
        left_partition_symbol: None,
        right_partition_symbol: None,
        kdb_tree: None,
    }));
    let plan = planner.filter(spatial, gt(sym("l_x"), bigint(0)));

    let optimized = planner.optimize(plan);

    let PlanNode::SpatialJoin(spatial) = &*optimized else {
        panic!("expected spatial join at the root");
    };
    assert!(are_expressions_equivalent(&spatial.filter, &spatial_predicate));
    let mut left = &spatial.left;
    while let PlanNode::Project(project) = &**left {
        left = &project.source;
    }
    let pushed = expect_filter(left);
    assert!(are_expressions_equivalent(
        &pushed.predicate,
        &gt(sym("l_x"), bigint(0))
    ));
}

#[test]
fn test_left_spatial_join_normalizes_to_inner() {
    let mut planner = Planner::new();
    let left = planner.scan("l", &["l_g"]);
    let right = planner.scan("r", &["r_g", "r_y"]);
    let spatial_predicate = Expression::Function {
        name: "st_contains".to_string(),
        args: vec![sym("l_g"), sym("r_g")],
    };
    let mut output_symbols = left.output_symbols();
    output_symbols.extend(right.output_symbols());
    let spatial = Arc::new(PlanNode::SpatialJoin(SpatialJoinNode {
        id: planner.next_id(),
        join_type: SpatialJoinType::Left,
        left,
        right,
        output_symbols,
        filter: spatial_predicate,
        left_partition_symbol: None,
        right_partition_symbol: None,
        kdb_tree: None,
    }));
    let plan = planner.filter(spatial, gt(sym("r_y"), bigint(0)));

    let optimized = planner.optimize(plan);

    let mut node = &optimized;
    while let PlanNode::Project(project) = &**node {
        node = &project.source;
    }
    let PlanNode::SpatialJoin(spatial) = &**node else {
        panic!("expected spatial join, possibly under projections");
    };
    assert_eq!(spatial.join_type, SpatialJoinType::Inner);
}
