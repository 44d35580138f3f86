//! # Relational Plan IR
//!
//! This module defines the logical plan tree the optimizer rewrites. Plans
//! are immutable values: node children are `Arc<PlanNode>`, rewrites build
//! fresh nodes that share unchanged subtrees, and callers detect "did this
//! change" with `Arc::ptr_eq`. Every node carries a `PlanNodeId` and exposes
//! a deterministic output-symbol list; rewrites must preserve the root's
//! output contract, adding a trailing identity projection if needed.
//!
//! ## Node Inventory
//!
//! Scan and filter primitives (`TableScan`, `Filter`, `Project`), the join
//! family (`Join`, `SemiJoin`, `SpatialJoin`), grouping (`Aggregation`,
//! `GroupId`, `MarkDistinct`), set operations and data movement (`Union`,
//! `Exchange`), and the pass-through carriers (`Sort`, `Sample`, `Window`,
//! `Unnest`, `AssignUniqueId`).

use crate::expr::{Expression, Symbol};
use crate::types::{Type, TypeProvider};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identifier of a plan node, unique within one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanNodeId(pub u64);

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotone plan node id source.
#[derive(Debug, Default)]
pub struct PlanNodeIdAllocator {
    next: u64,
}

impl PlanNodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> PlanNodeId {
        let id = PlanNodeId(self.next);
        self.next += 1;
        id
    }
}

/// Allocates fresh symbols and tracks their types.
#[derive(Debug)]
pub struct SymbolAllocator {
    types: TypeProvider,
    next: u64,
}

impl SymbolAllocator {
    pub fn new(types: TypeProvider) -> Self {
        SymbolAllocator { types, next: 0 }
    }

    /// Allocate a fresh symbol named after `hint`.
    pub fn new_symbol(&mut self, hint: &str, ty: Type) -> Symbol {
        let symbol = Symbol::new(format!("{}_{}", hint, self.next));
        self.next += 1;
        self.types.put(symbol.clone(), ty);
        symbol
    }

    /// Allocate a fresh symbol for a materialized expression, deriving the
    /// name hint from the expression shape.
    pub fn new_symbol_for(&mut self, expr: &Expression, ty: Type) -> Symbol {
        let hint = match expr {
            Expression::Symbol(s) => s.name().to_string(),
            Expression::Function { name, .. } => name.clone(),
            Expression::Cast { .. } => "cast".to_string(),
            _ => "expr".to_string(),
        };
        self.new_symbol(&hint, ty)
    }

    pub fn types(&self) -> &TypeProvider {
        &self.types
    }
}

/// Insertion-ordered mapping from output symbol to defining expression.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assignments {
    entries: Vec<(Symbol, Expression)>,
}

impl Assignments {
    pub fn builder() -> AssignmentsBuilder {
        AssignmentsBuilder::default()
    }

    /// Identity assignments for the given symbols, in order.
    pub fn identity<I>(symbols: I) -> Assignments
    where
        I: IntoIterator<Item = Symbol>,
    {
        let mut builder = Assignments::builder();
        for symbol in symbols {
            builder.put_identity(symbol);
        }
        builder.build()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Expression> {
        self.entries
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, e)| e)
    }

    pub fn outputs(&self) -> Vec<Symbol> {
        self.entries.iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Symbol, Expression)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materialize the mapping for symbol inlining.
    pub fn as_map(&self) -> std::collections::HashMap<Symbol, Expression> {
        self.entries.iter().cloned().collect()
    }

    /// True if every assignment is `output := output`.
    pub fn is_identity(&self) -> bool {
        self.entries
            .iter()
            .all(|(s, e)| matches!(e, Expression::Symbol(r) if r == s))
    }
}

/// Builder that freezes into an `Assignments` map.
#[derive(Debug, Default)]
pub struct AssignmentsBuilder {
    entries: Vec<(Symbol, Expression)>,
}

impl AssignmentsBuilder {
    pub fn put(&mut self, symbol: Symbol, expression: Expression) -> &mut Self {
        if let Some((_, existing)) = self.entries.iter().find(|(s, _)| *s == symbol) {
            assert!(
                *existing == expression,
                "conflicting assignment for symbol {}",
                symbol
            );
            return self;
        }
        self.entries.push((symbol, expression));
        self
    }

    pub fn put_identity(&mut self, symbol: Symbol) -> &mut Self {
        let expression = symbol.to_expression();
        self.put(symbol, expression)
    }

    pub fn put_identities<I>(&mut self, symbols: I) -> &mut Self
    where
        I: IntoIterator<Item = Symbol>,
    {
        for symbol in symbols {
            self.put_identity(symbol);
        }
        self
    }

    pub fn build(&self) -> Assignments {
        Assignments {
            entries: self.entries.clone(),
        }
    }
}

/// Catalog handle of a scanned table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableHandle {
    pub schema: String,
    pub name: String,
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// SQL join types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

/// Physical distribution of a join, carried opaquely through rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionType {
    Partitioned,
    Replicated,
}

/// One equi-join conjunct: `left = right` with each symbol coming from the
/// corresponding join input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EquiJoinClause {
    pub left: Symbol,
    pub right: Symbol,
}

impl EquiJoinClause {
    pub fn new(left: Symbol, right: Symbol) -> Self {
        EquiJoinClause { left, right }
    }

    pub fn to_expression(&self) -> Expression {
        Expression::equality(self.left.to_expression(), self.right.to_expression())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScanNode {
    pub id: PlanNodeId,
    pub table: TableHandle,
    pub output_symbols: Vec<Symbol>,
    /// Predicate guaranteed by the connector (from table properties).
    pub enforced_constraint: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub predicate: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub assignments: Assignments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationFunction {
    pub name: String,
    pub args: Vec<Expression>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    /// Output symbol and function for each aggregate, in output order.
    pub aggregations: Vec<(Symbol, AggregationFunction)>,
    /// One symbol list per grouping set. An empty list is the global set.
    pub grouping_sets: Vec<Vec<Symbol>>,
    pub group_id_symbol: Option<Symbol>,
}

impl AggregationNode {
    /// Union of all grouping sets, preserving first occurrence order.
    pub fn grouping_keys(&self) -> Vec<Symbol> {
        let mut keys = Vec::new();
        for set in &self.grouping_sets {
            for symbol in set {
                if !keys.contains(symbol) {
                    keys.push(symbol.clone());
                }
            }
        }
        keys
    }

    /// True if any grouping set is the global (empty) set. Such an
    /// aggregation produces a row even for empty input.
    pub fn has_empty_grouping_set(&self) -> bool {
        self.grouping_sets.is_empty() || self.grouping_sets.iter().any(|s| s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub partition_by: Vec<Symbol>,
    /// Output symbol and window call for each function.
    pub functions: Vec<(Symbol, Expression)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinNode {
    pub id: PlanNodeId,
    pub join_type: JoinType,
    pub left: Arc<PlanNode>,
    pub right: Arc<PlanNode>,
    pub criteria: Vec<EquiJoinClause>,
    pub output_symbols: Vec<Symbol>,
    /// Residual non-equi join condition.
    pub filter: Option<Expression>,
    pub distribution_type: Option<DistributionType>,
    /// Dynamic filter id to build-side symbol. Probe-side markers referencing
    /// these ids live in predicates below the left input.
    pub dynamic_filters: BTreeMap<String, Symbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemiJoinNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub filtering_source: Arc<PlanNode>,
    pub source_join_symbol: Symbol,
    pub filtering_source_join_symbol: Symbol,
    /// Boolean membership output appended to the source columns.
    pub semi_join_output: Symbol,
    pub distribution_type: Option<DistributionType>,
}

/// Spatial join types. Only inner and left are defined; the right side is
/// always the build side of the spatial index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialJoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialJoinNode {
    pub id: PlanNodeId,
    pub join_type: SpatialJoinType,
    pub left: Arc<PlanNode>,
    pub right: Arc<PlanNode>,
    pub output_symbols: Vec<Symbol>,
    /// The spatial predicate. Required: a spatial join without a spatial
    /// condition is malformed.
    pub filter: Expression,
    pub left_partition_symbol: Option<Symbol>,
    pub right_partition_symbol: Option<Symbol>,
    pub kdb_tree: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionNode {
    pub id: PlanNodeId,
    pub sources: Vec<Arc<PlanNode>>,
    /// Output symbol to the corresponding symbol in each source, aligned
    /// with `sources`.
    pub symbol_mapping: Vec<(Symbol, Vec<Symbol>)>,
}

impl UnionNode {
    /// Mapping from output symbols to source `index` symbols, for inlining.
    pub fn source_symbol_map(
        &self,
        index: usize,
    ) -> std::collections::HashMap<Symbol, Expression> {
        self.symbol_mapping
            .iter()
            .map(|(output, inputs)| (output.clone(), inputs[index].to_expression()))
            .collect()
    }
}

/// Exchange flavors; opaque to predicate pushdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeType {
    Gather,
    Repartition,
    Replicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeNode {
    pub id: PlanNodeId,
    pub exchange_type: ExchangeType,
    pub sources: Vec<Arc<PlanNode>>,
    /// Per-source input symbols, positionally aligned with `output_symbols`.
    pub inputs: Vec<Vec<Symbol>>,
    pub output_symbols: Vec<Symbol>,
}

impl ExchangeNode {
    pub fn source_symbol_map(
        &self,
        index: usize,
    ) -> std::collections::HashMap<Symbol, Expression> {
        self.output_symbols
            .iter()
            .zip(self.inputs[index].iter())
            .map(|(output, input)| (output.clone(), input.to_expression()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupIdNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    /// Grouping sets in terms of output grouping symbols.
    pub grouping_sets: Vec<Vec<Symbol>>,
    /// Output grouping symbol to underlying source symbol.
    pub grouping_columns: Vec<(Symbol, Symbol)>,
    /// Source symbols passed through for aggregation arguments.
    pub aggregation_arguments: Vec<Symbol>,
    pub group_id_symbol: Symbol,
}

impl GroupIdNode {
    /// Grouping outputs present in every grouping set. Only these are
    /// constant across the generated group id rows.
    pub fn common_grouping_columns(&self) -> Vec<Symbol> {
        self.grouping_columns
            .iter()
            .map(|(output, _)| output.clone())
            .filter(|output| self.grouping_sets.iter().all(|set| set.contains(output)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkDistinctNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub marker_symbol: Symbol,
    pub distinct_symbols: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortItem {
    pub symbol: Symbol,
    pub ascending: bool,
    pub nulls_first: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub order_by: Vec<SortItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Bernoulli,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub sample_type: SampleType,
    pub sample_ratio: OrderedFloat<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnnestNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    /// Source columns replicated onto every unnested row.
    pub replicate_symbols: Vec<Symbol>,
    /// Collection-typed input symbol to its element output symbols.
    pub unnest_symbols: Vec<(Symbol, Vec<Symbol>)>,
    pub ordinality_symbol: Option<Symbol>,
    pub join_type: JoinType,
    pub filter: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignUniqueIdNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub id_column: Symbol,
}

/// The logical plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    TableScan(TableScanNode),
    Filter(FilterNode),
    Project(ProjectNode),
    Aggregation(AggregationNode),
    Window(WindowNode),
    Join(JoinNode),
    SemiJoin(SemiJoinNode),
    SpatialJoin(SpatialJoinNode),
    Union(UnionNode),
    Exchange(ExchangeNode),
    GroupId(GroupIdNode),
    MarkDistinct(MarkDistinctNode),
    Sort(SortNode),
    Sample(SampleNode),
    Unnest(UnnestNode),
    AssignUniqueId(AssignUniqueIdNode),
}

impl PlanNode {
    pub fn id(&self) -> PlanNodeId {
        match self {
            PlanNode::TableScan(n) => n.id,
            PlanNode::Filter(n) => n.id,
            PlanNode::Project(n) => n.id,
            PlanNode::Aggregation(n) => n.id,
            PlanNode::Window(n) => n.id,
            PlanNode::Join(n) => n.id,
            PlanNode::SemiJoin(n) => n.id,
            PlanNode::SpatialJoin(n) => n.id,
            PlanNode::Union(n) => n.id,
            PlanNode::Exchange(n) => n.id,
            PlanNode::GroupId(n) => n.id,
            PlanNode::MarkDistinct(n) => n.id,
            PlanNode::Sort(n) => n.id,
            PlanNode::Sample(n) => n.id,
            PlanNode::Unnest(n) => n.id,
            PlanNode::AssignUniqueId(n) => n.id,
        }
    }

    /// The node's output columns, in their contractual order.
    pub fn output_symbols(&self) -> Vec<Symbol> {
        match self {
            PlanNode::TableScan(n) => n.output_symbols.clone(),
            PlanNode::Filter(n) => n.source.output_symbols(),
            PlanNode::Project(n) => n.assignments.outputs(),
            PlanNode::Aggregation(n) => {
                let mut out = n.grouping_keys();
                if let Some(group_id) = &n.group_id_symbol {
                    if !out.contains(group_id) {
                        out.push(group_id.clone());
                    }
                }
                out.extend(n.aggregations.iter().map(|(s, _)| s.clone()));
                out
            }
            PlanNode::Window(n) => {
                let mut out = n.source.output_symbols();
                out.extend(n.functions.iter().map(|(s, _)| s.clone()));
                out
            }
            PlanNode::Join(n) => n.output_symbols.clone(),
            PlanNode::SemiJoin(n) => {
                let mut out = n.source.output_symbols();
                out.push(n.semi_join_output.clone());
                out
            }
            PlanNode::SpatialJoin(n) => n.output_symbols.clone(),
            PlanNode::Union(n) => n.symbol_mapping.iter().map(|(s, _)| s.clone()).collect(),
            PlanNode::Exchange(n) => n.output_symbols.clone(),
            PlanNode::GroupId(n) => {
                let mut out: Vec<Symbol> =
                    n.grouping_columns.iter().map(|(s, _)| s.clone()).collect();
                out.extend(n.aggregation_arguments.iter().cloned());
                out.push(n.group_id_symbol.clone());
                out
            }
            PlanNode::MarkDistinct(n) => {
                let mut out = n.source.output_symbols();
                out.push(n.marker_symbol.clone());
                out
            }
            PlanNode::Sort(n) => n.source.output_symbols(),
            PlanNode::Sample(n) => n.source.output_symbols(),
            PlanNode::Unnest(n) => {
                let mut out = n.replicate_symbols.clone();
                for (_, elements) in &n.unnest_symbols {
                    out.extend(elements.iter().cloned());
                }
                if let Some(ordinality) = &n.ordinality_symbol {
                    out.push(ordinality.clone());
                }
                out
            }
            PlanNode::AssignUniqueId(n) => {
                let mut out = n.source.output_symbols();
                out.push(n.id_column.clone());
                out
            }
        }
    }

    /// Child subplans, in a fixed order.
    pub fn sources(&self) -> Vec<&Arc<PlanNode>> {
        match self {
            PlanNode::TableScan(_) => vec![],
            PlanNode::Filter(n) => vec![&n.source],
            PlanNode::Project(n) => vec![&n.source],
            PlanNode::Aggregation(n) => vec![&n.source],
            PlanNode::Window(n) => vec![&n.source],
            PlanNode::Join(n) => vec![&n.left, &n.right],
            PlanNode::SemiJoin(n) => vec![&n.source, &n.filtering_source],
            PlanNode::SpatialJoin(n) => vec![&n.left, &n.right],
            PlanNode::Union(n) => n.sources.iter().collect(),
            PlanNode::Exchange(n) => n.sources.iter().collect(),
            PlanNode::GroupId(n) => vec![&n.source],
            PlanNode::MarkDistinct(n) => vec![&n.source],
            PlanNode::Sort(n) => vec![&n.source],
            PlanNode::Sample(n) => vec![&n.source],
            PlanNode::Unnest(n) => vec![&n.source],
            PlanNode::AssignUniqueId(n) => vec![&n.source],
        }
    }

    /// Rebuild this node with new children, keeping everything else
    /// (including the node id).
    pub fn replace_sources(&self, sources: Vec<Arc<PlanNode>>) -> PlanNode {
        fn one(mut sources: Vec<Arc<PlanNode>>) -> Arc<PlanNode> {
            assert!(sources.len() == 1, "expected exactly one child");
            sources.pop().expect("non-empty")
        }
        fn two(mut sources: Vec<Arc<PlanNode>>) -> (Arc<PlanNode>, Arc<PlanNode>) {
            assert!(sources.len() == 2, "expected exactly two children");
            let right = sources.pop().expect("non-empty");
            let left = sources.pop().expect("non-empty");
            (left, right)
        }

        match self {
            PlanNode::TableScan(n) => {
                assert!(sources.is_empty(), "table scan has no children");
                PlanNode::TableScan(n.clone())
            }
            PlanNode::Filter(n) => PlanNode::Filter(FilterNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Project(n) => PlanNode::Project(ProjectNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Aggregation(n) => PlanNode::Aggregation(AggregationNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Window(n) => PlanNode::Window(WindowNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Join(n) => {
                let (left, right) = two(sources);
                PlanNode::Join(JoinNode {
                    left,
                    right,
                    ..n.clone()
                })
            }
            PlanNode::SemiJoin(n) => {
                let (source, filtering_source) = two(sources);
                PlanNode::SemiJoin(SemiJoinNode {
                    source,
                    filtering_source,
                    ..n.clone()
                })
            }
            PlanNode::SpatialJoin(n) => {
                let (left, right) = two(sources);
                PlanNode::SpatialJoin(SpatialJoinNode {
                    left,
                    right,
                    ..n.clone()
                })
            }
            PlanNode::Union(n) => {
                assert!(sources.len() == n.sources.len(), "union arity changed");
                PlanNode::Union(UnionNode {
                    sources,
                    ..n.clone()
                })
            }
            PlanNode::Exchange(n) => {
                assert!(sources.len() == n.sources.len(), "exchange arity changed");
                PlanNode::Exchange(ExchangeNode {
                    sources,
                    ..n.clone()
                })
            }
            PlanNode::GroupId(n) => PlanNode::GroupId(GroupIdNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::MarkDistinct(n) => PlanNode::MarkDistinct(MarkDistinctNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Sort(n) => PlanNode::Sort(SortNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Sample(n) => PlanNode::Sample(SampleNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::Unnest(n) => PlanNode::Unnest(UnnestNode {
                source: one(sources),
                ..n.clone()
            }),
            PlanNode::AssignUniqueId(n) => PlanNode::AssignUniqueId(AssignUniqueIdNode {
                source: one(sources),
                ..n.clone()
            }),
        }
    }
}
