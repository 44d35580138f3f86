//! # ppd-rules: Predicate Pushdown Optimization
//!
//! This crate implements the predicate pushdown rewrite over the plan IR in
//! `ppd-core`. The pieces, leaves first:
//!
//! - **`equality_inference`**: Equivalence classes over deterministic
//!   equality conjuncts, with scoped rewriting and scope partitioning. This
//!   is what lets a constraint proven on one side of a join be restated on
//!   the other side.
//! - **`effective_predicate`**: A sound summary of the predicates any
//!   subplan already guarantees for its output rows.
//! - **`join_normalizer`**: Downgrades outer joins to inner joins when the
//!   predicate above rejects null-padded rows.
//! - **`dynamic_filters`**: Marker expressions carrying build-side runtime
//!   filters to probe-side scans of inner equi-joins.
//! - **`predicate_pushdown`**: The top-down driver and the per-operator
//!   split rules.
//!
//! The pass is exposed through the `PlanOptimizer` trait so it can slot into
//! an optimizer pipeline alongside other rewrites.

pub mod dynamic_filters;
pub mod effective_predicate;
pub mod equality_inference;
pub mod join_normalizer;
pub mod predicate_pushdown;

pub use predicate_pushdown::PredicatePushdown;

use ppd_core::plan::{PlanNode, PlanNodeIdAllocator, SymbolAllocator};
use ppd_core::session::{Session, WarningCollector};
use ppd_core::types::TypeProvider;
use std::sync::Arc;

/// A plan-to-plan rewrite with equivalent semantics.
///
/// Implementations must preserve the root's output symbol list and may
/// allocate fresh symbols and node ids through the provided allocators. A
/// second pass over an optimizer's own output must leave it unchanged.
pub trait PlanOptimizer {
    fn optimize(
        &self,
        plan: Arc<PlanNode>,
        session: &Session,
        types: &TypeProvider,
        symbol_allocator: &mut SymbolAllocator,
        id_allocator: &mut PlanNodeIdAllocator,
        warnings: &mut WarningCollector,
    ) -> Arc<PlanNode>;
}
