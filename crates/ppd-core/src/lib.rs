//! # ppd-core: Plan and Expression IR
//!
//! This crate provides the shared infrastructure for the predicate pushdown
//! optimizer: the scalar expression tree, the relational plan tree, and the
//! small collaborators the rewrite pass leans on.
//!
//! ## Module Overview
//!
//! - **`expr`**: Symbols, scalar values, and the expression tree with
//!   structural equality, traversal, and Try-opaque symbol inlining.
//! - **`plan`**: The immutable plan node variants, output-symbol contracts,
//!   assignments builder, and the id/symbol allocators.
//! - **`utils`**: Conjunct extraction/combination and determinism analysis.
//! - **`canonical`**: Canonical expression forms, cast unwrapping, and the
//!   equivalence check used to detect no-op rewrites.
//! - **`interpreter`**: Constant folding with SQL three-valued logic, plus
//!   the literal encoder.
//! - **`types`**: Scalar types, the symbol type provider, and the syntactic
//!   type analyzer.
//! - **`functions`**: Function determinism metadata.
//! - **`session`**: Session flags and the warning collector.

pub mod canonical;
pub mod expr;
pub mod functions;
pub mod interpreter;
pub mod plan;
pub mod session;
pub mod types;
pub mod utils;
