//! # Equality Inference
//!
//! Builds equivalence classes from the deterministic equality conjuncts of a
//! set of predicates and answers two questions for the pushdown pass:
//!
//! 1. **Rewrite**: can this conjunct be expressed using only symbols from a
//!    given scope (one side of a join, the grouping keys of an aggregation)?
//!    Out-of-scope sub-expressions are substituted with in-scope members of
//!    their equivalence class, preferring larger subtrees.
//! 2. **Partition**: which equalities does a class imply entirely inside the
//!    scope, entirely outside it, and bridging the two? The bridging
//!    ("scope straddling") equalities are what remains as a join condition
//!    after both sides have been localized.
//!
//! Classes are closed under sub-expression substitution: from `a = f(b)` and
//! `b = c` the inference derives `a = f(c)`. Derived members participate in
//! rewrites but are skipped when regenerating equalities so the output stays
//! equivalent to the input under the equality axioms.
//!
//! Representatives are chosen by a deterministic ordering (fewest symbol
//! references, then shortest rendering, then lexicographic), which keeps
//! plans stable across runs and prefers constants over columns.

use ppd_core::canonical::canonical_sort_key;
use ppd_core::expr::{ComparisonOp, Expression, Symbol};
use ppd_core::functions::FunctionResolver;
use ppd_core::utils::{extract_conjuncts, is_deterministic};
use std::collections::{HashMap, HashSet};

/// Equivalence-class structure over deterministic equalities.
///
/// Built once from a list of source predicates; immutable afterwards.
#[derive(Debug, Clone)]
pub struct EqualityInference {
    /// Each class's members, sorted canonically; the first member is the
    /// class representative. Classes appear in first-construction order.
    equality_sets: Vec<Vec<Expression>>,
    by_expression: HashMap<Expression, usize>,
    /// Members produced by sub-expression substitution rather than taken
    /// from the input conjuncts.
    derived: HashSet<Expression>,
}

/// The equalities a class set implies relative to one symbol scope.
#[derive(Debug, Clone, Default)]
pub struct EqualityPartition {
    /// Equalities among in-scope members.
    pub scope_equalities: Vec<Expression>,
    /// Equalities among out-of-scope members.
    pub scope_complement_equalities: Vec<Expression>,
    /// Equalities connecting in-scope and out-of-scope members.
    pub scope_straddling_equalities: Vec<Expression>,
}

impl EqualityInference {
    /// Build the inference from every equality conjunct of `expressions`.
    pub fn new(resolver: &dyn FunctionResolver, expressions: &[&Expression]) -> Self {
        let mut sets = DisjointSet::default();
        for expression in expressions {
            for conjunct in extract_conjuncts(expression) {
                if is_inference_candidate(resolver, &conjunct) {
                    if let Expression::Comparison { left, right, .. } = conjunct {
                        sets.union((*left).clone(), (*right).clone());
                    }
                }
            }
        }

        // Close the classes under sub-expression substitution: for every
        // member, replacing an equated sub-expression yields another member.
        let snapshot = sets.items();
        let by_class: HashMap<Expression, Vec<Expression>> = {
            let mut map = HashMap::new();
            for class in sets.classes() {
                for member in &class {
                    map.insert(member.clone(), class.clone());
                }
            }
            map
        };
        let mut derived: HashSet<Expression> = HashSet::new();
        for expression in &snapshot {
            if derived.contains(expression) {
                continue;
            }
            let subexpressions: Vec<Expression> = expression
                .pre_order()
                .filter(|e| *e != expression)
                .cloned()
                .collect();
            for sub in subexpressions {
                let Some(equivalents) = by_class.get(&sub) else {
                    continue;
                };
                for equivalent in equivalents {
                    if *equivalent == sub {
                        continue;
                    }
                    let rewritten = expression.replace_subexpression(&sub, equivalent);
                    sets.union(expression.clone(), rewritten.clone());
                    derived.insert(rewritten);
                }
            }
        }

        let mut equality_sets = Vec::new();
        let mut by_expression = HashMap::new();
        for mut class in sets.classes() {
            if class.len() < 2 {
                continue;
            }
            class.sort_by_key(canonical_sort_key);
            let index = equality_sets.len();
            for member in &class {
                by_expression.insert(member.clone(), index);
            }
            equality_sets.push(class);
        }

        EqualityInference {
            equality_sets,
            by_expression,
            derived,
        }
    }

    /// Attempt to express `expression` using only symbols in `scope`.
    ///
    /// Sub-expressions (and the whole expression) are replaced by in-scope
    /// members of their equivalence class, larger subtrees first. Returns
    /// `None` when some out-of-scope part has no in-scope equivalent. `Try`
    /// bodies are never rewritten, so an expression whose out-of-scope
    /// symbols hide inside a `Try` cannot be localized.
    pub fn rewrite(&self, expression: &Expression, scope: &HashSet<Symbol>) -> Option<Expression> {
        self.rewrite_with(expression, &|s| scope.contains(s), true)
    }

    fn rewrite_with(
        &self,
        expression: &Expression,
        in_scope: &dyn Fn(&Symbol) -> bool,
        allow_full_replacement: bool,
    ) -> Option<Expression> {
        let rewritten = self.rewrite_subtree(expression, in_scope, allow_full_replacement);
        if rewritten.unique_symbols().iter().all(in_scope) {
            Some(rewritten)
        } else {
            None
        }
    }

    fn rewrite_subtree(
        &self,
        expression: &Expression,
        in_scope: &dyn Fn(&Symbol) -> bool,
        allow_replacement: bool,
    ) -> Expression {
        if allow_replacement {
            if let Some(canonical) = self.scoped_canonical(expression, in_scope) {
                return canonical.clone();
            }
        }
        match expression {
            // Substitution must not reach into a Try body.
            Expression::Try(_) => expression.clone(),
            _ => expression.map_children(|child| self.rewrite_subtree(child, in_scope, true)),
        }
    }

    /// The first member (in canonical order) of `expression`'s class whose
    /// symbols all satisfy the scope predicate.
    fn scoped_canonical(
        &self,
        expression: &Expression,
        in_scope: &dyn Fn(&Symbol) -> bool,
    ) -> Option<&Expression> {
        let index = *self.by_expression.get(expression)?;
        self.equality_sets[index]
            .iter()
            .find(|member| member.unique_symbols().iter().all(in_scope))
    }

    /// Partition the implied equalities of every class by `scope`.
    ///
    /// Each class contributes equalities among its in-scope members, among
    /// its out-of-scope members, and at most the equalities needed to
    /// connect the two sides through one representative each.
    pub fn generate_equalities_partitioned_by(&self, scope: &HashSet<Symbol>) -> EqualityPartition {
        let in_scope = |s: &Symbol| scope.contains(s);
        let out_of_scope = |s: &Symbol| !scope.contains(s);

        let mut partition = EqualityPartition::default();
        for class in &self.equality_sets {
            let mut scope_expressions: Vec<Expression> = Vec::new();
            let mut complement_expressions: Vec<Expression> = Vec::new();
            let mut straddling_expressions: Vec<Expression> = Vec::new();

            for candidate in class.iter().filter(|c| !self.derived.contains(*c)) {
                let scoped = self.rewrite_with(candidate, &in_scope, false);
                let complement = self.rewrite_with(candidate, &out_of_scope, false);
                if let Some(e) = &scoped {
                    if !scope_expressions.contains(e) {
                        scope_expressions.push(e.clone());
                    }
                }
                if let Some(e) = &complement {
                    if !complement_expressions.contains(e) {
                        complement_expressions.push(e.clone());
                    }
                }
                if scoped.is_none() && complement.is_none() {
                    straddling_expressions.push(candidate.clone());
                }
            }

            let matching_canonical = canonical_of(&scope_expressions);
            if scope_expressions.len() >= 2 {
                let canonical = matching_canonical.clone().expect("non-empty");
                for expression in scope_expressions.iter().filter(|e| **e != canonical) {
                    partition
                        .scope_equalities
                        .push(Expression::equality(canonical.clone(), expression.clone()));
                }
            }

            let complement_canonical = canonical_of(&complement_expressions);
            if complement_expressions.len() >= 2 {
                let canonical = complement_canonical.clone().expect("non-empty");
                for expression in complement_expressions.iter().filter(|e| **e != canonical) {
                    partition
                        .scope_complement_equalities
                        .push(Expression::equality(canonical.clone(), expression.clone()));
                }
            }

            // Connect the two sides through one representative each, plus
            // any members that could not be localized at all.
            let mut connecting: Vec<Expression> = Vec::new();
            connecting.extend(matching_canonical.into_iter());
            connecting.extend(complement_canonical.into_iter());
            connecting.extend(straddling_expressions.into_iter());
            if let Some(connecting_canonical) = canonical_of(&connecting) {
                for expression in connecting.iter().filter(|e| **e != connecting_canonical) {
                    partition.scope_straddling_equalities.push(Expression::equality(
                        connecting_canonical.clone(),
                        expression.clone(),
                    ));
                }
            }
        }
        partition
    }

    /// Conjuncts of `expression` that are not plain deterministic equalities
    /// and therefore were not absorbed into the classes. Callers must still
    /// route these explicitly.
    pub fn non_inferrable_conjuncts(
        resolver: &dyn FunctionResolver,
        expression: &Expression,
    ) -> Vec<Expression> {
        extract_conjuncts(expression)
            .into_iter()
            .filter(|conjunct| !is_inference_candidate(resolver, conjunct))
            .collect()
    }
}

/// An equality conjunct usable for inference: a deterministic `=` comparison
/// with structurally distinct sides and no `Try` anywhere.
fn is_inference_candidate(resolver: &dyn FunctionResolver, expression: &Expression) -> bool {
    match expression {
        Expression::Comparison {
            op: ComparisonOp::Eq,
            left,
            right,
        } => {
            left != right
                && is_deterministic(expression, resolver)
                && !expression.contains_try()
        }
        _ => false,
    }
}

fn canonical_of(expressions: &[Expression]) -> Option<Expression> {
    expressions.iter().min_by_key(|e| canonical_sort_key(e)).cloned()
}

/// Union-find over expressions, with deterministic class ordering (classes
/// and members keep first-insertion order until sorted canonically).
#[derive(Debug, Default)]
struct DisjointSet {
    index: HashMap<Expression, usize>,
    parent: Vec<usize>,
    items: Vec<Expression>,
}

impl DisjointSet {
    fn intern(&mut self, expression: Expression) -> usize {
        if let Some(&i) = self.index.get(&expression) {
            return i;
        }
        let i = self.items.len();
        self.index.insert(expression.clone(), i);
        self.items.push(expression);
        self.parent.push(i);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: Expression, b: Expression) {
        let (ia, ib) = (self.intern(a), self.intern(b));
        let (ra, rb) = (self.find(ia), self.find(ib));
        if ra != rb {
            // Root at the earlier-inserted item to keep ordering stable.
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }

    fn items(&self) -> Vec<Expression> {
        self.items.clone()
    }

    fn classes(&mut self) -> Vec<Vec<Expression>> {
        let mut roots: Vec<usize> = Vec::new();
        let mut grouped: HashMap<usize, Vec<Expression>> = HashMap::new();
        for i in 0..self.items.len() {
            let root = self.find(i);
            let entry = grouped.entry(root).or_default();
            if entry.is_empty() {
                roots.push(root);
            }
            entry.push(self.items[i].clone());
        }
        roots
            .into_iter()
            .map(|root| grouped.remove(&root).expect("grouped by root"))
            .collect()
    }
}
