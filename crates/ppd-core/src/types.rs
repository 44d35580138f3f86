//! # Types and Type Analysis
//!
//! A small scalar type system plus the syntactic type analyzer the optimizer
//! consults when it materializes new symbols or re-encodes folded literals.
//! The analyzer derives types structurally: comparisons and boolean logic are
//! `Boolean`, arithmetic promotes `Bigint` to `Double` when either side is a
//! double, `CAST` yields its target, and symbols resolve through the
//! `TypeProvider` captured at planning time.

use crate::expr::{Expression, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Scalar types known to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Boolean,
    Bigint,
    Double,
    Varchar,
    Date,
    /// Type could not be derived (e.g. an unregistered function call).
    Unknown,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Boolean => "boolean",
            Type::Bigint => "bigint",
            Type::Double => "double",
            Type::Varchar => "varchar",
            Type::Date => "date",
            Type::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Symbol-to-type lookup for a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeProvider {
    types: HashMap<Symbol, Type>,
}

impl TypeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, symbol: Symbol, ty: Type) {
        self.types.insert(symbol, ty);
    }

    /// The type of a symbol, or `Unknown` for symbols this provider has
    /// never seen.
    pub fn get(&self, symbol: &Symbol) -> Type {
        self.types.get(symbol).copied().unwrap_or(Type::Unknown)
    }
}

impl FromIterator<(Symbol, Type)> for TypeProvider {
    fn from_iter<I: IntoIterator<Item = (Symbol, Type)>>(iter: I) -> Self {
        TypeProvider {
            types: iter.into_iter().collect(),
        }
    }
}

/// Derives the result type of an expression.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeAnalyzer;

impl TypeAnalyzer {
    pub fn new() -> Self {
        TypeAnalyzer
    }

    pub fn get_type(&self, types: &TypeProvider, expr: &Expression) -> Type {
        match expr {
            Expression::Symbol(s) => types.get(s),
            Expression::Literal(v) => v.value_type(),
            Expression::Comparison { .. }
            | Expression::And(_)
            | Expression::Or(_)
            | Expression::Not(_)
            | Expression::IsNull(_) => Type::Boolean,
            Expression::Arithmetic { left, right, .. } => {
                let l = self.get_type(types, left);
                let r = self.get_type(types, right);
                if l == Type::Double || r == Type::Double {
                    Type::Double
                } else if l == Type::Bigint && r == Type::Bigint {
                    Type::Bigint
                } else {
                    Type::Unknown
                }
            }
            Expression::Function { .. } => Type::Unknown,
            Expression::Cast { target, .. } => *target,
            Expression::Try(body) => self.get_type(types, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ArithmeticOp, ComparisonOp};

    #[test]
    fn test_arithmetic_promotion() {
        let mut types = TypeProvider::new();
        types.put(Symbol::new("i"), Type::Bigint);
        types.put(Symbol::new("d"), Type::Double);
        let analyzer = TypeAnalyzer::new();

        let sum = Expression::arithmetic(
            ArithmeticOp::Add,
            Symbol::new("i").to_expression(),
            Symbol::new("d").to_expression(),
        );
        assert_eq!(analyzer.get_type(&types, &sum), Type::Double);

        let cmp = Expression::comparison(
            ComparisonOp::Lt,
            Symbol::new("i").to_expression(),
            Expression::bigint(10),
        );
        assert_eq!(analyzer.get_type(&types, &cmp), Type::Boolean);
    }
}
