//! # Function Metadata
//!
//! The optimizer only needs one fact about a function: whether repeated
//! evaluation on the same input is guaranteed to produce the same output.
//! The `FunctionResolver` trait is the lookup seam; `BuiltinFunctions` is the
//! default table-backed implementation. Unregistered functions are assumed
//! deterministic, matching the registry convention that non-determinism is an
//! explicitly declared property.

use std::collections::HashSet;

/// Resolves function properties by name.
pub trait FunctionResolver: Send + Sync {
    fn is_deterministic(&self, name: &str) -> bool;
}

/// Default resolver with the built-in non-deterministic function set.
#[derive(Debug, Clone)]
pub struct BuiltinFunctions {
    non_deterministic: HashSet<String>,
}

impl BuiltinFunctions {
    pub fn new() -> Self {
        let non_deterministic = ["rand", "random", "uuid", "shuffle"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        BuiltinFunctions { non_deterministic }
    }

    /// Register an additional non-deterministic function.
    pub fn add_non_deterministic(&mut self, name: impl Into<String>) {
        self.non_deterministic.insert(name.into());
    }
}

impl Default for BuiltinFunctions {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionResolver for BuiltinFunctions {
    fn is_deterministic(&self, name: &str) -> bool {
        !self.non_deterministic.contains(name)
    }
}
