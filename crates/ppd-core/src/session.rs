//! Session-level configuration and the warning sink handed to optimizers.

use serde::{Deserialize, Serialize};

/// Per-query session settings consumed by the optimizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    enable_dynamic_filtering: bool,
    predicate_pushdown_use_table_properties: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dynamic_filtering(mut self, enabled: bool) -> Self {
        self.enable_dynamic_filtering = enabled;
        self
    }

    pub fn with_pushdown_table_properties(mut self, enabled: bool) -> Self {
        self.predicate_pushdown_use_table_properties = enabled;
        self
    }

    pub fn is_dynamic_filtering_enabled(&self) -> bool {
        self.enable_dynamic_filtering
    }

    pub fn is_pushdown_with_table_properties(&self) -> bool {
        self.predicate_pushdown_use_table_properties
    }
}

/// Collects non-fatal diagnostics produced while optimizing.
#[derive(Debug, Clone, Default)]
pub struct WarningCollector {
    warnings: Vec<String>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
