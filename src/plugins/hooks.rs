//! Hook registry
//!
//! Maps an operation kind to the ordered list of plugins that run when that
//! operation executes. Registration order is execution order.

use super::capability::OperationKind;
use super::result::OperationResult;
use super::{PluginError, PluginResult};
use std::collections::HashMap;

/// Operation kind -> ordered plugin names
#[derive(Debug, Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<OperationKind, Vec<String>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin to an operation's hook list
    ///
    /// Registering the same plugin twice makes it run twice.
    pub fn register(&mut self, operation: OperationKind, plugin: &str) {
        self.hooks
            .entry(operation)
            .or_default()
            .push(plugin.to_string());
    }

    /// Remove a plugin from an operation's hook list
    ///
    /// Removes the first matching registration.
    pub fn unregister(&mut self, operation: OperationKind, plugin: &str) -> PluginResult<()> {
        let not_registered = || {
            PluginError::NotFound(format!("hook '{}' for operation {}", plugin, operation))
        };

        let names = self.hooks.get_mut(&operation).ok_or_else(not_registered)?;
        let index = names
            .iter()
            .position(|name| name == plugin)
            .ok_or_else(not_registered)?;

        names.remove(index);
        if names.is_empty() {
            self.hooks.remove(&operation);
        }
        Ok(())
    }

    /// Drop every registration of a plugin, returning how many were removed
    pub fn remove_plugin(&mut self, plugin: &str) -> usize {
        let mut removed = 0;
        for names in self.hooks.values_mut() {
            let before = names.len();
            names.retain(|name| name != plugin);
            removed += before - names.len();
        }
        self.hooks.retain(|_, names| !names.is_empty());
        removed
    }

    /// Copy of the hook list for an operation
    pub fn snapshot(&self, operation: OperationKind) -> Vec<String> {
        self.hooks.get(&operation).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Results of running every hook of an operation
///
/// Every hook runs even after a failure; `error` holds the first failure.
#[derive(Debug, Default)]
pub struct HookOutcome {
    pub results: Vec<OperationResult>,
    pub error: Option<PluginError>,
}

impl HookOutcome {
    /// Record one hook's outcome, keeping only the first error
    pub fn record(&mut self, result: OperationResult, error: Option<PluginError>) {
        self.results.push(result);
        if self.error.is_none() {
            self.error = error;
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Number of hooks whose result is a failure
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|result| !result.success).count()
    }

    /// Collapse into the first error, or all results when every hook succeeded
    pub fn into_result(self) -> PluginResult<Vec<OperationResult>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = HookRegistry::new();
        registry.register(OperationKind::Deploy, "a");
        registry.register(OperationKind::Deploy, "b");
        registry.register(OperationKind::Deploy, "c");
        registry.register(OperationKind::Upgrade, "b");

        assert_eq!(registry.snapshot(OperationKind::Deploy), vec!["a", "b", "c"]);
        assert_eq!(registry.snapshot(OperationKind::Upgrade), vec!["b"]);
        assert!(registry.snapshot(OperationKind::Scale).is_empty());
    }

    #[test]
    fn test_duplicates_allowed() {
        let mut registry = HookRegistry::new();
        registry.register(OperationKind::Deploy, "a");
        registry.register(OperationKind::Deploy, "a");
        assert_eq!(registry.snapshot(OperationKind::Deploy).len(), 2);

        registry.unregister(OperationKind::Deploy, "a").unwrap();
        assert_eq!(registry.snapshot(OperationKind::Deploy), vec!["a"]);
    }

    #[test]
    fn test_unregister_non_member_fails() {
        let mut registry = HookRegistry::new();
        registry.register(OperationKind::Deploy, "a");
        assert!(registry.unregister(OperationKind::Deploy, "b").is_err());
        assert!(registry.unregister(OperationKind::Scale, "a").is_err());
        assert!(registry.unregister(OperationKind::Deploy, "a").is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_plugin_everywhere() {
        let mut registry = HookRegistry::new();
        registry.register(OperationKind::Deploy, "a");
        registry.register(OperationKind::Deploy, "b");
        registry.register(OperationKind::Monitor, "a");
        assert_eq!(registry.remove_plugin("a"), 2);
        assert_eq!(registry.snapshot(OperationKind::Deploy), vec!["b"]);
        assert!(registry.snapshot(OperationKind::Monitor).is_empty());
        assert_eq!(registry.remove_plugin("a"), 0);
    }

    #[test]
    fn test_outcome_keeps_first_error() {
        let mut outcome = HookOutcome::default();
        outcome.record(OperationResult::success("one"), None);
        outcome.record(
            OperationResult::success("two"),
            Some(PluginError::Validation("second".to_string())),
        );
        outcome.record(
            OperationResult::success("three"),
            Some(PluginError::Validation("third".to_string())),
        );
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.error.as_ref().unwrap().to_string().contains("second"));
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn test_failed_count_counts_failure_results() {
        let mut outcome = HookOutcome::default();
        let err = PluginError::Validation("bad".to_string());
        outcome.record(OperationResult::success("one"), None);
        outcome.record(
            OperationResult::operation_failure("b", OperationKind::Deploy, &err),
            Some(err),
        );
        outcome.record(OperationResult::success("three"), None);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(outcome.results.len(), 3);
    }
}
