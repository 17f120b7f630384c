//! Dependency graph over the rule catalog.
//!
//! Stage lists remain the execution order. The graph only detects
//! declarations that can never be satisfied: dependencies on unknown rule
//! keys and dependency cycles.

use super::RuleCatalog;
use crate::errors::{ConfigurationError, CycleDetectedError};
use std::collections::{BTreeMap, BTreeSet};

/// Directed graph from each rule key to the keys it depends on.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Builds the graph from the catalog's declared dependencies.
    #[must_use]
    pub fn from_catalog(catalog: &RuleCatalog) -> Self {
        Self {
            edges: catalog
                .iter()
                .map(|def| (def.key.clone(), def.depends_on.clone()))
                .collect(),
        }
    }

    /// Returns the direct dependencies of `key`.
    #[must_use]
    pub fn dependencies(&self, key: &str) -> &[String] {
        self.edges.get(key).map_or(&[], Vec::as_slice)
    }

    /// Checks that every dependency is a known key and that there is no cycle.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for deps in self.edges.values() {
            if let Some(unknown) = deps.iter().find(|d| !self.edges.contains_key(d.as_str())) {
                return Err(ConfigurationError::UnknownRuleKey { key: unknown.clone() });
            }
        }

        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        for node in self.edges.keys() {
            self.visit(node, &mut visited, &mut path)
                .map_err(CycleDetectedError::new)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), Vec<String>> {
        if let Some(start) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
            cycle.push(node.to_string());
            return Err(cycle);
        }
        if visited.contains(node) {
            return Ok(());
        }

        path.push(node);
        for dep in self.dependencies(node) {
            self.visit(dep, visited, path)?;
        }
        path.pop();
        visited.insert(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticRule;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_catalog_is_acyclic() {
        assert!(DependencyGraph::from_catalog(&RuleCatalog::builtin()).validate().is_ok());
    }

    #[test]
    fn test_diamond_is_accepted() {
        let catalog = RuleCatalog::new()
            .with(StaticRule::definition("a", "DC-1", &[]))
            .with(StaticRule::definition("b", "DC-2", &["a"]))
            .with(StaticRule::definition("c", "DC-3", &["a"]))
            .with(StaticRule::definition("d", "DC-4", &["b", "c"]));
        let graph = DependencyGraph::from_catalog(&catalog);

        assert!(graph.validate().is_ok());
        assert_eq!(graph.dependencies("d"), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let catalog = RuleCatalog::new()
            .with(StaticRule::definition("a", "DC-1", &["c"]))
            .with(StaticRule::definition("b", "DC-2", &["a"]))
            .with(StaticRule::definition("c", "DC-3", &["b"]));
        let err = DependencyGraph::from_catalog(&catalog).validate().unwrap_err();

        match err {
            ConfigurationError::CycleDetected(cycle) => {
                assert_eq!(cycle.cycle_path, vec!["a", "c", "b", "a"]);
            }
            other => panic!("expected a cycle, got {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency_is_reported() {
        let catalog = RuleCatalog::new().with(StaticRule::definition("a", "DC-1", &["ghost"]));
        let err = DependencyGraph::from_catalog(&catalog).validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownRuleKey { ref key } if key == "ghost"));
    }
}
