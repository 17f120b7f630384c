//! Rule catalog.
//!
//! The catalog is an explicit mapping from stable string keys to rule
//! definitions. Nothing is looked up by type name at runtime: a key that is
//! not in the catalog is a configuration error.

use crate::errors::{ConfigurationError, RuleError};
use crate::rules::{sandbox, CleaningRule, ParamSpec, RuleArgs};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a rule instance from bound arguments.
pub type RuleFactory = Arc<dyn Fn(&RuleArgs) -> Result<Box<dyn CleaningRule>, RuleError> + Send + Sync>;

/// Everything the registry needs to know about a rule without building it.
#[derive(Clone)]
pub struct RuleDefinition {
    /// Stable catalog key.
    pub key: String,
    /// Ticket ids, used for the sandbox identifier.
    pub issue_numbers: Vec<String>,
    /// Rule keys that must run earlier in the same stage.
    pub depends_on: Vec<String>,
    /// Extra parameters the rule accepts.
    pub params: Vec<ParamSpec>,
    factory: RuleFactory,
}

impl fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDefinition")
            .field("key", &self.key)
            .field("issue_numbers", &self.issue_numbers)
            .field("depends_on", &self.depends_on)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl RuleDefinition {
    /// Creates a definition from a key and factory.
    pub fn new<F>(key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RuleArgs) -> Result<Box<dyn CleaningRule>, RuleError> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            issue_numbers: Vec::new(),
            depends_on: Vec::new(),
            params: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Sets the ticket ids.
    #[must_use]
    pub fn with_issues(mut self, issues: &[&str]) -> Self {
        self.issue_numbers = issues.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the rules that must run earlier.
    #[must_use]
    pub fn depends_on(mut self, keys: &[&str]) -> Self {
        self.depends_on = keys.iter().map(ToString::to_string).collect();
        self
    }

    /// Declares an extra parameter.
    #[must_use]
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Returns the declared parameter called `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Returns the sandbox identifier this rule uses with `table_namer`.
    #[must_use]
    pub fn sandbox_identifier(&self, table_namer: Option<&str>) -> String {
        sandbox::rule_identifier(&self.issue_numbers, table_namer)
    }

    /// Builds a rule instance.
    pub fn build(&self, args: &RuleArgs) -> Result<Box<dyn CleaningRule>, RuleError> {
        (self.factory)(args)
    }
}

/// Mapping from rule key to definition.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    definitions: BTreeMap<String, RuleDefinition>,
}

impl RuleCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the built-in rules.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for definition in crate::rules::builtin::definitions() {
            catalog.insert(definition);
        }
        catalog
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, definition: RuleDefinition) {
        self.definitions.insert(definition.key.clone(), definition);
    }

    /// Adds a definition, returning the catalog.
    #[must_use]
    pub fn with(mut self, definition: RuleDefinition) -> Self {
        self.insert(definition);
        self
    }

    /// Looks up a rule key.
    pub fn get(&self, key: &str) -> Result<&RuleDefinition, ConfigurationError> {
        self.definitions
            .get(key)
            .ok_or_else(|| ConfigurationError::UnknownRuleKey { key: key.to_string() })
    }

    /// Returns true if the key is known.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    /// Iterates over definitions in key order.
    pub fn iter(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.definitions.values()
    }

    /// Returns the number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticRule;

    #[test]
    fn test_unknown_key_is_configuration_error() {
        let catalog = RuleCatalog::new();
        let err = catalog.get("missing_rule").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownRuleKey { ref key } if key == "missing_rule"));
    }

    #[test]
    fn test_definition_builds_rule() {
        let catalog = RuleCatalog::new().with(StaticRule::definition("a", "DC-1", &[]));
        let rule = catalog.get("a").unwrap().build(&RuleArgs::new("p", "d", "s")).unwrap();
        assert_eq!(rule.descriptor().issue_numbers, vec!["DC-1".to_string()]);
    }

    #[test]
    fn test_builtin_catalog_is_populated() {
        let catalog = RuleCatalog::builtin();
        assert!(catalog.contains("drop_zero_concept_ids"));
        assert!(catalog.contains("truncate_rdr_data"));
        assert!(catalog
            .get("truncate_rdr_data")
            .unwrap()
            .param("truncation_date")
            .is_some_and(|p| p.required));
    }

    #[test]
    fn test_sandbox_identifier_includes_namer() {
        let def = RuleDefinition::new("a", |_| Err(RuleError::failed("a", "unused"))).with_issues(&["DC-9"]);
        assert_eq!(def.sandbox_identifier(None), "dc_9");
        assert_eq!(def.sandbox_identifier(Some("v2")), "dc_9_v2");
    }
}
