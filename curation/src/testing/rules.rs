//! Configurable rules for tests.

use crate::core::{DataStage, QuerySpec, Verification};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::{CleaningRule, RuleArgs, RuleDescriptor};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A rule that emits a fixed list of query specs.
///
/// Every hook outcome is configurable, and each hook call is recorded so
/// tests can assert on the lifecycle order.
#[derive(Debug, Clone)]
pub struct StaticRule {
    descriptor: RuleDescriptor,
    specs: Vec<QuerySpec>,
    sandbox_tables: Option<Vec<String>>,
    setup: Result<Verification, String>,
    validation: Verification,
    query_error: Option<String>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl StaticRule {
    /// Creates a rule for `issue` that may run in every stage and emits nothing.
    #[must_use]
    pub fn new(issue: impl Into<String>) -> Self {
        let issue: String = issue.into();
        Self {
            descriptor: RuleDescriptor::new("Static test rule")
                .with_issues([issue])
                .affecting(DataStage::ALL),
            specs: Vec::new(),
            sandbox_tables: Some(Vec::new()),
            setup: Ok(Verification::Unverified),
            validation: Verification::Unverified,
            query_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A catalog definition building a fresh `StaticRule` for `issue`.
    #[must_use]
    pub fn definition(key: &str, issue: &str, depends_on: &[&str]) -> RuleDefinition {
        let prototype = Self::new(issue).depends_on(depends_on);
        Self::definition_from(key, prototype)
    }

    /// A catalog definition building clones of `prototype`.
    ///
    /// The bound table namer is applied to each clone.
    #[must_use]
    pub fn definition_from(key: &str, prototype: Self) -> RuleDefinition {
        let issues: Vec<&str> = prototype.descriptor.issue_numbers.iter().map(String::as_str).collect();
        let depends_on: Vec<&str> = prototype.descriptor.depends_on.iter().map(String::as_str).collect();
        let definition = RuleDefinition::new(key, {
            let prototype = prototype.clone();
            move |args: &RuleArgs| {
                let mut rule = prototype.clone();
                rule.descriptor = rule.descriptor.with_table_namer(args.table_namer.clone());
                Ok(Box::new(rule) as Box<dyn CleaningRule>)
            }
        });
        definition.with_issues(&issues).depends_on(&depends_on)
    }

    /// Declares rule keys that must run earlier.
    #[must_use]
    pub fn depends_on(mut self, keys: &[&str]) -> Self {
        self.descriptor = self.descriptor.depends_on(keys.iter().copied());
        self
    }

    /// Replaces the stages the rule may run in.
    #[must_use]
    pub fn affecting(mut self, stages: &[DataStage]) -> Self {
        self.descriptor.affected_datasets = stages.to_vec();
        self
    }

    /// Replaces the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    /// Sets the specs returned by `get_query_specs`.
    #[must_use]
    pub fn with_specs(mut self, specs: Vec<QuerySpec>) -> Self {
        self.specs = specs;
        self
    }

    /// Sets the declared sandbox tables.
    #[must_use]
    pub fn with_sandbox_tables(mut self, tables: &[&str]) -> Self {
        self.sandbox_tables = Some(tables.iter().map(ToString::to_string).collect());
        self
    }

    /// Leaves `get_sandbox_tablenames` unimplemented.
    #[must_use]
    pub fn without_sandbox_tables(mut self) -> Self {
        self.sandbox_tables = None;
        self
    }

    /// Sets the outcome of `setup_rule`.
    #[must_use]
    pub fn with_setup(mut self, outcome: Verification) -> Self {
        self.setup = Ok(outcome);
        self
    }

    /// Makes `setup_rule` return an error.
    #[must_use]
    pub fn failing_setup(mut self, reason: impl Into<String>) -> Self {
        self.setup = Err(reason.into());
        self
    }

    /// Sets the outcome of `validate_rule`.
    #[must_use]
    pub fn with_validation(mut self, outcome: Verification) -> Self {
        self.validation = outcome;
        self
    }

    /// Makes `get_query_specs` return an error.
    #[must_use]
    pub fn failing_queries(mut self, reason: impl Into<String>) -> Self {
        self.query_error = Some(reason.into());
        self
    }

    /// Returns the hooks called so far, shared by every clone.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, hook: &'static str) {
        self.calls.lock().push(hook);
    }
}

#[async_trait]
impl CleaningRule for StaticRule {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        self.record("get_query_specs");
        match &self.query_error {
            Some(reason) => Err(RuleError::failed(self.descriptor.issues_label(), reason.clone())),
            None => Ok(self.specs.clone()),
        }
    }

    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        self.sandbox_tables.clone().ok_or_else(|| RuleError::NotImplemented {
            rule: self.descriptor.issues_label(),
            capability: "get_sandbox_tablenames".to_string(),
        })
    }

    async fn setup_rule(&self, _warehouse: &Warehouse) -> Result<Verification, RuleError> {
        self.record("setup_rule");
        self.setup
            .clone()
            .map_err(|reason| RuleError::failed(self.descriptor.issues_label(), reason))
    }

    async fn setup_validation(&self, _warehouse: &Warehouse) -> Result<Verification, RuleError> {
        self.record("setup_validation");
        Ok(Verification::Unverified)
    }

    async fn validate_rule(&self, _warehouse: &Warehouse) -> Result<Verification, RuleError> {
        self.record("validate_rule");
        Ok(self.validation.clone())
    }
}

/// A definition whose factory always fails, as a rule with bad arguments would.
#[must_use]
pub fn failing_definition(key: &str, issue: &str, reason: &str) -> RuleDefinition {
    let (rule, reason) = (key.to_string(), reason.to_string());
    RuleDefinition::new(key, move |_| Err(RuleError::failed(rule.clone(), reason.clone()))).with_issues(&[issue])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_applies_table_namer() {
        let definition = StaticRule::definition("a", "DC-7", &["b"]);
        let args = RuleArgs::new("p", "d", "s").with_table_namer(Some("v1".to_string()));
        let rule = definition.build(&args).unwrap();

        assert_eq!(definition.depends_on, vec!["b".to_string()]);
        assert_eq!(rule.descriptor().rule_identifier(), "dc_7_v1");
        assert_eq!(rule.descriptor().depends_on, vec!["b".to_string()]);
    }

    #[test]
    fn test_calls_are_shared_between_clones() {
        let rule = StaticRule::new("DC-1").with_specs(vec![QuerySpec::new("SELECT 1")]);
        let clone = rule.clone();
        clone.get_query_specs().unwrap();
        assert_eq!(rule.calls(), vec!["get_query_specs"]);
    }

    #[test]
    fn test_failing_definition() {
        let definition = failing_definition("broken", "DC-3", "bad date");
        let err = definition.build(&RuleArgs::default()).unwrap_err();
        assert!(err.to_string().contains("bad date"));
    }
}
