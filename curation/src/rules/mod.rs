//! The cleaning rule contract.
//!
//! A cleaning rule is a unit that turns its bound arguments into an ordered
//! list of [`QuerySpec`]s. Rules never submit their query specs themselves;
//! the engine does, after the destructive-write guard has accepted them. The
//! only hook allowed side effects outside the specs is
//! [`CleaningRule::setup_rule`], which must be idempotent.

pub mod builtin;
mod guard;
pub mod sandbox;
pub mod sql;

pub use guard::check_destructive_writes;
pub use sandbox::{check_sandbox_dataset, sandbox_dataset_for, sandbox_table_name, SandboxTable};

use crate::core::{DataStage, QuerySpec, Verification};
use crate::errors::{ConfigurationError, RuleError};
use crate::registry::RuleDefinition;
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Static metadata every rule exposes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleDescriptor {
    /// Ticket ids the rule was written for.
    pub issue_numbers: Vec<String>,
    /// What the rule does.
    pub description: String,
    /// Stages the rule may run in.
    pub affected_datasets: Vec<DataStage>,
    /// CDM tables the rule reads or rewrites.
    pub affected_tables: Vec<String>,
    /// Rule keys that must run earlier in the same stage.
    pub depends_on: Vec<String>,
    /// Optional suffix for sandbox names.
    pub table_namer: Option<String>,
    /// Whether [`CleaningRule::validate_rule`] performs a real check.
    pub validated: bool,
}

impl RuleDescriptor {
    /// Creates a descriptor with a description and no other metadata.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Adds ticket ids.
    #[must_use]
    pub fn with_issues<I, S>(mut self, issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue_numbers.extend(issues.into_iter().map(Into::into));
        self
    }

    /// Adds the stages the rule may run in.
    #[must_use]
    pub fn affecting<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = DataStage>,
    {
        self.affected_datasets.extend(stages);
        self
    }

    /// Adds affected CDM tables.
    #[must_use]
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Adds rule keys that must run earlier.
    #[must_use]
    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets the table namer.
    #[must_use]
    pub fn with_table_namer(mut self, namer: Option<String>) -> Self {
        self.table_namer = namer.filter(|n| !n.trim().is_empty());
        self
    }

    /// Marks the rule as providing a real post-condition check.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.validated = true;
        self
    }

    /// Returns the sandbox prefix derived from tickets and table namer.
    #[must_use]
    pub fn rule_identifier(&self) -> String {
        sandbox::rule_identifier(&self.issue_numbers, self.table_namer.as_deref())
    }

    /// Returns the ticket ids joined for display.
    #[must_use]
    pub fn issues_label(&self) -> String {
        self.issue_numbers.join(",")
    }

    fn missing_field(&self) -> Option<&'static str> {
        if self.issue_numbers.iter().all(|i| i.trim().is_empty()) {
            Some("issue_numbers")
        } else if self.description.trim().is_empty() {
            Some("description")
        } else if self.affected_datasets.is_empty() {
            Some("affected_datasets")
        } else {
            None
        }
    }
}

/// A parameter a rule accepts beyond the standard arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name, as given on the command line without dashes.
    pub name: String,
    /// Whether the rule cannot be built without it.
    pub required: bool,
    /// Help text.
    pub description: String,
}

impl ParamSpec {
    /// A required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            description: description.into(),
        }
    }

    /// An optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            description: description.into(),
        }
    }
}

/// Arguments bound to one rule instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleArgs {
    /// Project that owns the datasets.
    pub project_id: String,
    /// Dataset being cleaned.
    pub dataset_id: String,
    /// Dataset receiving sandbox tables.
    pub sandbox_dataset_id: String,
    /// Optional suffix for sandbox names.
    pub table_namer: Option<String>,
    /// Rule-specific parameters.
    pub params: BTreeMap<String, serde_json::Value>,
}

impl RuleArgs {
    /// Creates arguments with no extra parameters.
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        sandbox_dataset_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            sandbox_dataset_id: sandbox_dataset_id.into(),
            table_namer: None,
            params: BTreeMap::new(),
        }
    }

    /// Sets the table namer.
    #[must_use]
    pub fn with_table_namer(mut self, namer: Option<String>) -> Self {
        self.table_namer = namer;
        self
    }

    /// Binds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Returns a parameter rendered as a string.
    ///
    /// JSON strings are returned unquoted, other scalars in their JSON form.
    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Returns a required string parameter.
    pub fn require_str(&self, rule: &str, name: &str) -> Result<String, RuleError> {
        self.param_str(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RuleError::invalid_parameter(rule, name, "a value is required"))
    }

    /// Returns a required `YYYY-MM-DD` parameter.
    pub fn require_date(&self, rule: &str, name: &str) -> Result<NaiveDate, RuleError> {
        let raw = self.require_str(rule, name)?;
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
            RuleError::invalid_parameter(rule, name, format!("expected YYYY-MM-DD, got '{raw}' ({e})"))
        })
    }

    /// Returns an optional list of integers.
    ///
    /// Accepts a JSON array of numbers or a comma separated string.
    pub fn int_list(&self, rule: &str, name: &str) -> Result<Option<Vec<i64>>, RuleError> {
        let Some(value) = self.params.get(name) else {
            return Ok(None);
        };
        let bad = |detail: String| RuleError::invalid_parameter(rule, name, detail);

        let values = match value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| v.as_i64().ok_or_else(|| bad(format!("'{v}' is not an integer"))))
                .collect::<Result<Vec<_>, _>>()?,
            serde_json::Value::Number(n) => vec![n.as_i64().ok_or_else(|| bad(format!("'{n}' is not an integer")))?],
            serde_json::Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<i64>().map_err(|_| bad(format!("'{p}' is not an integer"))))
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(bad(format!("unsupported value {other}"))),
        };
        Ok(Some(values))
    }
}

/// The contract every cleaning rule implements.
///
/// `descriptor` and `get_query_specs` are mandatory. Rules that write
/// sandbox tables must also override `get_sandbox_tablenames`; the default
/// reports the capability as missing and the instance is rejected by
/// [`check_contract`] before anything runs.
#[async_trait]
pub trait CleaningRule: Send + Sync + Debug {
    /// Returns the rule's static metadata.
    fn descriptor(&self) -> &RuleDescriptor;

    /// Returns the ordered list of query specs.
    ///
    /// Must be deterministic and free of side effects.
    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError>;

    /// Returns the sandbox table ids this rule writes.
    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        Err(RuleError::NotImplemented {
            rule: self.descriptor().issues_label(),
            capability: "get_sandbox_tablenames".to_string(),
        })
    }

    /// Prepares anything the queries need. Must be idempotent.
    async fn setup_rule(&self, _warehouse: &Warehouse) -> Result<Verification, RuleError> {
        Ok(Verification::Unverified)
    }

    /// Captures state needed by `validate_rule`.
    async fn setup_validation(&self, _warehouse: &Warehouse) -> Result<Verification, RuleError> {
        Ok(Verification::Unverified)
    }

    /// Checks the rule's post-condition after its queries ran.
    async fn validate_rule(&self, _warehouse: &Warehouse) -> Result<Verification, RuleError> {
        Ok(Verification::Unverified)
    }

    /// Returns the sandbox table id for `table_name`.
    fn sandbox_table_for(&self, table_name: &str) -> String {
        sandbox_table_name(&self.descriptor().rule_identifier(), table_name)
    }
}

/// Checks a freshly built rule against the contract for `stage`.
///
/// Runs after construction and before any hook with side effects. The
/// instance must report the same issue numbers and dependencies its catalog
/// `definition` was registered with, since registration validated those.
/// Every failure is a [`ConfigurationError::ContractViolation`] naming
/// `rule_key`.
pub fn check_contract(
    rule_key: &str,
    rule: &dyn CleaningRule,
    definition: &RuleDefinition,
    stage: DataStage,
) -> Result<(), ConfigurationError> {
    let descriptor = rule.descriptor();

    if let Some(field) = descriptor.missing_field() {
        return Err(ConfigurationError::contract_violation(
            rule_key,
            "descriptor",
            format!("'{field}' must not be empty"),
        ));
    }
    if descriptor.issue_numbers != definition.issue_numbers {
        return Err(ConfigurationError::contract_violation(
            rule_key,
            "issue_numbers",
            format!(
                "instance reports {:?} but the catalog registered {:?}",
                descriptor.issue_numbers, definition.issue_numbers
            ),
        ));
    }
    let reported: BTreeSet<&str> = descriptor.depends_on.iter().map(String::as_str).collect();
    let registered: BTreeSet<&str> = definition.depends_on.iter().map(String::as_str).collect();
    if reported != registered {
        return Err(ConfigurationError::contract_violation(
            rule_key,
            "depends_on",
            format!("instance reports {reported:?} but the catalog registered {registered:?}"),
        ));
    }
    if !descriptor.affected_datasets.contains(&stage) {
        return Err(ConfigurationError::contract_violation(
            rule_key,
            "affected_datasets",
            format!("stage '{stage}' is not among the rule's affected datasets"),
        ));
    }

    let tablenames = rule.get_sandbox_tablenames().map_err(|err| {
        ConfigurationError::contract_violation(rule_key, "get_sandbox_tablenames", err.to_string())
    })?;
    if let Some(blank) = tablenames.iter().find(|t| t.trim().is_empty()) {
        return Err(ConfigurationError::contract_violation(
            rule_key,
            "get_sandbox_tablenames",
            format!("sandbox table name {blank:?} is blank"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct NoSandboxRule {
        descriptor: RuleDescriptor,
    }

    #[async_trait]
    impl CleaningRule for NoSandboxRule {
        fn descriptor(&self) -> &RuleDescriptor {
            &self.descriptor
        }

        fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
            Ok(vec![QuerySpec::new("SELECT 1")])
        }
    }

    #[derive(Debug)]
    struct CompleteRule {
        descriptor: RuleDescriptor,
    }

    #[async_trait]
    impl CleaningRule for CompleteRule {
        fn descriptor(&self) -> &RuleDescriptor {
            &self.descriptor
        }

        fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
            Ok(Vec::new())
        }

        fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
            Ok(vec![self.sandbox_table_for("person")])
        }
    }

    fn descriptor() -> RuleDescriptor {
        RuleDescriptor::new("Removes things")
            .with_issues(["DC-100"])
            .affecting([DataStage::Rdr])
            .with_tables(["person"])
    }

    fn definition(issues: &[&str]) -> RuleDefinition {
        RuleDefinition::new("complete", |_| Err(RuleError::failed("complete", "unused"))).with_issues(issues)
    }

    #[test]
    fn test_descriptor_builder() {
        let d = descriptor()
            .depends_on(["other"])
            .with_table_namer(Some("release".to_string()))
            .validated();

        assert_eq!(d.issue_numbers, vec!["DC-100".to_string()]);
        assert_eq!(d.depends_on, vec!["other".to_string()]);
        assert_eq!(d.rule_identifier(), "dc_100_release");
        assert!(d.validated);
    }

    #[test]
    fn test_blank_table_namer_is_ignored() {
        let d = descriptor().with_table_namer(Some("  ".to_string()));
        assert_eq!(d.table_namer, None);
    }

    #[test]
    fn test_contract_accepts_complete_rule() {
        let rule = CompleteRule { descriptor: descriptor() };
        assert!(check_contract("complete", &rule, &definition(&["DC-100"]), DataStage::Rdr).is_ok());
        assert_eq!(rule.sandbox_table_for("person"), "dc_100_person");
    }

    #[test]
    fn test_contract_rejects_missing_sandbox_capability() {
        let rule = NoSandboxRule { descriptor: descriptor() };
        let err = check_contract("no_sandbox", &rule, &definition(&["DC-100"]), DataStage::Rdr).unwrap_err();

        assert!(matches!(
            err,
            ConfigurationError::ContractViolation { ref capability, .. } if capability == "get_sandbox_tablenames"
        ));
        assert!(err.to_string().contains("no_sandbox"));
    }

    #[test]
    fn test_contract_rejects_incomplete_descriptor() {
        let rule = CompleteRule {
            descriptor: RuleDescriptor::new("").with_issues(["DC-1"]).affecting([DataStage::Rdr]),
        };
        let err = check_contract("blank", &rule, &definition(&["DC-1"]), DataStage::Rdr).unwrap_err();
        assert!(err.to_string().contains("'description' must not be empty"));

        let rule = CompleteRule {
            descriptor: RuleDescriptor::new("x").affecting([DataStage::Rdr]),
        };
        let err = check_contract("no_issue", &rule, &definition(&[]), DataStage::Rdr).unwrap_err();
        assert!(err.to_string().contains("issue_numbers"));
    }

    #[test]
    fn test_contract_rejects_foreign_stage() {
        let rule = CompleteRule { descriptor: descriptor() };
        let err = check_contract("complete", &rule, &definition(&["DC-100"]), DataStage::Combined).unwrap_err();
        assert!(err.to_string().contains("stage 'combined'"));
    }

    #[test]
    fn test_contract_rejects_metadata_drift() {
        let rule = CompleteRule { descriptor: descriptor() };
        let err = check_contract("complete", &rule, &definition(&["DC-2"]), DataStage::Rdr).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::ContractViolation { ref capability, .. } if capability == "issue_numbers"
        ));

        let rule = CompleteRule {
            descriptor: descriptor().depends_on(["later"]),
        };
        let err = check_contract("complete", &rule, &definition(&["DC-100"]), DataStage::Rdr).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::ContractViolation { ref capability, .. } if capability == "depends_on"
        ));

        let registered = definition(&["DC-100"]).depends_on(&["later"]);
        assert!(check_contract("complete", &rule, &registered, DataStage::Rdr).is_ok());
    }

    #[tokio::test]
    async fn test_default_hooks_are_unverified() {
        let rule = CompleteRule { descriptor: descriptor() };
        let warehouse = Warehouse::new(std::sync::Arc::new(crate::testing::InMemoryWarehouse::new()));

        assert_eq!(rule.setup_rule(&warehouse).await.unwrap(), Verification::Unverified);
        assert_eq!(rule.setup_validation(&warehouse).await.unwrap(), Verification::Unverified);
        assert_eq!(rule.validate_rule(&warehouse).await.unwrap(), Verification::Unverified);
    }

    #[test]
    fn test_rule_args_params() {
        let args = RuleArgs::new("p", "d", "d_sandbox")
            .with_param("truncation_date", serde_json::json!("2024-01-31"))
            .with_param("ids", serde_json::json!("1, 2,3"))
            .with_param("limit", serde_json::json!(5));

        assert_eq!(args.param_str("limit").as_deref(), Some("5"));
        assert_eq!(
            args.require_date("r", "truncation_date").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
        assert_eq!(args.int_list("r", "ids").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(args.int_list("r", "absent").unwrap(), None);
        assert!(args.require_str("r", "absent").is_err());
    }

    #[test]
    fn test_rule_args_rejects_bad_date() {
        let args = RuleArgs::new("p", "d", "s").with_param("cutoff", serde_json::json!("31/01/2024"));
        let err = args.require_date("r", "cutoff").unwrap_err();
        assert!(err.to_string().contains("expected YYYY-MM-DD"));
    }
}
