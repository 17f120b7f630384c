//! Dry-run reporting.
//!
//! The reporter resolves a stage exactly as the engine would, but only
//! calls rule factories, the contract check, `get_query_specs` and the
//! descriptor. It never talks to a warehouse. Each query spec becomes one
//! [`ReportRow`]; a rule that cannot produce specs becomes a single
//! [`NO_DATA`] row carrying the error, and the report moves on.

mod output;

pub use output::{write_csv, write_json, ReportFormat};

use crate::core::{DataStage, QuerySpec};
use crate::errors::ConfigurationError;
use crate::registry::{bind_arguments, check_unknown_arguments, StageRegistry, StageRule};
use crate::rules::{check_contract, check_sandbox_dataset, sandbox_dataset_for, RuleArgs, RuleDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker written in place of SQL when a rule produced no query specs.
pub const NO_DATA: &str = "NO DATA";

/// Report columns, in output order.
pub const COLUMNS: [&str; 13] = [
    "stage",
    "rule",
    "issue_numbers",
    "description",
    "affected_datasets",
    "affected_tables",
    "depends_on",
    "validation",
    "destination_dataset",
    "destination_table",
    "write_disposition",
    "sql",
    "error",
];

const PLACEHOLDER_PROJECT: &str = "project_id";
const PLACEHOLDER_DATASET: &str = "dataset_id";
const PLACEHOLDER_SANDBOX: &str = "sandbox_dataset_id";

/// One (rule, query spec) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportRow {
    /// Stage identifier.
    pub stage: String,
    /// Catalog key.
    pub rule: String,
    /// Ticket ids, comma separated.
    pub issue_numbers: String,
    /// Rule description.
    pub description: String,
    /// Stages the rule may run in, comma separated.
    pub affected_datasets: String,
    /// Tables the rule touches, comma separated.
    pub affected_tables: String,
    /// Rules that run earlier, comma separated.
    pub depends_on: String,
    /// `validated` or `unverified`.
    pub validation: String,
    /// Destination dataset of the spec.
    pub destination_dataset: String,
    /// Destination table of the spec.
    pub destination_table: String,
    /// Write disposition of the spec.
    pub write_disposition: String,
    /// SQL text, or [`NO_DATA`].
    pub sql: String,
    /// Why the rule produced no SQL.
    pub error: String,
}

impl ReportRow {
    /// Returns the value of `column`.
    #[must_use]
    pub fn field(&self, column: &str) -> Option<&str> {
        let value = match column {
            "stage" => &self.stage,
            "rule" => &self.rule,
            "issue_numbers" => &self.issue_numbers,
            "description" => &self.description,
            "affected_datasets" => &self.affected_datasets,
            "affected_tables" => &self.affected_tables,
            "depends_on" => &self.depends_on,
            "validation" => &self.validation,
            "destination_dataset" => &self.destination_dataset,
            "destination_table" => &self.destination_table,
            "write_disposition" => &self.write_disposition,
            "sql" => &self.sql,
            "error" => &self.error,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Returns true for rows standing in for a rule without SQL.
    #[must_use]
    pub fn is_no_data(&self) -> bool {
        self.sql == NO_DATA
    }

    fn for_rule(stage: DataStage, rule: &StageRule<'_>) -> Self {
        Self {
            stage: stage.to_string(),
            rule: rule.key().to_string(),
            issue_numbers: rule.definition.issue_numbers.join(","),
            depends_on: rule.definition.depends_on.join(","),
            ..Self::default()
        }
    }

    fn with_descriptor(mut self, descriptor: &RuleDescriptor) -> Self {
        self.issue_numbers = descriptor.issues_label();
        self.description.clone_from(&descriptor.description);
        self.affected_datasets = descriptor
            .affected_datasets
            .iter()
            .map(DataStage::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.affected_tables = descriptor.affected_tables.join(",");
        self.depends_on = descriptor.depends_on.join(",");
        self.validation = if descriptor.validated { "validated" } else { "unverified" }.to_string();
        self
    }

    fn with_spec(mut self, spec: &QuerySpec) -> Self {
        self.destination_dataset = spec.destination_dataset.clone().unwrap_or_default();
        self.destination_table = spec.destination_table.clone().unwrap_or_default();
        self.write_disposition = spec.write_disposition.map(|d| d.to_string()).unwrap_or_default();
        self.sql.clone_from(&spec.query);
        self
    }

    fn no_data(mut self, error: impl Into<String>) -> Self {
        self.sql = NO_DATA.to_string();
        self.error = error.into();
        self
    }
}

/// Walks a registry and renders every rule's SQL without executing it.
#[derive(Debug, Clone)]
pub struct Reporter<'a> {
    registry: &'a StageRegistry,
    project_id: String,
    dataset_id: String,
    sandbox_dataset_id: String,
    table_namer: Option<String>,
}

impl<'a> Reporter<'a> {
    /// Creates a reporter that renders SQL with placeholder identifiers.
    #[must_use]
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self {
            registry,
            project_id: PLACEHOLDER_PROJECT.to_string(),
            dataset_id: PLACEHOLDER_DATASET.to_string(),
            sandbox_dataset_id: PLACEHOLDER_SANDBOX.to_string(),
            table_namer: None,
        }
    }

    /// Renders SQL against real identifiers.
    ///
    /// The sandbox dataset defaults to `{dataset_id}_sandbox`.
    #[must_use]
    pub fn with_ids(
        mut self,
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        sandbox_dataset_id: Option<String>,
    ) -> Self {
        self.project_id = project_id.into();
        self.dataset_id = dataset_id.into();
        self.sandbox_dataset_id = sandbox_dataset_id.unwrap_or_else(|| sandbox_dataset_for(&self.dataset_id));
        self
    }

    /// Sets the run-wide table namer.
    #[must_use]
    pub fn with_table_namer(mut self, table_namer: Option<String>) -> Self {
        self.table_namer = table_namer;
        self
    }

    fn base_args(&self) -> RuleArgs {
        RuleArgs::new(&self.project_id, &self.dataset_id, &self.sandbox_dataset_id)
            .with_table_namer(self.table_namer.clone())
    }

    /// Reports every rule of `stage`.
    ///
    /// # Errors
    ///
    /// Fails if the stage has no rules, if `params` names an argument no rule
    /// of the stage declares, or if the sandbox dataset is the dataset being
    /// cleaned. Per-rule problems become [`NO_DATA`] rows.
    pub fn stage_rows(
        &self,
        stage: DataStage,
        params: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<ReportRow>, ConfigurationError> {
        let rules = self.registry.rules_for_stage(stage)?;
        check_unknown_arguments(stage, &rules, params)?;
        let base = self.base_args();
        check_sandbox_dataset(&base.dataset_id, &base.sandbox_dataset_id)?;

        let mut rows = Vec::new();
        for rule in &rules {
            rows.extend(self.rule_rows(stage, rule, &base, params));
        }
        Ok(rows)
    }

    /// Reports every rule of every stage in `stages`, in the given order.
    pub fn rows(
        &self,
        stages: &[DataStage],
        params: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<ReportRow>, ConfigurationError> {
        let mut rows = Vec::new();
        for stage in stages {
            rows.extend(self.stage_rows(*stage, params)?);
        }
        Ok(rows)
    }

    fn rule_rows(
        &self,
        stage: DataStage,
        rule: &StageRule<'_>,
        base: &RuleArgs,
        params: &BTreeMap<String, serde_json::Value>,
    ) -> Vec<ReportRow> {
        let row = ReportRow::for_rule(stage, rule);
        let no_data = |row: ReportRow, error: String| {
            tracing::warn!(stage = %stage, rule = rule.key(), error = %error, "No SQL for rule");
            vec![row.no_data(error)]
        };

        let args = match bind_arguments(rule, base, params) {
            Ok(args) => args,
            Err(err) => return no_data(row, err.to_string()),
        };
        let instance = match rule.definition.build(&args) {
            Ok(instance) => instance,
            Err(err) => return no_data(row, err.to_string()),
        };
        let row = row.with_descriptor(instance.descriptor());
        if let Err(err) = check_contract(rule.key(), instance.as_ref(), rule.definition, stage) {
            return no_data(row, err.to_string());
        }

        match instance.get_query_specs() {
            Ok(specs) if specs.is_empty() => vec![row.no_data("")],
            Ok(specs) => specs.iter().map(|spec| row.clone().with_spec(spec)).collect(),
            Err(err) => no_data(row, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WriteDisposition;
    use crate::registry::{RegistryEntry, RuleCatalog};
    use crate::testing::{failing_definition, StaticRule};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> StageRegistry {
        let spec = QuerySpec::new("SELECT 1").with_destination("d", "t", WriteDisposition::WriteAppend);
        let catalog = RuleCatalog::new()
            .with(StaticRule::definition_from("good", StaticRule::new("DC-1").with_specs(vec![spec.clone(), spec])))
            .with(failing_definition("broken", "DC-2", "cannot parse cutoff"))
            .with(StaticRule::definition_from("empty", StaticRule::new("DC-3")))
            .with(StaticRule::definition_from(
                "no_sandbox",
                StaticRule::new("DC-4").without_sandbox_tables(),
            ));
        StageRegistry::new(catalog)
            .unwrap()
            .with_stage(
                DataStage::Combined,
                ["good", "broken", "empty", "no_sandbox"].into_iter().map(RegistryEntry::new).collect(),
            )
            .unwrap()
    }

    #[test]
    fn test_one_row_per_spec_and_no_data_rows() {
        let registry = registry();
        let rows = Reporter::new(&registry).stage_rows(DataStage::Combined, &BTreeMap::new()).unwrap();

        let rules: Vec<&str> = rows.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(rules, vec!["good", "good", "broken", "empty", "no_sandbox"]);

        assert_eq!(rows[0].sql, "SELECT 1");
        assert_eq!(rows[0].write_disposition, "WRITE_APPEND");
        assert_eq!(rows[0].validation, "unverified");
        assert_eq!(rows[0].description, "Static test rule");

        assert!(rows[2].is_no_data());
        assert!(rows[2].error.contains("cannot parse cutoff"));
        assert_eq!(rows[2].issue_numbers, "DC-2");

        assert!(rows[3].is_no_data());
        assert_eq!(rows[3].error, "");

        assert!(rows[4].is_no_data());
        assert!(rows[4].error.contains("get_sandbox_tablenames"));
    }

    #[test]
    fn test_builtin_placeholders() {
        let registry = StageRegistry::builtin().unwrap();
        let rows = Reporter::new(&registry).stage_rows(DataStage::Rdr, &BTreeMap::new()).unwrap();

        let truncate = rows.iter().find(|r| r.rule == "truncate_rdr_data").unwrap();
        assert!(truncate.is_no_data());
        assert!(truncate.error.contains("truncation_date"));

        let drop_zero = rows.iter().find(|r| r.rule == "drop_zero_concept_ids").unwrap();
        assert!(drop_zero.sql.contains("`project_id.dataset_id."));
        assert_eq!(drop_zero.destination_dataset, "sandbox_dataset_id");
        assert_eq!(drop_zero.validation, "validated");
    }

    #[test]
    fn test_supplied_ids_and_params() {
        let registry = StageRegistry::builtin().unwrap();
        let params = BTreeMap::from([("truncation_date".to_string(), json!("2024-01-01"))]);
        let rows = Reporter::new(&registry)
            .with_ids("proj", "rdr_2024", None)
            .stage_rows(DataStage::Rdr, &params)
            .unwrap();

        assert!(rows.iter().all(|r| !r.is_no_data()));
        assert!(rows.iter().any(|r| r.destination_dataset == "rdr_2024_sandbox"));
    }

    #[test]
    fn test_unknown_param_is_fatal() {
        let registry = StageRegistry::builtin().unwrap();
        let params = BTreeMap::from([("truncation_dat".to_string(), json!("2024-01-01"))]);
        let err = Reporter::new(&registry).stage_rows(DataStage::Rdr, &params).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownArgument { .. }));
    }

    #[test]
    fn test_sandbox_dataset_equal_to_target_is_fatal() {
        let registry = StageRegistry::builtin().unwrap();
        let err = Reporter::new(&registry)
            .with_ids("proj", "rdr_2024", Some("rdr_2024".to_string()))
            .stage_rows(DataStage::Rdr, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::SandboxIsTarget { .. }));
    }

    #[test]
    fn test_field_lookup_covers_every_column() {
        let row = ReportRow::default();
        for column in COLUMNS {
            assert!(row.field(column).is_some(), "{column}");
        }
        assert!(row.field("nope").is_none());
    }
}
