//! Suppresses rows that reference concepts on a suppression list.
//!
//! The list is materialized once as a lookup table in the sandbox dataset by
//! `setup_rule`; the filtering queries read from it.

use super::common::sandbox_then_retain;
use crate::core::{DataStage, QuerySpec, Verification};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::sql::{render, table_ref};
use crate::rules::{CleaningRule, ParamSpec, RuleArgs, RuleDescriptor};
use crate::warehouse::Warehouse;
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "suppress_concepts";
const ISSUES: &[&str] = &["DC-1692"];
const CONCEPT_IDS: &str = "concept_ids";
const LOOKUP: &str = "concept_lookup";

const DEFAULT_CONCEPT_IDS: &[i64] = &[1_585_386, 1_585_389, 1_585_390, 1_586_140];

const CREATE_LOOKUP: &str = "CREATE TABLE IF NOT EXISTS {{lookup}} AS \
SELECT concept_id FROM UNNEST([{{concept_ids}}]) AS concept_id";

const IN_LOOKUP: &str = "IFNULL({{column}}, 0) IN (SELECT concept_id FROM {{lookup}})";

const CONCEPT_COLUMNS: &[(&str, &[&str])] = &[
    ("observation", &["observation_concept_id", "observation_source_concept_id", "value_as_concept_id"]),
    ("condition_occurrence", &["condition_concept_id", "condition_source_concept_id"]),
    ("procedure_occurrence", &["procedure_concept_id", "procedure_source_concept_id"]),
    ("measurement", &["measurement_concept_id", "measurement_source_concept_id"]),
];

/// Sandboxes and removes rows whose concept columns hit the suppression list.
#[derive(Debug)]
pub struct SuppressConcepts {
    descriptor: RuleDescriptor,
    args: RuleArgs,
    concept_ids: Vec<i64>,
}

impl SuppressConcepts {
    /// Builds the rule with the default or supplied suppression list.
    pub fn new(args: &RuleArgs) -> Result<Self, RuleError> {
        let concept_ids = args
            .int_list(KEY, CONCEPT_IDS)?
            .unwrap_or_else(|| DEFAULT_CONCEPT_IDS.to_vec());
        if concept_ids.is_empty() {
            return Err(RuleError::invalid_parameter(KEY, CONCEPT_IDS, "the list is empty"));
        }

        let descriptor = RuleDescriptor::new("Removes rows referencing suppressed concepts")
            .with_issues(ISSUES.iter().copied())
            .affecting([DataStage::DeidClean, DataStage::ControlledTierDeidClean])
            .with_tables(CONCEPT_COLUMNS.iter().map(|(t, _)| *t))
            .with_table_namer(args.table_namer.clone());

        Ok(Self {
            descriptor,
            args: args.clone(),
            concept_ids,
        })
    }

    pub(crate) fn definition() -> RuleDefinition {
        RuleDefinition::new(KEY, |args| Ok(Box::new(Self::new(args)?) as Box<dyn CleaningRule>))
            .with_issues(ISSUES)
            .with_param(ParamSpec::optional(
                CONCEPT_IDS,
                "Comma separated concept ids to suppress (defaults to the built-in list)",
            ))
    }

    fn lookup_ref(&self) -> String {
        table_ref(
            &self.args.project_id,
            &self.args.sandbox_dataset_id,
            &self.sandbox_table_for(LOOKUP),
        )
    }

    /// The DDL `setup_rule` submits.
    pub fn lookup_ddl(&self) -> Result<String, RuleError> {
        let ids = self
            .concept_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        render(
            "create_lookup",
            CREATE_LOOKUP,
            &[("lookup", self.lookup_ref().as_str()), ("concept_ids", ids.as_str())],
        )
    }
}

#[async_trait]
impl CleaningRule for SuppressConcepts {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let lookup = self.lookup_ref();
        let mut specs = Vec::new();

        for (table, columns) in CONCEPT_COLUMNS {
            let predicate = columns
                .iter()
                .map(|column| render("in_lookup", IN_LOOKUP, &[("column", *column), ("lookup", lookup.as_str())]))
                .collect::<Result<Vec<_>, _>>()?
                .join(" OR ");
            specs.extend(sandbox_then_retain(
                &self.args,
                table,
                &self.sandbox_table_for(table),
                &predicate,
            )?);
        }
        Ok(specs)
    }

    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        Ok(CONCEPT_COLUMNS
            .iter()
            .map(|(t, _)| *t)
            .chain([LOOKUP])
            .map(|t| self.sandbox_table_for(t))
            .collect())
    }

    async fn setup_rule(&self, warehouse: &Warehouse) -> Result<Verification, RuleError> {
        let ddl = QuerySpec::new(self.lookup_ddl()?);
        warehouse
            .execute(&self.args.project_id, &ddl)
            .await
            .map_err(|e| RuleError::failed(KEY, format!("could not create the concept lookup: {e}")))?;
        Ok(Verification::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryWarehouse;
    use std::sync::Arc;

    fn args() -> RuleArgs {
        RuleArgs::new("p", "deid_clean", "deid_clean_sandbox")
    }

    #[test]
    fn test_custom_concept_list() {
        let args = args().with_param(CONCEPT_IDS, serde_json::json!("11, 22"));
        let rule = SuppressConcepts::new(&args).unwrap();
        assert!(rule.lookup_ddl().unwrap().contains("UNNEST([11, 22])"));
    }

    #[test]
    fn test_queries_read_the_lookup() {
        let rule = SuppressConcepts::new(&args()).unwrap();
        let specs = rule.get_query_specs().unwrap();
        assert!(specs[0]
            .query
            .contains("IFNULL(observation_concept_id, 0) IN (SELECT concept_id FROM `p.deid_clean_sandbox.dc_1692_concept_lookup`)"));
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let memory = Arc::new(InMemoryWarehouse::new());
        let warehouse = Warehouse::new(memory.clone());
        let rule = SuppressConcepts::new(&args()).unwrap();

        assert_eq!(rule.setup_rule(&warehouse).await.unwrap(), Verification::Verified);
        assert_eq!(rule.setup_rule(&warehouse).await.unwrap(), Verification::Verified);

        let rows = memory.rows("p", "deid_clean_sandbox", "dc_1692_concept_lookup").unwrap();
        assert_eq!(rows.len(), DEFAULT_CONCEPT_IDS.len());
        assert_eq!(memory.submitted().len(), 2);
    }
}
