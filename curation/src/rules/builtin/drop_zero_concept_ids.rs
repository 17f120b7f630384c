//! Drops clinical rows whose standard concept is missing.

use super::common::{count_matching, sandbox_then_retain};
use crate::core::{DataStage, QuerySpec, Verification};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::{CleaningRule, RuleArgs, RuleDescriptor};
use crate::warehouse::Warehouse;
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "drop_zero_concept_ids";
const ISSUES: &[&str] = &["DC-388"];

/// Tables and the concept column that must be populated.
const CONCEPT_COLUMNS: &[(&str, &str)] = &[
    ("condition_occurrence", "condition_concept_id"),
    ("procedure_occurrence", "procedure_concept_id"),
    ("drug_exposure", "drug_concept_id"),
    ("device_exposure", "device_concept_id"),
    ("measurement", "measurement_concept_id"),
    ("observation", "observation_concept_id"),
    ("visit_occurrence", "visit_concept_id"),
];

fn predicate(column: &str) -> String {
    format!("{column} IS NULL OR {column} = 0")
}

/// Removes rows with a zero or null concept id from the clinical tables.
#[derive(Debug)]
pub struct DropZeroConceptIds {
    descriptor: RuleDescriptor,
    args: RuleArgs,
}

impl DropZeroConceptIds {
    /// Builds the rule.
    #[must_use]
    pub fn new(args: &RuleArgs) -> Self {
        let descriptor = RuleDescriptor::new(
            "Sandboxes and removes clinical rows whose concept_id is 0 or NULL",
        )
        .with_issues(ISSUES.iter().copied())
        .affecting([
            DataStage::Ehr,
            DataStage::Unioned,
            DataStage::Rdr,
            DataStage::Combined,
            DataStage::DeidClean,
            DataStage::ControlledTierDeidClean,
            DataStage::Synthetic,
        ])
        .with_tables(CONCEPT_COLUMNS.iter().map(|(t, _)| *t))
        .with_table_namer(args.table_namer.clone())
        .validated();

        Self {
            descriptor,
            args: args.clone(),
        }
    }

    pub(crate) fn definition() -> RuleDefinition {
        RuleDefinition::new(KEY, |args| Ok(Box::new(Self::new(args)) as Box<dyn CleaningRule>))
            .with_issues(ISSUES)
    }
}

#[async_trait]
impl CleaningRule for DropZeroConceptIds {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let mut specs = Vec::with_capacity(CONCEPT_COLUMNS.len() * 2);
        for (table, column) in CONCEPT_COLUMNS {
            specs.extend(sandbox_then_retain(
                &self.args,
                table,
                &self.sandbox_table_for(table),
                &predicate(column),
            )?);
        }
        Ok(specs)
    }

    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        Ok(CONCEPT_COLUMNS
            .iter()
            .map(|(table, _)| self.sandbox_table_for(table))
            .collect())
    }

    async fn validate_rule(&self, warehouse: &Warehouse) -> Result<Verification, RuleError> {
        for (table, column) in CONCEPT_COLUMNS {
            let query = count_matching(&self.args, table, &predicate(column))?;
            let count = warehouse
                .count_rows(&self.args.project_id, &query)
                .await
                .map_err(|e| RuleError::failed(KEY, e.to_string()))?;
            match count {
                None => return Ok(Verification::Unverified),
                Some(0) => {}
                Some(n) => {
                    return Ok(Verification::Failed(format!(
                        "{n} rows in {table} still have {column} 0 or NULL"
                    )))
                }
            }
        }
        Ok(Verification::Verified)
    }
}
