//! Removes RDR records dated after the data cutoff.

use super::common::{count_matching, sandbox_then_retain};
use crate::core::{DataStage, QuerySpec, Verification};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::{CleaningRule, ParamSpec, RuleArgs, RuleDescriptor};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Catalog key.
pub const KEY: &str = "truncate_rdr_data";
const ISSUES: &[&str] = &["DC-1009", "DC-1185"];
pub(crate) const TRUNCATION_DATE: &str = "truncation_date";

const DATE_COLUMNS: &[(&str, &str)] = &[
    ("observation", "observation_date"),
    ("measurement", "measurement_date"),
    ("condition_occurrence", "condition_start_date"),
    ("drug_exposure", "drug_exposure_start_date"),
    ("procedure_occurrence", "procedure_date"),
    ("visit_occurrence", "visit_start_date"),
];

/// Sandboxes and drops rows dated after `truncation_date`.
#[derive(Debug)]
pub struct TruncateRdrData {
    descriptor: RuleDescriptor,
    args: RuleArgs,
    truncation_date: NaiveDate,
}

impl TruncateRdrData {
    /// Builds the rule, parsing the cutoff date.
    pub fn new(args: &RuleArgs) -> Result<Self, RuleError> {
        let truncation_date = args.require_date(KEY, TRUNCATION_DATE)?;
        let descriptor = RuleDescriptor::new("Removes RDR records dated after the truncation date")
            .with_issues(ISSUES.iter().copied())
            .affecting([DataStage::Rdr])
            .with_tables(DATE_COLUMNS.iter().map(|(t, _)| *t))
            .with_table_namer(args.table_namer.clone())
            .validated();

        Ok(Self {
            descriptor,
            args: args.clone(),
            truncation_date,
        })
    }

    pub(crate) fn definition() -> RuleDefinition {
        RuleDefinition::new(KEY, |args| Ok(Box::new(Self::new(args)?) as Box<dyn CleaningRule>))
            .with_issues(ISSUES)
            .with_param(ParamSpec::required(
                TRUNCATION_DATE,
                "Last date (YYYY-MM-DD) of data to keep",
            ))
    }

    fn predicate(&self, column: &str) -> String {
        format!(
            "{column} IS NOT NULL AND {column} > DATE('{}')",
            self.truncation_date.format("%Y-%m-%d")
        )
    }
}

#[async_trait]
impl CleaningRule for TruncateRdrData {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let mut specs = Vec::new();
        for (table, column) in DATE_COLUMNS {
            specs.extend(sandbox_then_retain(
                &self.args,
                table,
                &self.sandbox_table_for(table),
                &self.predicate(column),
            )?);
        }
        Ok(specs)
    }

    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        Ok(DATE_COLUMNS.iter().map(|(t, _)| self.sandbox_table_for(t)).collect())
    }

    async fn validate_rule(&self, warehouse: &Warehouse) -> Result<Verification, RuleError> {
        let mut remaining = 0;
        for (table, column) in DATE_COLUMNS {
            let query = count_matching(&self.args, table, &self.predicate(column))?;
            match warehouse
                .count_rows(&self.args.project_id, &query)
                .await
                .map_err(|e| RuleError::failed(KEY, e.to_string()))?
            {
                Some(n) => remaining += n,
                None => return Ok(Verification::Unverified),
            }
        }

        if remaining == 0 {
            Ok(Verification::Verified)
        } else {
            Ok(Verification::Failed(format!(
                "{remaining} rows are dated after {}",
                self.truncation_date
            )))
        }
    }
}
