//! Makes every `*_datetime` column agree with its `*_date` column.

use super::common::sandbox_then_rewrite;
use crate::core::{DataStage, QuerySpec};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::sql::{render, table_ref};
use crate::rules::{CleaningRule, RuleArgs, RuleDescriptor};
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "ensure_date_datetime_consistency";
const ISSUES: &[&str] = &["DC-614", "DC-509"];

/// Table, date column, datetime column.
const DATE_PAIRS: &[(&str, &str, &str)] = &[
    ("condition_occurrence", "condition_start_date", "condition_start_datetime"),
    ("drug_exposure", "drug_exposure_start_date", "drug_exposure_start_datetime"),
    ("measurement", "measurement_date", "measurement_datetime"),
    ("observation", "observation_date", "observation_datetime"),
    ("procedure_occurrence", "procedure_date", "procedure_datetime"),
    ("visit_occurrence", "visit_start_date", "visit_start_datetime"),
];

const INCONSISTENT: &str =
    "{{date}} IS NOT NULL AND ({{datetime}} IS NULL OR DATE({{datetime}}) != {{date}})";

const REALIGN: &str = "SELECT * REPLACE (\
CASE WHEN {{date}} IS NULL THEN {{datetime}} \
WHEN {{datetime}} IS NULL THEN DATETIME({{date}}) \
WHEN DATE({{datetime}}) != {{date}} THEN DATETIME({{date}}, TIME({{datetime}})) \
ELSE {{datetime}} END AS {{datetime}}) \
FROM {{source}}";

/// Re-derives inconsistent datetimes from their dates.
#[derive(Debug)]
pub struct EnsureDateDatetimeConsistency {
    descriptor: RuleDescriptor,
    args: RuleArgs,
}

impl EnsureDateDatetimeConsistency {
    /// Builds the rule.
    #[must_use]
    pub fn new(args: &RuleArgs) -> Self {
        let descriptor = RuleDescriptor::new(
            "Sets missing or mismatched datetime fields from the corresponding date field",
        )
        .with_issues(ISSUES.iter().copied())
        .affecting([
            DataStage::Ehr,
            DataStage::Unioned,
            DataStage::Rdr,
            DataStage::Combined,
            DataStage::ControlledTierDeidBase,
            DataStage::Synthetic,
        ])
        .with_tables(DATE_PAIRS.iter().map(|(t, _, _)| *t))
        .with_table_namer(args.table_namer.clone());

        Self {
            descriptor,
            args: args.clone(),
        }
    }

    pub(crate) fn definition() -> RuleDefinition {
        RuleDefinition::new(KEY, |args| Ok(Box::new(Self::new(args)) as Box<dyn CleaningRule>)).with_issues(ISSUES)
    }
}

#[async_trait]
impl CleaningRule for EnsureDateDatetimeConsistency {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let mut specs = Vec::new();
        for (table, date, datetime) in DATE_PAIRS {
            let source = table_ref(&self.args.project_id, &self.args.dataset_id, table);
            let columns = [("date", *date), ("datetime", *datetime)];
            let predicate = render("inconsistent_datetime", INCONSISTENT, &columns)?;
            let rewrite = render(
                "realign_datetime",
                REALIGN,
                &[columns[0], columns[1], ("source", source.as_str())],
            )?;
            specs.extend(sandbox_then_rewrite(
                &self.args,
                table,
                &self.sandbox_table_for(table),
                &predicate,
                rewrite,
            )?);
        }
        Ok(specs)
    }

    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        Ok(DATE_PAIRS.iter().map(|(t, _, _)| self.sandbox_table_for(t)).collect())
    }
}
