//! Removes clinical activity recorded long after a participant's death.

use super::common::sandbox_then_retain;
use crate::core::{DataStage, QuerySpec};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::sql::{render, table_ref};
use crate::rules::{CleaningRule, ParamSpec, RuleArgs, RuleDescriptor};
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "no_data_after_death";
const ISSUES: &[&str] = &["DC-431"];
const DEPENDS_ON: &[&str] = &[super::ensure_date_datetime_consistency::KEY];
const GRACE_DAYS: &str = "grace_days";
const DEFAULT_GRACE_DAYS: i64 = 30;

// Correlated on the implicit alias of the filtered table.
const AFTER_DEATH: &str = "EXISTS (SELECT 1 FROM {{death}} AS d \
WHERE d.person_id = {{table}}.person_id \
AND {{table}}.{{date_column}} > DATE_ADD(d.death_date, INTERVAL {{grace_days}} DAY))";

const DATE_COLUMNS: &[(&str, &str)] = &[
    ("visit_occurrence", "visit_start_date"),
    ("condition_occurrence", "condition_start_date"),
    ("drug_exposure", "drug_exposure_start_date"),
    ("measurement", "measurement_date"),
    ("observation", "observation_date"),
    ("procedure_occurrence", "procedure_date"),
];

/// Sandboxes and removes records dated more than the grace period after death.
#[derive(Debug)]
pub struct NoDataAfterDeath {
    descriptor: RuleDescriptor,
    args: RuleArgs,
    grace_days: i64,
}

impl NoDataAfterDeath {
    /// Builds the rule.
    pub fn new(args: &RuleArgs) -> Result<Self, RuleError> {
        let grace_days = match args.param_str(GRACE_DAYS) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|d| *d >= 0)
                .ok_or_else(|| {
                    RuleError::invalid_parameter(KEY, GRACE_DAYS, format!("'{raw}' is not a non-negative integer"))
                })?,
            None => DEFAULT_GRACE_DAYS,
        };

        let descriptor = RuleDescriptor::new(
            "Removes visits and clinical events dated more than the grace period after death",
        )
        .with_issues(ISSUES.iter().copied())
        .affecting([DataStage::Combined])
        .with_tables(DATE_COLUMNS.iter().map(|(t, _)| *t).chain(["death"]))
        .depends_on(DEPENDS_ON.iter().copied())
        .with_table_namer(args.table_namer.clone());

        Ok(Self {
            descriptor,
            args: args.clone(),
            grace_days,
        })
    }

    pub(crate) fn definition() -> RuleDefinition {
        RuleDefinition::new(KEY, |args| Ok(Box::new(Self::new(args)?) as Box<dyn CleaningRule>))
            .with_issues(ISSUES)
            .depends_on(DEPENDS_ON)
            .with_param(ParamSpec::optional(
                GRACE_DAYS,
                "Days after death during which records are kept (default 30)",
            ))
    }
}

#[async_trait]
impl CleaningRule for NoDataAfterDeath {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let death = table_ref(&self.args.project_id, &self.args.dataset_id, "death");
        let grace_days = self.grace_days.to_string();
        let mut specs = Vec::new();

        for (table, column) in DATE_COLUMNS {
            let predicate = render(
                "after_death",
                AFTER_DEATH,
                &[
                    ("death", death.as_str()),
                    ("table", *table),
                    ("date_column", *column),
                    ("grace_days", grace_days.as_str()),
                ],
            )?;
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
        Ok(DATE_COLUMNS.iter().map(|(t, _)| self.sandbox_table_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace_period() {
        let rule = NoDataAfterDeath::new(&RuleArgs::new("p", "combined", "combined_sandbox")).unwrap();
        let specs = rule.get_query_specs().unwrap();
        assert!(specs[0].query.contains("INTERVAL 30 DAY"));
        assert!(specs[0].query.contains("`p.combined.death`"));
        assert!(specs[0].query.contains("d.person_id = visit_occurrence.person_id"));
    }

    #[test]
    fn test_custom_grace_period() {
        let args = RuleArgs::new("p", "c", "s").with_param(GRACE_DAYS, serde_json::json!(0));
        let rule = NoDataAfterDeath::new(&args).unwrap();
        assert!(rule.get_query_specs().unwrap()[0].query.contains("INTERVAL 0 DAY"));
    }

    #[test]
    fn test_negative_grace_period_is_rejected() {
        let args = RuleArgs::new("p", "c", "s").with_param(GRACE_DAYS, serde_json::json!("-1"));
        assert!(NoDataAfterDeath::new(&args).is_err());
    }

    #[test]
    fn test_declares_dependency() {
        let rule = NoDataAfterDeath::new(&RuleArgs::new("p", "c", "s")).unwrap();
        assert_eq!(rule.descriptor().depends_on, vec!["ensure_date_datetime_consistency".to_string()]);
    }
}
