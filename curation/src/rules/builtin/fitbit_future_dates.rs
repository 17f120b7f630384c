//! Removes wearable readings dated in the future.

use super::common::sandbox_then_retain;
use crate::core::{DataStage, QuerySpec};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::{CleaningRule, RuleArgs, RuleDescriptor};
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "fitbit_future_dates";
const ISSUES: &[&str] = &["DC-1046"];

/// Table, date expression.
const FITBIT_DATES: &[(&str, &str)] = &[
    ("activity_summary", "date"),
    ("heart_rate_summary", "date"),
    ("heart_rate_minute_level", "DATE(datetime)"),
    ("steps_intraday", "DATE(datetime)"),
    ("sleep_level", "sleep_date"),
    ("sleep_daily_summary", "sleep_date"),
];

/// Sandboxes and removes Fitbit rows dated after today.
#[derive(Debug)]
pub struct FitbitFutureDates {
    descriptor: RuleDescriptor,
    args: RuleArgs,
}

impl FitbitFutureDates {
    /// Builds the rule.
    #[must_use]
    pub fn new(args: &RuleArgs) -> Self {
        let descriptor = RuleDescriptor::new("Removes Fitbit records dated after the current date")
            .with_issues(ISSUES.iter().copied())
            .affecting([DataStage::Fitbit, DataStage::FitbitDeid])
            .with_tables(FITBIT_DATES.iter().map(|(t, _)| *t))
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
impl CleaningRule for FitbitFutureDates {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let mut specs = Vec::new();
        for (table, date) in FITBIT_DATES {
            let predicate = format!("{date} IS NOT NULL AND {date} > CURRENT_DATE()");
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
        Ok(FITBIT_DATES.iter().map(|(t, _)| self.sandbox_table_for(t)).collect())
    }
}
