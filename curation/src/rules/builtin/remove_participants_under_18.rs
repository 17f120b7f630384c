//! Removes all data of participants younger than 18.

use super::common::sandbox_then_retain;
use crate::core::{DataStage, QuerySpec};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::sql::{render, table_ref};
use crate::rules::{CleaningRule, RuleArgs, RuleDescriptor};
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "remove_participants_under_18";
const ISSUES: &[&str] = &["DC-1724"];
const DEPENDS_ON: &[&str] = &[super::no_data_after_death::KEY];

const UNDER_18: &str = "person_id IN (\
SELECT p.person_id FROM {{person}} AS p \
WHERE p.birth_datetime IS NOT NULL \
AND DATE_DIFF(CURRENT_DATE(), DATE(p.birth_datetime), YEAR) < 18)";

/// `person` must stay last: the other tables look minors up in it.
const TABLES: &[&str] = &[
    "observation",
    "measurement",
    "condition_occurrence",
    "drug_exposure",
    "procedure_occurrence",
    "visit_occurrence",
    "death",
    "person",
];

/// Sandboxes and removes every row belonging to a minor.
#[derive(Debug)]
pub struct RemoveParticipantsUnder18 {
    descriptor: RuleDescriptor,
    args: RuleArgs,
}

impl RemoveParticipantsUnder18 {
    /// Builds the rule.
    #[must_use]
    pub fn new(args: &RuleArgs) -> Self {
        let descriptor = RuleDescriptor::new("Removes all records of participants younger than 18")
            .with_issues(ISSUES.iter().copied())
            .affecting([DataStage::Combined])
            .with_tables(TABLES.iter().copied())
            .depends_on(DEPENDS_ON.iter().copied())
            .with_table_namer(args.table_namer.clone());

        Self {
            descriptor,
            args: args.clone(),
        }
    }

    pub(crate) fn definition() -> RuleDefinition {
        RuleDefinition::new(KEY, |args| Ok(Box::new(Self::new(args)) as Box<dyn CleaningRule>))
            .with_issues(ISSUES)
            .depends_on(DEPENDS_ON)
    }
}

#[async_trait]
impl CleaningRule for RemoveParticipantsUnder18 {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let person = table_ref(&self.args.project_id, &self.args.dataset_id, "person");
        let predicate = render("under_18", UNDER_18, &[("person", person.as_str())])?;

        let mut specs = Vec::new();
        for table in TABLES {
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
        Ok(TABLES.iter().map(|t| self.sandbox_table_for(t)).collect())
    }
}
