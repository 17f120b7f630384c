//! Generalizes participant zip codes to their three-digit prefix.

use super::common::sandbox_then_rewrite;
use crate::core::{DataStage, QuerySpec};
use crate::errors::RuleError;
use crate::registry::RuleDefinition;
use crate::rules::sql::{render, table_ref};
use crate::rules::{CleaningRule, RuleArgs, RuleDescriptor};
use async_trait::async_trait;

/// Catalog key.
pub const KEY: &str = "generalize_zip_codes";
const ISSUES: &[&str] = &["DC-1376"];
const TABLE: &str = "observation";

/// Observation source concept for "StreetAddress_PIIZIP".
const ZIP_CONCEPT_ID: i64 = 1_585_250;

const ZIP_ROWS: &str = "observation_source_concept_id = {{zip_concept}} AND value_as_string IS NOT NULL";

const GENERALIZE: &str = "SELECT * REPLACE (\
CASE WHEN observation_source_concept_id = {{zip_concept}} AND value_as_string IS NOT NULL \
THEN CONCAT(SUBSTR(value_as_string, 1, 3), '**') \
ELSE value_as_string END AS value_as_string) \
FROM {{source}}";

/// Replaces five-digit zip answers with a `123**` prefix.
#[derive(Debug)]
pub struct GeneralizeZipCodes {
    descriptor: RuleDescriptor,
    args: RuleArgs,
}

impl GeneralizeZipCodes {
    /// Builds the rule.
    #[must_use]
    pub fn new(args: &RuleArgs) -> Self {
        let descriptor = RuleDescriptor::new("Generalizes zip code answers to their three-digit prefix")
            .with_issues(ISSUES.iter().copied())
            .affecting([DataStage::DeidBase, DataStage::ControlledTierDeid])
            .with_tables([TABLE])
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
impl CleaningRule for GeneralizeZipCodes {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
        let zip_concept = ZIP_CONCEPT_ID.to_string();
        let source = table_ref(&self.args.project_id, &self.args.dataset_id, TABLE);
        let predicate = render("zip_rows", ZIP_ROWS, &[("zip_concept", zip_concept.as_str())])?;
        let rewrite = render(
            "generalize_zip",
            GENERALIZE,
            &[("zip_concept", zip_concept.as_str()), ("source", source.as_str())],
        )?;

        sandbox_then_rewrite(&self.args, TABLE, &self.sandbox_table_for(TABLE), &predicate, rewrite)
    }

    fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
        Ok(vec![self.sandbox_table_for(TABLE)])
    }
}
