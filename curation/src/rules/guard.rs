//! Destructive-write guard.
//!
//! A `WRITE_TRUNCATE` into the dataset being cleaned is only accepted when the
//! rule backs the table up first: either it declares the table's sandbox name
//! or an earlier spec of the same rule creates that sandbox table. Nothing
//! counts as a backup when the sandbox dataset is the dataset being cleaned.

use super::{CleaningRule, RuleArgs};
use crate::core::QuerySpec;
use crate::errors::RuleError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?`?([A-Za-z0-9_.\-]+)`?")
        .expect("valid create-table regex")
});

/// Returns the `(dataset, table)` a `CREATE TABLE` statement creates.
fn created_table(query: &str) -> Option<(&str, &str)> {
    let name = CREATE_TABLE.captures(query)?.get(1)?.as_str();
    let mut parts = name.rsplit('.');
    let table = parts.next()?;
    let dataset = parts.next()?;
    Some((dataset, table))
}

/// Validates `specs` and rejects unsandboxed truncations.
///
/// Checks every spec's destination invariants first, so a rule with a
/// malformed spec fails before anything of it is submitted.
pub fn check_destructive_writes(
    rule_key: &str,
    rule: &dyn CleaningRule,
    args: &RuleArgs,
    specs: &[QuerySpec],
) -> Result<(), RuleError> {
    for (index, spec) in specs.iter().enumerate() {
        spec.validate().map_err(|reason| RuleError::InvalidQuerySpec {
            rule: rule_key.to_string(),
            index,
            reason,
        })?;
    }

    let separate_sandbox = args.sandbox_dataset_id != args.dataset_id;
    let declared: HashSet<String> = if separate_sandbox {
        rule.get_sandbox_tablenames().unwrap_or_default().into_iter().collect()
    } else {
        HashSet::new()
    };
    let mut created: HashSet<&str> = HashSet::new();

    for spec in specs {
        if separate_sandbox {
            let ddl = created_table(&spec.query);
            for (dataset, table) in spec.destination().into_iter().chain(ddl) {
                if dataset == args.sandbox_dataset_id {
                    created.insert(table);
                }
            }
        }
        if !spec.is_destructive() {
            continue;
        }
        let Some((dataset, table)) = spec.destination() else {
            continue;
        };
        if separate_sandbox && dataset == args.sandbox_dataset_id {
            continue;
        }

        let sandbox = rule.sandbox_table_for(table);
        if !(declared.contains(&sandbox) || created.contains(sandbox.as_str())) {
            return Err(RuleError::UnsandboxedWrite {
                rule: rule_key.to_string(),
                dataset: dataset.to_string(),
                table: table.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataStage, WriteDisposition};
    use crate::rules::RuleDescriptor;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Fixed {
        descriptor: RuleDescriptor,
        declared: Vec<String>,
    }

    #[async_trait]
    impl CleaningRule for Fixed {
        fn descriptor(&self) -> &RuleDescriptor {
            &self.descriptor
        }

        fn get_query_specs(&self) -> Result<Vec<QuerySpec>, RuleError> {
            Ok(Vec::new())
        }

        fn get_sandbox_tablenames(&self) -> Result<Vec<String>, RuleError> {
            Ok(self.declared.clone())
        }
    }

    fn rule(declared: &[&str]) -> Fixed {
        Fixed {
            descriptor: RuleDescriptor::new("d").with_issues(["DC-7"]).affecting([DataStage::Rdr]),
            declared: declared.iter().map(ToString::to_string).collect(),
        }
    }

    fn args() -> RuleArgs {
        RuleArgs::new("p", "rdr", "rdr_sandbox")
    }

    fn truncate(table: &str) -> QuerySpec {
        QuerySpec::new("SELECT 1").with_destination("rdr", table, WriteDisposition::WriteTruncate)
    }

    #[test]
    fn test_declared_sandbox_allows_truncate() {
        let specs = vec![truncate("person")];
        assert!(check_destructive_writes("r", &rule(&["dc_7_person"]), &args(), &specs).is_ok());
    }

    #[test]
    fn test_earlier_sandbox_spec_allows_truncate() {
        let specs = vec![
            QuerySpec::new("SELECT 1").with_destination("rdr_sandbox", "dc_7_person", WriteDisposition::WriteTruncate),
            truncate("person"),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_ok());
    }

    #[test]
    fn test_earlier_ddl_allows_truncate() {
        let specs = vec![
            QuerySpec::new("CREATE TABLE IF NOT EXISTS `p.rdr_sandbox.dc_7_person` AS SELECT 1"),
            truncate("person"),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_ok());
    }

    #[test]
    fn test_unsandboxed_truncate_is_rejected() {
        let specs = vec![truncate("person")];
        let err = check_destructive_writes("r", &rule(&["dc_7_observation"]), &args(), &specs).unwrap_err();
        assert!(matches!(err, RuleError::UnsandboxedWrite { ref table, .. } if table == "person"));
    }

    #[test]
    fn test_sandbox_after_truncate_does_not_count() {
        let specs = vec![
            truncate("person"),
            QuerySpec::new("SELECT 1").with_destination("rdr_sandbox", "dc_7_person", WriteDisposition::WriteTruncate),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_err());
    }

    #[test]
    fn test_append_is_not_guarded() {
        let specs = vec![QuerySpec::new("SELECT 1").with_destination("rdr", "person", WriteDisposition::WriteAppend)];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_ok());
    }

    #[test]
    fn test_earlier_drop_does_not_count() {
        let specs = vec![
            QuerySpec::new("DROP TABLE IF EXISTS `p.rdr_sandbox.dc_7_person`"),
            truncate("person"),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_err());
    }

    #[test]
    fn test_prefix_sharing_sandbox_does_not_count() {
        let specs = vec![
            QuerySpec::new("CREATE OR REPLACE TABLE `p.rdr_sandbox.dc_7_person_old` AS SELECT 1"),
            truncate("person"),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_err());
    }

    #[test]
    fn test_query_mentioning_sandbox_does_not_count() {
        let specs = vec![
            QuerySpec::new("SELECT * FROM `p.rdr_sandbox.dc_7_person`"),
            truncate("person"),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &args(), &specs).is_err());
    }

    #[test]
    fn test_sandbox_in_target_dataset_does_not_count() {
        let same = RuleArgs::new("p", "rdr", "rdr");
        let specs = vec![truncate("person")];
        let err = check_destructive_writes("r", &rule(&["dc_7_person"]), &same, &specs).unwrap_err();
        assert!(matches!(err, RuleError::UnsandboxedWrite { ref dataset, .. } if dataset == "rdr"));

        let backed_up = vec![
            QuerySpec::new("SELECT 1").with_destination("rdr", "dc_7_person", WriteDisposition::WriteTruncate),
            truncate("person"),
        ];
        assert!(check_destructive_writes("r", &rule(&[]), &same, &backed_up).is_err());
    }

    #[test]
    fn test_created_table_parses_qualified_names() {
        assert_eq!(
            created_table("create table if not exists `p.ds.t` as select 1"),
            Some(("ds", "t"))
        );
        assert_eq!(created_table("CREATE OR REPLACE TABLE ds.t AS SELECT 1"), Some(("ds", "t")));
        assert_eq!(created_table("CREATE TABLE t AS SELECT 1"), None);
        assert_eq!(created_table("INSERT INTO ds.t SELECT 1"), None);
    }

    #[test]
    fn test_partial_destination_is_rejected() {
        let mut spec = QuerySpec::new("SELECT 1");
        spec.destination_table = Some("person".to_string());
        let err = check_destructive_writes("r", &rule(&[]), &args(), &[spec]).unwrap_err();
        assert!(matches!(err, RuleError::InvalidQuerySpec { index: 0, .. }));
    }
}
