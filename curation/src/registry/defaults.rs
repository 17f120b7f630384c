//! Default stage lists for the built-in catalog.

use super::{RegistryEntry, RuleCatalog, StageRegistry};
use crate::core::DataStage;
use crate::errors::ConfigurationError;
use crate::rules::builtin::keys;

fn entries(rule_keys: &[&str]) -> Vec<RegistryEntry> {
    rule_keys.iter().map(|k| RegistryEntry::new(*k)).collect()
}

/// Returns the default rule list of every stage, in pipeline order.
#[must_use]
pub fn default_stage_lists() -> Vec<(DataStage, Vec<RegistryEntry>)> {
    use keys::*;

    vec![
        (DataStage::Ehr, entries(&[ENSURE_DATE_DATETIME_CONSISTENCY, DROP_ZERO_CONCEPT_IDS])),
        (DataStage::Unioned, entries(&[DROP_ZERO_CONCEPT_IDS, ENSURE_DATE_DATETIME_CONSISTENCY])),
        (
            DataStage::Rdr,
            entries(&[TRUNCATE_RDR_DATA, DROP_ZERO_CONCEPT_IDS, ENSURE_DATE_DATETIME_CONSISTENCY]),
        ),
        (
            DataStage::Combined,
            entries(&[
                DROP_ZERO_CONCEPT_IDS,
                ENSURE_DATE_DATETIME_CONSISTENCY,
                NO_DATA_AFTER_DEATH,
                REMOVE_PARTICIPANTS_UNDER_18,
            ]),
        ),
        (DataStage::DeidBase, entries(&[GENERALIZE_ZIP_CODES])),
        (DataStage::DeidClean, entries(&[SUPPRESS_CONCEPTS, DROP_ZERO_CONCEPT_IDS])),
        (DataStage::ControlledTierDeid, entries(&[GENERALIZE_ZIP_CODES])),
        (DataStage::ControlledTierDeidBase, entries(&[ENSURE_DATE_DATETIME_CONSISTENCY])),
        (
            DataStage::ControlledTierDeidClean,
            entries(&[SUPPRESS_CONCEPTS, DROP_ZERO_CONCEPT_IDS]),
        ),
        (DataStage::Fitbit, entries(&[FITBIT_FUTURE_DATES])),
        (DataStage::FitbitDeid, entries(&[FITBIT_FUTURE_DATES])),
        (
            DataStage::Synthetic,
            entries(&[DROP_ZERO_CONCEPT_IDS, ENSURE_DATE_DATETIME_CONSISTENCY]),
        ),
    ]
}

impl StageRegistry {
    /// The built-in catalog with the default stage lists.
    pub fn builtin() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new(RuleCatalog::builtin())?;
        for (stage, entries) in default_stage_lists() {
            registry.register(stage, entries)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_stage_has_rules() {
        let registry = StageRegistry::builtin().unwrap();
        for stage in DataStage::ALL {
            assert!(
                !registry.rules_for_stage(stage).unwrap().is_empty(),
                "stage {stage} has no rules"
            );
        }
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let registry = StageRegistry::builtin().unwrap();
        for stage in DataStage::ALL {
            let first: Vec<String> = registry
                .rules_for_stage(stage)
                .unwrap()
                .iter()
                .map(|r| r.key().to_string())
                .collect();
            let second: Vec<String> = registry
                .rules_for_stage(stage)
                .unwrap()
                .iter()
                .map(|r| r.key().to_string())
                .collect();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_dependencies_run_strictly_earlier() {
        let registry = StageRegistry::builtin().unwrap();
        for stage in DataStage::ALL {
            let mut seen = HashSet::new();
            for rule in registry.rules_for_stage(stage).unwrap() {
                for dep in &rule.definition.depends_on {
                    assert!(seen.contains(dep.as_str()), "{} runs before {dep} in {stage}", rule.key());
                }
                seen.insert(rule.key().to_string());
            }
        }
    }

    #[test]
    fn test_every_rule_is_used_by_some_stage() {
        let registry = StageRegistry::builtin().unwrap();
        let used: HashSet<String> = default_stage_lists()
            .into_iter()
            .flat_map(|(_, entries)| entries.into_iter().map(|e| e.rule))
            .collect();
        for definition in registry.catalog().iter() {
            assert!(used.contains(&definition.key), "{} is never registered", definition.key);
        }
    }
}
