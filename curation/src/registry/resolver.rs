//! Argument resolution.
//!
//! Binds the run's standard arguments, command line parameters and the
//! registry's static kwargs into one [`RuleArgs`] per rule. Static kwargs
//! win over command line values for the same name.

use super::{StageRegistry, StageRule};
use crate::core::DataStage;
use crate::errors::ConfigurationError;
use crate::rules::{check_sandbox_dataset, RuleArgs};
use std::collections::{BTreeMap, BTreeSet};

/// A stage rule with its arguments bound.
#[derive(Debug, Clone)]
pub struct ResolvedRule<'a> {
    /// The registry entry and catalog definition.
    pub rule: StageRule<'a>,
    /// The bound arguments.
    pub args: RuleArgs,
}

impl ResolvedRule<'_> {
    /// Returns the catalog key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.rule.key()
    }
}

/// Rejects command line parameters no rule of the stage declares.
pub fn check_unknown_arguments(
    stage: DataStage,
    rules: &[StageRule<'_>],
    cli_params: &BTreeMap<String, serde_json::Value>,
) -> Result<(), ConfigurationError> {
    let declared: BTreeSet<&str> = rules
        .iter()
        .flat_map(|r| r.definition.params.iter().map(|p| p.name.as_str()))
        .collect();

    match cli_params.keys().find(|k| !declared.contains(k.as_str())) {
        Some(unknown) => Err(ConfigurationError::UnknownArgument {
            stage: stage.to_string(),
            rule: None,
            argument: unknown.clone(),
        }),
        None => Ok(()),
    }
}

/// Binds the arguments of a single rule.
pub fn bind_arguments(
    rule: &StageRule<'_>,
    base: &RuleArgs,
    cli_params: &BTreeMap<String, serde_json::Value>,
) -> Result<RuleArgs, ConfigurationError> {
    let mut params = BTreeMap::new();
    for spec in &rule.definition.params {
        if let Some(value) = cli_params.get(&spec.name) {
            params.insert(spec.name.clone(), value.clone());
        }
    }
    for (name, value) in &rule.entry.kwargs {
        params.insert(name.clone(), value.clone());
    }

    if let Some(missing) = rule
        .definition
        .params
        .iter()
        .find(|p| p.required && params.get(&p.name).map_or(true, serde_json::Value::is_null))
    {
        return Err(ConfigurationError::missing_argument(rule.key(), &missing.name));
    }

    Ok(RuleArgs {
        project_id: base.project_id.clone(),
        dataset_id: base.dataset_id.clone(),
        sandbox_dataset_id: base.sandbox_dataset_id.clone(),
        table_namer: rule.entry.table_namer.clone().or_else(|| base.table_namer.clone()),
        params,
    })
}

/// Resolves every rule of `stage`, failing on the first configuration error.
pub fn resolve_stage<'a>(
    registry: &'a StageRegistry,
    stage: DataStage,
    base: &RuleArgs,
    cli_params: &BTreeMap<String, serde_json::Value>,
) -> Result<Vec<ResolvedRule<'a>>, ConfigurationError> {
    let rules = registry.rules_for_stage(stage)?;
    check_unknown_arguments(stage, &rules, cli_params)?;
    check_sandbox_dataset(&base.dataset_id, &base.sandbox_dataset_id)?;

    rules
        .into_iter()
        .map(|rule| {
            let args = bind_arguments(&rule, base, cli_params)?;
            Ok(ResolvedRule { rule, args })
        })
        .collect()
}
