//! Stage registry.
//!
//! Maps each stage to its ordered list of rule entries. The list order is the
//! execution order; registration rejects lists whose declared dependencies do
//! not run strictly earlier, so a valid registry never needs reordering.

use super::{DependencyGraph, RuleCatalog, RuleDefinition};
use crate::core::DataStage;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// One rule in a stage list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Catalog key.
    pub rule: String,
    /// Static arguments bound for this stage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<String, serde_json::Value>,
    /// Sandbox suffix for this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_namer: Option<String>,
}

impl RegistryEntry {
    /// Creates an entry with no static arguments.
    #[must_use]
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            kwargs: BTreeMap::new(),
            table_namer: None,
        }
    }

    /// Binds a static argument.
    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    /// Sets the table namer.
    #[must_use]
    pub fn with_table_namer(mut self, namer: impl Into<String>) -> Self {
        self.table_namer = Some(namer.into());
        self
    }
}

/// JSON form of a registry.
///
/// ```json
/// {"stages": {"rdr": [{"rule": "truncate_rdr_data", "kwargs": {"truncation_date": "2024-01-01"}}]}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryManifest {
    /// Stage identifier to entries.
    pub stages: BTreeMap<String, Vec<RegistryEntry>>,
}

/// A registry entry paired with its catalog definition.
#[derive(Debug, Clone, Copy)]
pub struct StageRule<'a> {
    /// The catalog definition.
    pub definition: &'a RuleDefinition,
    /// The registry entry.
    pub entry: &'a RegistryEntry,
}

impl StageRule<'_> {
    /// Returns the catalog key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.entry.rule
    }
}

/// Stage to ordered rule entries, validated against a catalog.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    catalog: RuleCatalog,
    stages: BTreeMap<DataStage, Vec<RegistryEntry>>,
}

impl StageRegistry {
    /// Creates an empty registry over `catalog`.
    ///
    /// Fails if the catalog's dependency declarations reference unknown keys
    /// or form a cycle.
    pub fn new(catalog: RuleCatalog) -> Result<Self, ConfigurationError> {
        DependencyGraph::from_catalog(&catalog).validate()?;
        Ok(Self {
            catalog,
            stages: BTreeMap::new(),
        })
    }

    /// Registers the rule list for `stage`, replacing any previous list.
    pub fn register(&mut self, stage: DataStage, entries: Vec<RegistryEntry>) -> Result<(), ConfigurationError> {
        self.validate_stage(stage, &entries)?;
        tracing::debug!(stage = %stage, rules = entries.len(), "Registered stage rules");
        self.stages.insert(stage, entries);
        Ok(())
    }

    /// Registers a stage, returning the registry.
    pub fn with_stage(mut self, stage: DataStage, entries: Vec<RegistryEntry>) -> Result<Self, ConfigurationError> {
        self.register(stage, entries)?;
        Ok(self)
    }

    /// Builds a registry from a manifest.
    pub fn from_manifest(catalog: RuleCatalog, manifest: RegistryManifest) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new(catalog)?;
        for (name, entries) in manifest.stages {
            let stage = DataStage::from_str(&name)?;
            registry.register(stage, entries)?;
        }
        Ok(registry)
    }

    /// Parses and builds a registry from manifest JSON.
    pub fn from_manifest_json(catalog: RuleCatalog, json: &str) -> Result<Self, ConfigurationError> {
        let manifest: RegistryManifest = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::invalid(format!("registry manifest: {e}")))?;
        Self::from_manifest(catalog, manifest)
    }

    /// Reads a manifest file.
    pub fn from_manifest_path(catalog: RuleCatalog, path: &Path) -> Result<Self, ConfigurationError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_manifest_json(catalog, &json)
    }

    /// Exports the registry as a manifest.
    #[must_use]
    pub fn manifest(&self) -> RegistryManifest {
        RegistryManifest {
            stages: self
                .stages
                .iter()
                .map(|(stage, entries)| (stage.to_string(), entries.clone()))
                .collect(),
        }
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Returns the registered stages in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = DataStage> + '_ {
        self.stages.keys().copied()
    }

    /// Returns the ordered rules for `stage`.
    pub fn rules_for_stage(&self, stage: DataStage) -> Result<Vec<StageRule<'_>>, ConfigurationError> {
        let entries = self
            .stages
            .get(&stage)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| ConfigurationError::EmptyStage {
                stage: stage.to_string(),
            })?;

        entries
            .iter()
            .map(|entry| {
                Ok(StageRule {
                    definition: self.catalog.get(&entry.rule)?,
                    entry,
                })
            })
            .collect()
    }

    fn validate_stage(&self, stage: DataStage, entries: &[RegistryEntry]) -> Result<(), ConfigurationError> {
        let stage_name = stage.to_string();
        if entries.is_empty() {
            return Err(ConfigurationError::EmptyStage { stage: stage_name });
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        let mut identifiers: HashMap<String, &str> = HashMap::new();

        for entry in entries {
            let definition = self.catalog.get(&entry.rule)?;

            if earlier.contains(entry.rule.as_str()) {
                return Err(ConfigurationError::DuplicateRule {
                    stage: stage_name,
                    rule: entry.rule.clone(),
                });
            }

            if let Some(missing) = definition.depends_on.iter().find(|d| !earlier.contains(d.as_str())) {
                return Err(ConfigurationError::DependencyOrder {
                    stage: stage_name,
                    rule: entry.rule.clone(),
                    dependency: missing.clone(),
                });
            }

            if let Some(unknown) = entry.kwargs.keys().find(|k| definition.param(k).is_none()) {
                return Err(ConfigurationError::UnknownArgument {
                    stage: stage_name,
                    rule: Some(entry.rule.clone()),
                    argument: unknown.clone(),
                });
            }

            let identifier = definition.sandbox_identifier(entry.table_namer.as_deref());
            if let Some(first) = identifiers.insert(identifier.clone(), entry.rule.as_str()) {
                return Err(ConfigurationError::SandboxCollision {
                    stage: stage_name,
                    identifier,
                    first: first.to_string(),
                    second: entry.rule.clone(),
                });
            }

            earlier.insert(entry.rule.as_str());
        }

        Ok(())
    }
}
