//! Error types for the curation engine.
//!
//! Configuration errors are fatal and surface before any query is submitted.
//! Rule and warehouse errors are isolated to the rule that produced them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for curation operations.
#[derive(Debug, Error)]
pub enum CurationError {
    /// The stage registry, a rule contract, or the supplied arguments are invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A cleaning rule hook failed.
    #[error("{0}")]
    Rule(#[from] RuleError),

    /// The warehouse rejected or failed a job.
    #[error("{0}")]
    Warehouse(#[from] WarehouseError),

    /// Writing a report artifact failed.
    #[error("{0}")]
    Report(#[from] ReportError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONFIG-004-DEP_ORDER").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        let fix_hint = ContractSuggestions::get(&code).map(String::from);
        Self {
            code,
            summary: summary.into(),
            fix_hint,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a cycle is detected among rule dependencies.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in rule dependencies: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of rule keys forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Fatal configuration errors, raised before any query executes.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A stage identifier did not match any known stage.
    #[error("Unknown data stage '{value}'")]
    UnknownStage {
        /// The rejected identifier.
        value: String,
    },

    /// A stage was requested that has no registered rules.
    #[error("No cleaning rules are registered for stage '{stage}'")]
    EmptyStage {
        /// The stage identifier.
        stage: String,
    },

    /// A registry entry referenced a rule key absent from the catalog.
    #[error("Unknown rule key '{key}'")]
    UnknownRuleKey {
        /// The missing key.
        key: String,
    },

    /// The same rule key appears twice in one stage.
    #[error("Rule '{rule}' is registered more than once for stage '{stage}'")]
    DuplicateRule {
        /// The stage identifier.
        stage: String,
        /// The duplicated rule key.
        rule: String,
    },

    /// A rule is listed before (or without) one of its declared dependencies.
    #[error("Rule '{rule}' depends on '{dependency}', which does not run earlier in stage '{stage}'")]
    DependencyOrder {
        /// The stage identifier.
        stage: String,
        /// The dependent rule.
        rule: String,
        /// The dependency that is missing or listed later.
        dependency: String,
    },

    /// The rule dependency graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// Two rules in one stage would write to the same sandbox tables.
    #[error("Rules '{first}' and '{second}' share sandbox identifier '{identifier}' in stage '{stage}'")]
    SandboxCollision {
        /// The stage identifier.
        stage: String,
        /// The colliding identifier.
        identifier: String,
        /// The rule registered first.
        first: String,
        /// The rule registered second.
        second: String,
    },

    /// An argument was supplied that no rule accepts.
    #[error("Unknown argument '{argument}' for {}", argument_target(stage, rule.as_deref()))]
    UnknownArgument {
        /// The stage identifier.
        stage: String,
        /// The rule the argument was given to, when known.
        rule: Option<String>,
        /// The rejected argument name.
        argument: String,
    },

    /// A rule requires an argument that was not supplied.
    #[error("Rule '{rule}' requires argument '{argument}'")]
    MissingArgument {
        /// The rule key.
        rule: String,
        /// The missing argument name.
        argument: String,
    },

    /// A rule does not satisfy the cleaning rule contract.
    #[error("Rule '{rule}' violates the cleaning rule contract ({capability}): {reason}")]
    ContractViolation {
        /// The rule key.
        rule: String,
        /// The capability that is missing or malformed.
        capability: String,
        /// Human readable detail.
        reason: String,
    },

    /// A rule's factory rejected its bound arguments.
    #[error("Rule '{rule}' could not be constructed: {reason}")]
    RuleConstruction {
        /// The rule key.
        rule: String,
        /// The factory error.
        reason: String,
    },

    /// The sandbox dataset is the dataset being cleaned.
    #[error("Sandbox dataset '{dataset}' must differ from the dataset being cleaned")]
    SandboxIsTarget {
        /// The shared dataset id.
        dataset: String,
    },

    /// A registry manifest or configuration file could not be parsed.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// The parse or validation message.
        message: String,
    },
}

fn argument_target(stage: &str, rule: Option<&str>) -> String {
    match rule {
        Some(rule) => format!("rule '{rule}'"),
        None => format!("stage '{stage}'"),
    }
}

impl ConfigurationError {
    /// Creates an unknown-stage error.
    #[must_use]
    pub fn unknown_stage(value: impl Into<String>) -> Self {
        Self::UnknownStage { value: value.into() }
    }

    /// Creates a missing-argument error.
    #[must_use]
    pub fn missing_argument(rule: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::MissingArgument {
            rule: rule.into(),
            argument: argument.into(),
        }
    }

    /// Creates a contract-violation error.
    #[must_use]
    pub fn contract_violation(
        rule: impl Into<String>,
        capability: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ContractViolation {
            rule: rule.into(),
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-configuration error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownStage { .. } => "CONFIG-001-UNKNOWN_STAGE",
            Self::EmptyStage { .. } => "CONFIG-002-EMPTY_STAGE",
            Self::UnknownRuleKey { .. } => "CONFIG-003-UNKNOWN_RULE",
            Self::DuplicateRule { .. } => "CONFIG-004-DUPLICATE",
            Self::DependencyOrder { .. } => "CONFIG-005-DEP_ORDER",
            Self::CycleDetected(_) => "CONFIG-006-CYCLE",
            Self::SandboxCollision { .. } => "CONFIG-007-SANDBOX",
            Self::UnknownArgument { .. } => "CONFIG-008-UNKNOWN_ARG",
            Self::MissingArgument { .. } => "CONFIG-009-MISSING_ARG",
            Self::ContractViolation { .. } => "CONFIG-010-CONTRACT",
            Self::Invalid { .. } => "CONFIG-011-INVALID",
            Self::RuleConstruction { .. } => "CONFIG-012-CONSTRUCTION",
            Self::SandboxIsTarget { .. } => "CONFIG-013-SANDBOX_TARGET",
        }
    }

    /// Returns diagnostic metadata with a fix hint.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let info = ContractErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::DependencyOrder { rule, dependency, .. } => info
                .with_context_entry("rule", rule)
                .with_context_entry("dependency", dependency),
            Self::UnknownArgument { argument, .. } | Self::MissingArgument { argument, .. } => {
                info.with_context_entry("argument", argument)
            }
            Self::ContractViolation { rule, capability, .. } => info
                .with_context_entry("rule", rule)
                .with_context_entry("capability", capability),
            Self::RuleConstruction { rule, .. } => info.with_context_entry("rule", rule),
            Self::SandboxIsTarget { dataset } => info.with_context_entry("dataset", dataset),
            _ => info,
        }
    }
}

/// Errors raised by a cleaning rule's hooks.
#[derive(Debug, Clone, Error)]
pub enum RuleError {
    /// The rule does not implement a capability.
    #[error("Rule '{rule}' does not implement {capability}")]
    NotImplemented {
        /// The rule key or issue id.
        rule: String,
        /// The missing capability.
        capability: String,
    },

    /// A SQL template could not be rendered.
    #[error("Template '{template}' could not be rendered: {reason}")]
    Template {
        /// The template name.
        template: String,
        /// What went wrong.
        reason: String,
    },

    /// A bound parameter has an unusable value.
    #[error("Rule '{rule}' received an invalid value for '{parameter}': {reason}")]
    InvalidParameter {
        /// The rule key or issue id.
        rule: String,
        /// The parameter name.
        parameter: String,
        /// What went wrong.
        reason: String,
    },

    /// A query spec violated the query spec invariants.
    #[error("Query spec {index} of rule '{rule}' is invalid: {reason}")]
    InvalidQuerySpec {
        /// The rule key.
        rule: String,
        /// Zero-based index of the offending spec.
        index: usize,
        /// What went wrong.
        reason: String,
    },

    /// A destructive write targets a table the rule did not sandbox.
    #[error("Rule '{rule}' truncates `{dataset}.{table}` without sandboxing it first")]
    UnsandboxedWrite {
        /// The rule key.
        rule: String,
        /// The destination dataset.
        dataset: String,
        /// The destination table.
        table: String,
    },

    /// The status tracker refused a state change.
    #[error("Rule '{rule}' cannot move from {from} to {to}")]
    IllegalTransition {
        /// The rule key.
        rule: String,
        /// The current state.
        from: String,
        /// The requested state.
        to: String,
    },

    /// A hook failed for a rule-specific reason.
    #[error("Rule '{rule}' failed: {reason}")]
    Failed {
        /// The rule key or issue id.
        rule: String,
        /// What went wrong.
        reason: String,
    },
}

impl RuleError {
    /// Creates a generic rule failure.
    #[must_use]
    pub fn failed(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-parameter error.
    #[must_use]
    pub fn invalid_parameter(
        rule: impl Into<String>,
        parameter: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            rule: rule.into(),
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error marks an unimplemented capability.
    #[must_use]
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }
}

/// Errors raised by the warehouse job interface.
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    /// The job could not be submitted.
    #[error("Job submission failed: {message}")]
    Submission {
        /// The warehouse message.
        message: String,
    },

    /// The job reached a terminal error state.
    #[error("Job {job_id} failed ({reason}): {message}")]
    JobFailed {
        /// The job identifier.
        job_id: String,
        /// Short machine-readable reason.
        reason: String,
        /// The warehouse message.
        message: String,
    },

    /// The job did not finish within the polling budget.
    #[error("Job {job_id} still incomplete after {attempts} status checks")]
    PollExhausted {
        /// The job identifier.
        job_id: String,
        /// Number of status checks made.
        attempts: usize,
    },

    /// A single client call exceeded the socket timeout.
    #[error("Warehouse call '{operation}' timed out after {seconds}s")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout in seconds.
        seconds: u64,
    },

    /// The job identifier is unknown to the warehouse.
    #[error("Unknown job {job_id}")]
    UnknownJob {
        /// The job identifier.
        job_id: String,
    },

    /// Transport-level failure talking to the warehouse.
    #[error("Warehouse transport error: {message}")]
    Transport {
        /// The transport message.
        message: String,
    },
}

impl WarehouseError {
    /// Creates a job failure.
    #[must_use]
    pub fn job_failed(
        job_id: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::JobFailed {
            job_id: job_id.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Creates a submission failure.
    #[must_use]
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }
}

/// Errors raised while writing report artifacts.
#[derive(Debug, Error)]
pub enum ReportError {
    /// IO error.
    #[error("Report IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV writer error.
    #[error("Report CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// An unknown column was requested.
    #[error("Unknown report column '{0}'")]
    UnknownColumn(String),
}

/// Provides default suggestions for configuration error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONFIG-001-UNKNOWN_STAGE" => Some(
                "Use one of the canonical stage identifiers, e.g. 'rdr', 'combined' or \
                 'controlled_tier_deid'.",
            ),
            "CONFIG-002-EMPTY_STAGE" => Some("Register at least one rule for the stage."),
            "CONFIG-003-UNKNOWN_RULE" => Some(
                "Check the rule key for typos or add the rule to the catalog.",
            ),
            "CONFIG-005-DEP_ORDER" => Some(
                "Move the dependency earlier in the stage list. Rules are never reordered \
                 automatically.",
            ),
            "CONFIG-006-CYCLE" => Some(
                "Remove one of the depends_on declarations in the cycle.",
            ),
            "CONFIG-007-SANDBOX" => Some(
                "Give one of the rules a distinct issue number or table namer.",
            ),
            "CONFIG-008-UNKNOWN_ARG" => Some(
                "Remove the argument or check its spelling against the rules' parameters.",
            ),
            "CONFIG-009-MISSING_ARG" => Some(
                "Pass the argument on the command line as '--<name> <value>'.",
            ),
            "CONFIG-010-CONTRACT" => Some(
                "Implement the missing capability or complete the rule descriptor.",
            ),
            "CONFIG-012-CONSTRUCTION" => Some(
                "Check the rule's parameters; the value was accepted by the resolver but \
                 rejected by the rule.",
            ),
            "CONFIG-013-SANDBOX_TARGET" => Some(
                "Omit --sandbox_dataset_id to use '{dataset_id}_sandbox', or name a separate dataset.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("rule", "my_rule");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("rule"), Some(&"my_rule".to_string()));
    }

    #[test]
    fn test_error_info_picks_up_suggestion() {
        let err = ConfigurationError::DependencyOrder {
            stage: "rdr".to_string(),
            rule: "b".to_string(),
            dependency: "a".to_string(),
        };
        let info = err.error_info();

        assert_eq!(info.code, "CONFIG-005-DEP_ORDER");
        assert!(info.fix_hint.is_some());
        assert_eq!(info.context.get("dependency"), Some(&"a".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert!(err.to_string().contains("a -> b -> a"));

        let config: ConfigurationError = err.into();
        assert_eq!(config.code(), "CONFIG-006-CYCLE");
    }

    #[test]
    fn test_unknown_argument_message_names_rule() {
        let err = ConfigurationError::UnknownArgument {
            stage: "rdr".to_string(),
            rule: Some("truncate_rdr_data".to_string()),
            argument: "cutof".to_string(),
        };
        assert!(err.to_string().contains("rule 'truncate_rdr_data'"));

        let err = ConfigurationError::UnknownArgument {
            stage: "rdr".to_string(),
            rule: None,
            argument: "cutof".to_string(),
        };
        assert!(err.to_string().contains("stage 'rdr'"));
    }

    #[test]
    fn test_missing_argument_message() {
        let err = ConfigurationError::missing_argument("truncate_rdr_data", "truncation_date");
        assert_eq!(
            err.to_string(),
            "Rule 'truncate_rdr_data' requires argument 'truncation_date'"
        );
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("CONFIG-006-CYCLE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }

    #[test]
    fn test_rule_error_not_implemented() {
        let err = RuleError::NotImplemented {
            rule: "r".to_string(),
            capability: "get_sandbox_tablenames".to_string(),
        };
        assert!(err.is_not_implemented());
        assert!(!RuleError::failed("r", "boom").is_not_implemented());
    }
}
