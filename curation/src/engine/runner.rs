//! Stage execution.

use super::outcome::{RuleOutcome, StageSummary, StatusTracker};
use crate::config::EngineConfig;
use crate::core::{DataStage, QuerySpec, RuleStatus, Verification};
use crate::errors::{ConfigurationError, CurationError, RuleError};
use crate::observability::RunTimer;
use crate::registry::{resolve_stage, StageRegistry};
use crate::report::{ReportRow, Reporter};
use crate::rules::{check_contract, check_destructive_writes, sandbox_dataset_for, CleaningRule, RuleArgs};
use crate::warehouse::{Warehouse, WarehouseClient};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// What to clean.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Stage whose rules run.
    pub stage: DataStage,
    /// Standard arguments shared by every rule.
    pub args: RuleArgs,
    /// Extra `--name value` arguments.
    pub params: BTreeMap<String, serde_json::Value>,
}

impl RunRequest {
    /// Creates a request; the sandbox dataset defaults to `{dataset_id}_sandbox`.
    #[must_use]
    pub fn new(stage: DataStage, project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        let dataset_id = dataset_id.into();
        let sandbox = sandbox_dataset_for(&dataset_id);
        Self {
            stage,
            args: RuleArgs::new(project_id, dataset_id, sandbox),
            params: BTreeMap::new(),
        }
    }

    /// Overrides the sandbox dataset.
    #[must_use]
    pub fn with_sandbox_dataset(mut self, sandbox_dataset_id: Option<String>) -> Self {
        if let Some(sandbox) = sandbox_dataset_id.filter(|s| !s.trim().is_empty()) {
            self.args.sandbox_dataset_id = sandbox;
        }
        self
    }

    /// Sets the run-wide table namer.
    #[must_use]
    pub fn with_table_namer(mut self, table_namer: Option<String>) -> Self {
        self.args.table_namer = table_namer.filter(|n| !n.trim().is_empty());
        self
    }

    /// Adds an extra argument.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Adds extra arguments.
    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, serde_json::Value>) -> Self {
        self.params.extend(params);
        self
    }
}

/// A rule instance that passed pre-flight.
pub struct PreparedRule {
    /// Catalog key.
    pub key: String,
    /// The built rule.
    pub rule: Box<dyn CleaningRule>,
    /// Its bound arguments.
    pub args: RuleArgs,
}

impl fmt::Debug for PreparedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRule")
            .field("key", &self.key)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one rule while it runs.
struct RuleRun {
    tracker: StatusTracker,
    queries_run: usize,
    verification: Verification,
}

/// Runs the registered cleaning rules of a stage against a warehouse.
///
/// Configuration problems surface from [`CleaningEngine::prepare`] before
/// anything is submitted. After that, each rule's failure is recorded in
/// the [`StageSummary`] and the next rule runs.
pub struct CleaningEngine {
    registry: StageRegistry,
    warehouse: Warehouse,
    config: EngineConfig,
}

impl fmt::Debug for CleaningEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleaningEngine")
            .field("warehouse", &self.warehouse)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CleaningEngine {
    /// Creates an engine over `registry` that submits jobs through `client`.
    #[must_use]
    pub fn new(registry: StageRegistry, client: Arc<dyn WarehouseClient>, config: EngineConfig) -> Self {
        let warehouse = Warehouse::new(client)
            .with_poll_config(config.poll.clone())
            .with_job_id_prefix(config.job_id_prefix.clone());
        Self {
            registry,
            warehouse,
            config,
        }
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Returns the warehouse handle given to rule hooks.
    #[must_use]
    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolves, builds and contract-checks every rule of the stage.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error. Nothing has been submitted.
    pub fn prepare(&self, request: &RunRequest) -> Result<Vec<PreparedRule>, ConfigurationError> {
        let resolved = resolve_stage(&self.registry, request.stage, &request.args, &request.params)?;

        resolved
            .into_iter()
            .map(|resolved| {
                let key = resolved.key().to_string();
                let rule = resolved.rule.definition.build(&resolved.args).map_err(|err| {
                    ConfigurationError::RuleConstruction {
                        rule: key.clone(),
                        reason: err.to_string(),
                    }
                })?;
                check_contract(&key, rule.as_ref(), resolved.rule.definition, request.stage)?;
                Ok(PreparedRule {
                    key,
                    rule,
                    args: resolved.args,
                })
            })
            .collect()
    }

    /// Renders the stage's SQL with the request's identifiers, submitting nothing.
    pub fn list_queries(&self, request: &RunRequest) -> Result<Vec<ReportRow>, ConfigurationError> {
        Reporter::new(&self.registry)
            .with_ids(
                &request.args.project_id,
                &request.args.dataset_id,
                Some(request.args.sandbox_dataset_id.clone()),
            )
            .with_table_namer(request.args.table_namer.clone())
            .stage_rows(request.stage, &request.params)
    }

    /// Runs every rule of the stage in registry order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error from pre-flight. Rule failures are
    /// reported in the summary instead.
    pub async fn run_stage(&self, request: &RunRequest) -> Result<StageSummary, ConfigurationError> {
        let timer = RunTimer::stage(request.stage);
        let prepared = self.prepare(request)?;
        let mut summary = StageSummary::new(request.stage);
        let span = tracing::info_span!("clean_stage", run_id = %summary.run_id, stage = %request.stage);

        tracing::info!(
            run_id = %summary.run_id,
            stage = %request.stage,
            project_id = %request.args.project_id,
            dataset_id = %request.args.dataset_id,
            sandbox_dataset_id = %request.args.sandbox_dataset_id,
            rules = prepared.len(),
            "Starting stage"
        );

        for rule in &prepared {
            summary.record(self.run_rule(rule).instrument(span.clone()).await);
        }
        summary.duration_ms = timer.finish();

        if summary.has_failures() {
            tracing::warn!(
                run_id = %summary.run_id,
                stage = %summary.stage,
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                unverified = summary.unverified,
                duration_ms = summary.duration_ms,
                failed_rules = ?summary.failures().map(|o| o.rule.as_str()).collect::<Vec<_>>(),
                "Stage finished with failures"
            );
        } else {
            tracing::info!(
                run_id = %summary.run_id,
                stage = %summary.stage,
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                unverified = summary.unverified,
                duration_ms = summary.duration_ms,
                "Stage finished"
            );
        }
        Ok(summary)
    }

    /// Drives one prepared rule through its lifecycle.
    pub async fn run_rule(&self, prepared: &PreparedRule) -> RuleOutcome {
        let timer = RunTimer::rule(&prepared.key);
        let mut run = RuleRun {
            tracker: StatusTracker::new(&prepared.key),
            queries_run: 0,
            verification: Verification::Unverified,
        };
        tracing::info!(
            rule = %prepared.key,
            issues = %prepared.rule.descriptor().issues_label(),
            "Applying cleaning rule"
        );

        let error = match self.drive(prepared, &mut run).await {
            Ok(()) => None,
            Err(err) => {
                run.tracker.fail();
                tracing::error!(
                    rule = %prepared.key,
                    queries_run = run.queries_run,
                    error = %err,
                    "Cleaning rule failed"
                );
                Some(err.to_string())
            }
        };

        let duration_ms = timer.finish();
        if error.is_none() {
            tracing::info!(
                rule = %prepared.key,
                queries_run = run.queries_run,
                verification = %run.verification,
                duration_ms,
                "Cleaning rule succeeded"
            );
        }

        RuleOutcome {
            rule: prepared.key.clone(),
            issue_numbers: prepared.rule.descriptor().issue_numbers.clone(),
            status: run.tracker.status(),
            verification: run.verification,
            queries_run: run.queries_run,
            error,
            duration_ms,
        }
    }

    async fn drive(&self, prepared: &PreparedRule, run: &mut RuleRun) -> Result<(), CurationError> {
        let key = prepared.key.as_str();
        let rule = prepared.rule.as_ref();

        run.tracker.transition(RuleStatus::Setup)?;
        let specs = self.with_retry_override(rule.get_query_specs()?);
        check_destructive_writes(key, rule, &prepared.args, &specs)?;

        match rule.setup_rule(&self.warehouse).await? {
            Verification::Verified => tracing::debug!(rule = key, "Setup complete"),
            Verification::Unverified => tracing::info!(rule = key, "Rule has no setup step"),
            Verification::Failed(reason) => {
                return Err(RuleError::failed(key, format!("setup failed: {reason}")).into());
            }
        }

        if let Verification::Failed(reason) = rule.setup_validation(&self.warehouse).await? {
            return Err(RuleError::failed(key, format!("validation setup failed: {reason}")).into());
        }

        let total = specs.len();
        for (index, spec) in specs.iter().enumerate() {
            run.tracker.transition(RuleStatus::Executing { index, total })?;
            self.execute(key, &prepared.args.project_id, index, total, spec).await?;
            run.queries_run += 1;
        }

        run.tracker.transition(RuleStatus::Validating)?;
        let verification = rule.validate_rule(&self.warehouse).await?;
        run.verification = verification.clone();
        match verification {
            Verification::Verified => {}
            Verification::Unverified => {
                tracing::warn!(rule = key, "Rule has no validation; result is unverified");
            }
            Verification::Failed(reason) => {
                return Err(RuleError::failed(key, format!("validation failed: {reason}")).into());
            }
        }
        run.tracker.transition(RuleStatus::Succeeded)?;
        Ok(())
    }

    async fn execute(
        &self,
        rule: &str,
        project_id: &str,
        index: usize,
        total: usize,
        spec: &QuerySpec,
    ) -> Result<(), CurationError> {
        match self.warehouse.execute(project_id, spec).await {
            Ok(job_id) => {
                tracing::info!(
                    rule,
                    query_index = index + 1,
                    total,
                    job_id = %job_id,
                    destination = ?spec.destination(),
                    "Query succeeded"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    rule,
                    query_index = index + 1,
                    total,
                    destination = ?spec.destination(),
                    write_disposition = ?spec.write_disposition,
                    error = %err,
                    query = %spec.query,
                    "Query failed"
                );
                Err(err.into())
            }
        }
    }

    fn with_retry_override(&self, specs: Vec<QuerySpec>) -> Vec<QuerySpec> {
        match self.config.retry_count {
            Some(retry_count) => specs.into_iter().map(|s| s.with_retry_count(retry_count)).collect(),
            None => specs,
        }
    }
}
