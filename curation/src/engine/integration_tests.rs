//! End-to-end stage runs against the in-memory warehouse.

use super::{CleaningEngine, RunRequest};
use crate::config::EngineConfig;
use crate::core::{DataStage, QuerySpec, RuleStatus, Verification};
use crate::errors::WarehouseError;
use crate::registry::{RegistryEntry, RuleCatalog, StageRegistry};
use crate::rules::builtin::keys;
use crate::rules::check_destructive_writes;
use crate::testing::{
    assert_no_jobs_submitted, assert_rule_failed, assert_rule_succeeded, assert_rule_verified,
    assert_summary_counts, failing_definition, InMemoryWarehouse, StaticRule,
};
use crate::warehouse::{JobId, JobState, PollConfig, QueryJob, WarehouseClient};
use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

mock! {
    Client {}

    #[async_trait]
    impl WarehouseClient for Client {
        async fn submit(&self, job: &QueryJob) -> Result<JobId, WarehouseError>;
        async fn job_state(&self, job_id: &JobId) -> Result<JobState, WarehouseError>;
        async fn count_rows(&self, project_id: &str, query: &str) -> Result<Option<u64>, WarehouseError>;
    }
}

const TRUNCATE_TABLES: &[&str] = &[
    "observation",
    "measurement",
    "condition_occurrence",
    "drug_exposure",
    "procedure_occurrence",
    "visit_occurrence",
];

fn fast_config() -> EngineConfig {
    EngineConfig::new().with_poll(PollConfig::new().with_base_delay_ms(0).with_max_delay_ms(0))
}

fn rdr_engine(catalog: RuleCatalog, entries: Vec<RegistryEntry>, client: Arc<dyn WarehouseClient>) -> CleaningEngine {
    let registry = StageRegistry::new(catalog)
        .unwrap()
        .with_stage(DataStage::Rdr, entries)
        .unwrap();
    CleaningEngine::new(registry, client, fast_config())
}

fn truncation_params() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::from([("truncation_date".to_string(), json!("2023-07-01"))])
}

fn ids(rows: &[crate::testing::Row], column: &str) -> Vec<i64> {
    rows.iter().filter_map(|r| r.get(column).and_then(serde_json::Value::as_i64)).collect()
}

#[tokio::test]
async fn test_failed_rule_does_not_stop_its_dependents() {
    let catalog = RuleCatalog::new()
        .with(StaticRule::definition_from("a", StaticRule::new("DC-1").failing_setup("lookup table missing")))
        .with(StaticRule::definition("b", "DC-2", &["a"]));
    let memory = Arc::new(InMemoryWarehouse::new());
    let engine = rdr_engine(catalog, vec![RegistryEntry::new("a"), RegistryEntry::new("b")], memory);

    let summary = engine.run_stage(&RunRequest::new(DataStage::Rdr, "p", "rdr")).await.unwrap();

    assert_summary_counts(&summary, 2, 1, 1);
    assert_rule_failed(&summary, "a");
    assert_rule_succeeded(&summary, "b");
    assert_eq!(summary.outcomes[0].rule, "a");
}

#[tokio::test]
async fn test_truncate_partitions_table_into_sandbox() {
    let memory = Arc::new(InMemoryWarehouse::new());
    memory.insert_json(
        "p",
        "rdr",
        "observation",
        vec![
            json!({"observation_id": 1, "observation_date": "2023-06-30"}),
            json!({"observation_id": 2, "observation_date": "2023-07-02"}),
            json!({"observation_id": 3, "observation_date": null}),
            json!({"observation_id": 4, "observation_date": "2024-01-01"}),
        ],
    );
    for table in &TRUNCATE_TABLES[1..] {
        memory.insert_table("p", "rdr", table, Vec::new());
    }

    let engine = rdr_engine(
        RuleCatalog::builtin(),
        vec![RegistryEntry::new(keys::TRUNCATE_RDR_DATA)],
        memory.clone(),
    );
    let request = RunRequest::new(DataStage::Rdr, "p", "rdr").with_params(truncation_params());
    let summary = engine.run_stage(&request).await.unwrap();

    assert_summary_counts(&summary, 1, 1, 0);
    assert_rule_verified(&summary, keys::TRUNCATE_RDR_DATA);
    assert_eq!(summary.outcomes[0].queries_run, TRUNCATE_TABLES.len() * 2);

    let kept = memory.rows("p", "rdr", "observation").unwrap();
    let sandboxed = memory.rows("p", "rdr_sandbox", "dc_1009_dc_1185_observation").unwrap();
    assert_eq!(ids(&kept, "observation_id"), vec![1, 3]);
    assert_eq!(ids(&sandboxed, "observation_id"), vec![2, 4]);
    assert!(memory.rows("p", "rdr_sandbox", "dc_1009_dc_1185_measurement").unwrap().is_empty());

    let jobs = memory.submitted();
    assert!(jobs[0].destination_dataset_id.as_deref() == Some("rdr_sandbox"));
    assert!(jobs[1].destination_dataset_id.as_deref() == Some("rdr"));
}

#[tokio::test]
async fn test_rdr_rules_run_in_registry_order() {
    let memory = Arc::new(InMemoryWarehouse::new());
    memory.insert_json(
        "p",
        "rdr",
        "observation",
        vec![
            json!({"observation_id": 1, "observation_date": "2023-06-01", "observation_concept_id": 10}),
            json!({"observation_id": 2, "observation_date": "2023-08-01", "observation_concept_id": 11}),
            json!({"observation_id": 3, "observation_date": null, "observation_concept_id": 0}),
            json!({"observation_id": 4, "observation_date": "2023-05-05", "observation_concept_id": null}),
        ],
    );
    for table in TRUNCATE_TABLES.iter().skip(1).chain(&["device_exposure"]) {
        memory.insert_table("p", "rdr", table, Vec::new());
    }

    let engine = rdr_engine(
        RuleCatalog::builtin(),
        vec![
            RegistryEntry::new(keys::TRUNCATE_RDR_DATA),
            RegistryEntry::new(keys::DROP_ZERO_CONCEPT_IDS),
        ],
        memory.clone(),
    );
    let request = RunRequest::new(DataStage::Rdr, "p", "rdr")
        .with_table_namer(Some("v2".to_string()))
        .with_params(truncation_params());
    let summary = engine.run_stage(&request).await.unwrap();

    assert_summary_counts(&summary, 2, 2, 0);
    assert_eq!(ids(&memory.rows("p", "rdr", "observation").unwrap(), "observation_id"), vec![1]);
    assert_eq!(
        ids(&memory.rows("p", "rdr_sandbox", "dc_1009_dc_1185_v2_observation").unwrap(), "observation_id"),
        vec![2]
    );
    assert_eq!(
        ids(&memory.rows("p", "rdr_sandbox", "dc_388_v2_observation").unwrap(), "observation_id"),
        vec![3, 4]
    );
}

#[tokio::test]
async fn test_query_failure_is_isolated_to_its_rule() {
    let memory = Arc::new(InMemoryWarehouse::new().failing_on("`p.rdr.broken`"));
    let catalog = RuleCatalog::new()
        .with(StaticRule::definition_from(
            "broken",
            StaticRule::new("DC-1").with_specs(vec![QuerySpec::new("SELECT COUNT(*) FROM `p.rdr.broken`")]),
        ))
        .with(StaticRule::definition_from(
            "healthy",
            StaticRule::new("DC-2")
                .with_specs(vec![QuerySpec::new("SELECT COUNT(*) FROM `p.rdr.fine`")])
                .with_validation(Verification::Verified),
        ));
    let engine = rdr_engine(
        catalog,
        vec![RegistryEntry::new("broken"), RegistryEntry::new("healthy")],
        memory.clone(),
    );

    let summary = engine.run_stage(&RunRequest::new(DataStage::Rdr, "p", "rdr")).await.unwrap();

    assert_summary_counts(&summary, 2, 1, 1);
    assert!(summary.outcome("broken").unwrap().error.as_deref().unwrap().contains("injected"));
    assert_rule_verified(&summary, "healthy");
    assert_eq!(memory.submitted().len(), 2);
}

#[tokio::test]
async fn test_failed_validation_leaves_data_in_place() {
    let memory = Arc::new(InMemoryWarehouse::new());
    memory.insert_json("p", "rdr", "t", vec![json!({"id": 1})]);
    let catalog = RuleCatalog::new().with(StaticRule::definition_from(
        "checker",
        StaticRule::new("DC-9").with_validation(Verification::Failed("1 row left".to_string())),
    ));
    let engine = rdr_engine(catalog, vec![RegistryEntry::new("checker")], memory.clone());

    let summary = engine.run_stage(&RunRequest::new(DataStage::Rdr, "p", "rdr")).await.unwrap();

    assert_rule_failed(&summary, "checker");
    assert_eq!(summary.outcomes[0].status, RuleStatus::Failed);
    assert_eq!(memory.rows("p", "rdr", "t").unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_queries_submits_nothing() {
    let mut client = MockClient::new();
    client.expect_submit().times(0);
    client.expect_job_state().times(0);
    client.expect_count_rows().times(0);

    let engine = CleaningEngine::new(StageRegistry::builtin().unwrap(), Arc::new(client), fast_config());
    let request = RunRequest::new(DataStage::Combined, "my-project", "combined_2024");
    let rows = engine.list_queries(&request).unwrap();

    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r.stage == "combined" && !r.is_no_data()));
    assert!(rows.iter().any(|r| r.rule == keys::NO_DATA_AFTER_DEATH));
    assert!(rows.iter().all(|r| !r.sql.contains("{{")));
    assert!(rows.iter().any(|r| r.destination_dataset == "combined_2024_sandbox"));
    assert!(rows.iter().any(|r| r.sql.contains("`my-project.combined_2024.")));
}

#[test]
fn test_list_queries_reports_malformed_rule_and_continues() {
    let memory = Arc::new(InMemoryWarehouse::new());
    let catalog = RuleCatalog::new()
        .with(failing_definition("malformed", "DC-5", "unparseable lookup"))
        .with(StaticRule::definition_from(
            "fine",
            StaticRule::new("DC-6").with_specs(vec![QuerySpec::new("SELECT COUNT(*) FROM `p.rdr.t`")]),
        ));
    let engine = rdr_engine(
        catalog,
        vec![RegistryEntry::new("malformed"), RegistryEntry::new("fine")],
        memory.clone(),
    );

    let rows = engine.list_queries(&RunRequest::new(DataStage::Rdr, "p", "rdr")).unwrap();

    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_no_data());
    assert!(rows[0].error.contains("unparseable lookup"));
    assert_eq!(rows[1].rule, "fine");
    assert!(!rows[1].is_no_data());
    assert_no_jobs_submitted(&memory);
}

#[test]
fn test_default_registry_honours_rule_contract() {
    let memory = Arc::new(InMemoryWarehouse::new());
    let engine = CleaningEngine::new(StageRegistry::builtin().unwrap(), memory.clone(), fast_config());

    for stage in DataStage::ALL {
        let mut request = RunRequest::new(stage, "project_id", "dataset_id");
        if stage == DataStage::Rdr {
            request = request.with_params(truncation_params());
        }

        let prepared = engine
            .prepare(&request)
            .unwrap_or_else(|e| panic!("stage {stage} failed pre-flight: {e}"));
        assert!(!prepared.is_empty(), "stage {stage} has no rules");

        for rule in &prepared {
            let specs = rule.rule.get_query_specs().unwrap();
            assert_eq!(specs, rule.rule.get_query_specs().unwrap(), "{} is not pure", rule.key);
            check_destructive_writes(&rule.key, rule.rule.as_ref(), &rule.args, &specs)
                .unwrap_or_else(|e| panic!("{} in {stage}: {e}", rule.key));
        }
    }
    assert_no_jobs_submitted(&memory);
}

#[tokio::test]
async fn test_missing_required_argument_is_fatal() {
    let memory = Arc::new(InMemoryWarehouse::new());
    let engine = CleaningEngine::new(StageRegistry::builtin().unwrap(), memory.clone(), fast_config());

    let err = engine
        .run_stage(&RunRequest::new(DataStage::Rdr, "p", "rdr"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("truncation_date"));
    assert_no_jobs_submitted(&memory);
}

#[tokio::test]
async fn test_unknown_argument_is_fatal() {
    let memory = Arc::new(InMemoryWarehouse::new());
    let engine = CleaningEngine::new(StageRegistry::builtin().unwrap(), memory.clone(), fast_config());
    let request = RunRequest::new(DataStage::Ehr, "p", "ehr").with_param("truncation_date", json!("2023-07-01"));

    assert!(engine.run_stage(&request).await.is_err());
    assert_no_jobs_submitted(&memory);
}

#[tokio::test]
async fn test_slow_jobs_are_polled_to_completion() {
    let memory = Arc::new(InMemoryWarehouse::new().with_pending_checks(2));
    memory.insert_json("p", "rdr", "t", vec![json!({"id": 1})]);
    let catalog = RuleCatalog::new().with(StaticRule::definition_from(
        "copy",
        StaticRule::new("DC-3").with_specs(vec![QuerySpec::new("SELECT * FROM `p.rdr.t`").with_destination(
            "rdr_sandbox",
            "copy_t",
            crate::core::WriteDisposition::WriteEmpty,
        )]),
    ));
    let engine = rdr_engine(catalog, vec![RegistryEntry::new("copy")], memory.clone());

    let summary = engine.run_stage(&RunRequest::new(DataStage::Rdr, "p", "rdr")).await.unwrap();

    assert_rule_succeeded(&summary, "copy");
    assert_eq!(memory.rows("p", "rdr_sandbox", "copy_t").unwrap().len(), 1);
}
