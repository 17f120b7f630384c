//! In-memory warehouse for tests.

use super::eval::{parse_statement, Row, Statement, TablePath};
use crate::core::WriteDisposition;
use crate::errors::WarehouseError;
use crate::warehouse::{JobId, JobState, QueryJob, WarehouseClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<TablePath, Vec<Row>>,
    jobs: HashMap<JobId, (JobState, usize)>,
    submitted: Vec<QueryJob>,
    next_job: usize,
}

/// A [`WarehouseClient`] that keeps tables in memory and interprets the
/// simple statements built-in rules emit.
///
/// Jobs run synchronously on submit; `job_state` reports the outcome, after
/// an optional number of `Running` answers. Statements it cannot interpret
/// fail with reason `unsupportedQuery` unless the warehouse is lenient, in
/// which case they complete without effect.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    state: Mutex<State>,
    lenient: bool,
    pending_checks: usize,
    failing: Vec<String>,
}

impl InMemoryWarehouse {
    /// Creates an empty, strict warehouse.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes statements it cannot interpret instead of failing them.
    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Reports every job as running for `checks` status checks first.
    #[must_use]
    pub fn with_pending_checks(mut self, checks: usize) -> Self {
        self.pending_checks = checks;
        self
    }

    /// Fails every job whose query text contains `fragment`.
    #[must_use]
    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.failing.push(fragment.into());
        self
    }

    /// Creates or replaces a table.
    pub fn insert_table(&self, project: &str, dataset: &str, table: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .tables
            .insert(TablePath::new(project, dataset, table), rows);
    }

    /// Creates or replaces a table from JSON objects.
    ///
    /// # Panics
    ///
    /// Panics if a value is not a JSON object.
    pub fn insert_json(&self, project: &str, dataset: &str, table: &str, rows: Vec<serde_json::Value>) {
        let rows = rows
            .into_iter()
            .map(|value| match value {
                serde_json::Value::Object(map) => map.into_iter().collect(),
                other => panic!("row {other} is not a JSON object"),
            })
            .collect();
        self.insert_table(project, dataset, table, rows);
    }

    /// Returns a copy of a table's rows.
    #[must_use]
    pub fn rows(&self, project: &str, dataset: &str, table: &str) -> Option<Vec<Row>> {
        self.state
            .lock()
            .tables
            .get(&TablePath::new(project, dataset, table))
            .cloned()
    }

    /// Returns every job submitted so far, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<QueryJob> {
        self.state.lock().submitted.clone()
    }

    fn run(&self, state: &mut State, job: &QueryJob) -> Result<(), (String, String)> {
        if let Some(fragment) = self.failing.iter().find(|f| job.query.contains(f.as_str())) {
            return Err(("injected".to_string(), format!("query matched '{fragment}'")));
        }

        let statement = match parse_statement(&job.query) {
            Ok(statement) => statement,
            Err(_) if self.lenient => return Ok(()),
            Err(message) => return Err(("unsupportedQuery".to_string(), message)),
        };

        match statement {
            Statement::Select { source, filter } => {
                let rows = state
                    .tables
                    .get(&source)
                    .ok_or_else(|| not_found(&source))?
                    .iter()
                    .filter(|row| filter.as_ref().map_or(true, |f| f.test(row) == Some(true)))
                    .cloned()
                    .collect::<Vec<_>>();

                if let (Some(dataset), Some(table)) = (&job.destination_dataset_id, &job.destination_table_id) {
                    let target = TablePath::new(&job.project_id, dataset, table);
                    write(state, target, rows, job.write_disposition)?;
                }
                Ok(())
            }
            Statement::Count { .. } => Ok(()),
            Statement::CreateFromList { target, column, values } => {
                state.tables.entry(target).or_insert_with(|| {
                    values
                        .into_iter()
                        .map(|v| Row::from([(column.clone(), v)]))
                        .collect()
                });
                Ok(())
            }
        }
    }
}

fn not_found(path: &TablePath) -> (String, String) {
    (
        "notFound".to_string(),
        format!("Not found: Table {}:{}.{}", path.project, path.dataset, path.table),
    )
}

fn write(
    state: &mut State,
    target: TablePath,
    rows: Vec<Row>,
    disposition: Option<WriteDisposition>,
) -> Result<(), (String, String)> {
    match disposition {
        Some(WriteDisposition::WriteTruncate) => {
            state.tables.insert(target, rows);
        }
        Some(WriteDisposition::WriteAppend) => state.tables.entry(target).or_default().extend(rows),
        Some(WriteDisposition::WriteEmpty) | None => {
            let existing = state.tables.entry(target).or_default();
            if !existing.is_empty() {
                return Err(("duplicate".to_string(), "Destination table is not empty".to_string()));
            }
            *existing = rows;
        }
    }
    Ok(())
}

#[async_trait]
impl WarehouseClient for InMemoryWarehouse {
    async fn submit(&self, job: &QueryJob) -> Result<JobId, WarehouseError> {
        let mut state = self.state.lock();
        state.next_job += 1;
        let job_id = JobId::new(format!(
            "{}job_{}",
            job.job_id_prefix.as_deref().unwrap_or_default(),
            state.next_job
        ));

        let outcome = match self.run(&mut state, job) {
            Ok(()) => JobState::Done,
            Err((reason, message)) => JobState::Failed { reason, message },
        };
        state.submitted.push(job.clone());
        state.jobs.insert(job_id.clone(), (outcome, 0));
        Ok(job_id)
    }

    async fn job_state(&self, job_id: &JobId) -> Result<JobState, WarehouseError> {
        let mut state = self.state.lock();
        let (outcome, checks) = state.jobs.get_mut(job_id).ok_or_else(|| WarehouseError::UnknownJob {
            job_id: job_id.to_string(),
        })?;
        *checks += 1;
        if *checks <= self.pending_checks {
            return Ok(JobState::Running);
        }
        Ok(outcome.clone())
    }

    async fn count_rows(&self, _project_id: &str, query: &str) -> Result<Option<u64>, WarehouseError> {
        let statement = parse_statement(query).map_err(|message| WarehouseError::Transport { message })?;
        let Statement::Count { source, filter } = statement else {
            return Err(WarehouseError::Transport {
                message: "count_rows expects SELECT COUNT(*)".to_string(),
            });
        };

        let state = self.state.lock();
        let count = state.tables.get(&source).map_or(0, |rows| {
            rows.iter()
                .filter(|row| filter.as_ref().map_or(true, |f| f.test(row) == Some(true)))
                .count()
        });
        Ok(Some(count as u64))
    }
}
