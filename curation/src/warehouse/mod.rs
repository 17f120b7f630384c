//! Warehouse job interface.
//!
//! The engine talks to the warehouse through [`WarehouseClient`], a narrow
//! submit/poll interface. The client is injected into the engine and passed
//! to every rule hook; nothing in the crate holds a process-wide client.

mod poll;

#[cfg(feature = "bigquery")]
mod bigquery;

pub use poll::{run_query, BackoffStrategy, JitterStrategy, PollConfig, PollState};

#[cfg(feature = "bigquery")]
pub use bigquery::BigQueryClient;

use crate::core::{QuerySpec, WriteDisposition};
use crate::errors::WarehouseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Creates a job id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    /// Queued.
    Pending,
    /// Running.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed {
        /// Short machine-readable reason.
        reason: String,
        /// Warehouse message.
        message: String,
    },
}

impl JobState {
    /// Returns true if the job will not change state again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

/// A query job as submitted to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryJob {
    /// Project that runs the job and owns the destination.
    pub project_id: String,
    /// SQL text.
    pub query: String,
    /// Use the legacy SQL dialect.
    pub use_legacy_sql: bool,
    /// Destination dataset id.
    pub destination_dataset_id: Option<String>,
    /// Destination table id.
    pub destination_table_id: Option<String>,
    /// Write disposition for the destination.
    pub write_disposition: Option<WriteDisposition>,
    /// Status re-checks before the job is abandoned.
    pub retry_count: u32,
    /// Run at batch priority.
    pub batch: bool,
    /// Prefix for the generated job id.
    pub job_id_prefix: Option<String>,
}

impl QueryJob {
    /// Builds a job from a rule's query spec.
    #[must_use]
    pub fn from_spec(project_id: impl Into<String>, spec: &QuerySpec) -> Self {
        Self {
            project_id: project_id.into(),
            query: spec.query.clone(),
            use_legacy_sql: spec.legacy_sql,
            destination_dataset_id: spec.destination_dataset.clone(),
            destination_table_id: spec.destination_table.clone(),
            write_disposition: spec.write_disposition,
            retry_count: spec.retry_count,
            batch: spec.batch,
            job_id_prefix: None,
        }
    }

    /// Sets the job id prefix.
    #[must_use]
    pub fn with_job_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_id_prefix = Some(prefix.into());
        self
    }
}

/// The narrow warehouse interface used by the engine and by rule hooks.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Submits a query job and returns its identifier.
    async fn submit(&self, job: &QueryJob) -> Result<JobId, WarehouseError>;

    /// Looks up the current state of a job.
    async fn job_state(&self, job_id: &JobId) -> Result<JobState, WarehouseError>;

    /// Runs a `SELECT COUNT(*)` query and returns the count.
    ///
    /// Clients that cannot read query results return `Ok(None)`, which rule
    /// validation treats as unverified.
    async fn count_rows(&self, _project_id: &str, _query: &str) -> Result<Option<u64>, WarehouseError> {
        Ok(None)
    }
}

/// A warehouse client bound to the polling configuration of a run.
///
/// This is what the engine hands to rule hooks.
#[derive(Clone)]
pub struct Warehouse {
    client: Arc<dyn WarehouseClient>,
    poll: PollConfig,
    job_id_prefix: Option<String>,
}

impl fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warehouse")
            .field("poll", &self.poll)
            .field("job_id_prefix", &self.job_id_prefix)
            .finish_non_exhaustive()
    }
}

impl Warehouse {
    /// Wraps a client with the default polling configuration.
    #[must_use]
    pub fn new(client: Arc<dyn WarehouseClient>) -> Self {
        Self {
            client,
            poll: PollConfig::default(),
            job_id_prefix: None,
        }
    }

    /// Sets the polling configuration.
    #[must_use]
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the prefix attached to every submitted job.
    #[must_use]
    pub fn with_job_id_prefix(mut self, prefix: Option<String>) -> Self {
        self.job_id_prefix = prefix;
        self
    }

    /// Returns the underlying client.
    #[must_use]
    pub fn client(&self) -> &dyn WarehouseClient {
        self.client.as_ref()
    }

    /// Returns the polling configuration.
    #[must_use]
    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Builds the job for `spec` in `project_id`.
    #[must_use]
    pub fn job_for(&self, project_id: &str, spec: &QuerySpec) -> QueryJob {
        let job = QueryJob::from_spec(project_id, spec);
        match &self.job_id_prefix {
            Some(prefix) => job.with_job_id_prefix(prefix.clone()),
            None => job,
        }
    }

    /// Submits `spec` and waits for the job to finish.
    ///
    /// # Errors
    ///
    /// Returns the error from [`run_query`].
    pub async fn execute(&self, project_id: &str, spec: &QuerySpec) -> Result<JobId, WarehouseError> {
        let job = self.job_for(project_id, spec);
        run_query(self.client.as_ref(), &job, &self.poll).await
    }

    /// Counts rows with the client's result reader, bounded by the socket timeout.
    ///
    /// # Errors
    ///
    /// Returns the client error or a timeout.
    pub async fn count_rows(&self, project_id: &str, query: &str) -> Result<Option<u64>, WarehouseError> {
        match tokio::time::timeout(self.poll.socket_timeout(), self.client.count_rows(project_id, query)).await {
            Ok(result) => result,
            Err(_) => Err(WarehouseError::Timeout {
                operation: "count_rows".to_string(),
                seconds: self.poll.socket_timeout_secs,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_from_spec_copies_configuration() {
        let spec = QuerySpec::new("SELECT 1")
            .with_destination("d", "t", WriteDisposition::WriteAppend)
            .with_retry_count(3)
            .batch()
            .legacy();
        let job = QueryJob::from_spec("p", &spec).with_job_id_prefix("dc_1_");

        assert_eq!(job.project_id, "p");
        assert_eq!(job.destination_dataset_id.as_deref(), Some("d"));
        assert_eq!(job.destination_table_id.as_deref(), Some("t"));
        assert_eq!(job.write_disposition, Some(WriteDisposition::WriteAppend));
        assert_eq!(job.retry_count, 3);
        assert!(job.batch);
        assert!(job.use_legacy_sql);
        assert_eq!(job.job_id_prefix.as_deref(), Some("dc_1_"));
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Failed {
            reason: "invalidQuery".to_string(),
            message: "bad".to_string()
        }
        .is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Pending.is_terminal());
    }
}
