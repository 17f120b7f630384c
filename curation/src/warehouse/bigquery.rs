//! BigQuery REST client.
//!
//! Submits jobs with `jobs.insert`, polls them with `jobs.get` and counts
//! rows with `jobs.query`. The caller supplies an OAuth access token.

use super::{JobId, JobState, QueryJob, WarehouseClient};
use crate::errors::WarehouseError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// A [`WarehouseClient`] for Google BigQuery.
pub struct BigQueryClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    jobs: Mutex<HashMap<JobId, String>>,
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct JobResource {
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: Value,
}

impl BigQueryClient {
    /// Creates a client with the given per-request timeout.
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Result<Self, WarehouseError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WarehouseError::Transport { message: e.to_string() })?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: access_token.into(),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Points the client at another API root.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, WarehouseError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| WarehouseError::Transport { message: e.to_string() })?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| WarehouseError::Transport { message: e.to_string() })?;

        if status.is_success() {
            Ok(body)
        } else {
            let message = body["error"]["message"].as_str().unwrap_or("no error message").to_string();
            Err(WarehouseError::Transport {
                message: format!("HTTP {status}: {message}"),
            })
        }
    }
}

fn generate_job_id(prefix: Option<&str>) -> JobId {
    JobId::new(format!("{}{}", prefix.unwrap_or_default(), uuid::Uuid::new_v4().simple()))
}

fn insert_body(job: &QueryJob, job_id: &JobId) -> Value {
    let mut query = json!({
        "query": job.query,
        "useLegacySql": job.use_legacy_sql,
        "priority": if job.batch { "BATCH" } else { "INTERACTIVE" },
    });
    if let (Some(dataset), Some(table)) = (&job.destination_dataset_id, &job.destination_table_id) {
        query["destinationTable"] = json!({
            "projectId": job.project_id,
            "datasetId": dataset,
            "tableId": table,
        });
    }
    if let Some(disposition) = job.write_disposition {
        query["writeDisposition"] = json!(disposition);
    }

    json!({
        "jobReference": { "projectId": job.project_id, "jobId": job_id.as_str() },
        "configuration": { "query": query },
    })
}

fn parse_state(resource: Value) -> Result<JobState, WarehouseError> {
    let resource: JobResource =
        serde_json::from_value(resource).map_err(|e| WarehouseError::Transport { message: e.to_string() })?;
    let Some(status) = resource.status else {
        return Ok(JobState::Pending);
    };

    Ok(match (status.state.as_str(), status.error_result) {
        ("DONE", Some(error)) => JobState::Failed {
            reason: error.reason,
            message: error.message,
        },
        ("DONE", None) => JobState::Done,
        ("RUNNING", _) => JobState::Running,
        _ => JobState::Pending,
    })
}

fn parse_count(response: Value) -> Result<Option<u64>, WarehouseError> {
    let response: QueryResponse =
        serde_json::from_value(response).map_err(|e| WarehouseError::Transport { message: e.to_string() })?;
    if !response.job_complete {
        return Ok(None);
    }

    let cell = response
        .rows
        .first()
        .and_then(|row| row.f.first())
        .map(|cell| &cell.v);
    match cell {
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| WarehouseError::Transport {
                message: format!("count '{s}' is not a number"),
            }),
        Some(Value::Number(n)) => Ok(n.as_u64()),
        _ => Ok(Some(0)),
    }
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    async fn submit(&self, job: &QueryJob) -> Result<JobId, WarehouseError> {
        let job_id = generate_job_id(job.job_id_prefix.as_deref());
        let url = format!("{}/projects/{}/jobs", self.endpoint, job.project_id);

        self.call(self.http.post(url).json(&insert_body(job, &job_id)))
            .await
            .map_err(|e| WarehouseError::submission(e.to_string()))?;
        self.jobs.lock().insert(job_id.clone(), job.project_id.clone());
        tracing::debug!(job_id = %job_id, project_id = %job.project_id, "Inserted BigQuery job");
        Ok(job_id)
    }

    async fn job_state(&self, job_id: &JobId) -> Result<JobState, WarehouseError> {
        let project_id = self
            .jobs
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| WarehouseError::UnknownJob {
                job_id: job_id.to_string(),
            })?;
        let url = format!("{}/projects/{}/jobs/{}", self.endpoint, project_id, job_id.as_str());

        parse_state(self.call(self.http.get(url)).await?)
    }

    async fn count_rows(&self, project_id: &str, query: &str) -> Result<Option<u64>, WarehouseError> {
        let url = format!("{}/projects/{}/queries", self.endpoint, project_id);
        let body = json!({ "query": query, "useLegacySql": false });

        parse_count(self.call(self.http.post(url).json(&body)).await?)
    }
}
