//! Job polling with capped backoff.
//!
//! A submitted job is polled until it reaches a terminal state. Between
//! checks the poller sleeps with exponential backoff, capped at a maximum
//! delay. The number of re-checks is bounded by the query's `retry_count`
//! and every individual client call by the socket timeout.

use super::{JobId, JobState, QueryJob, WarehouseClient};
use crate::errors::WarehouseError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for poll delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for job polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay before the first re-check in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between checks in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
    /// Upper bound for any single client call in seconds.
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_socket_timeout_secs() -> u64 {
    600
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
            socket_timeout_secs: default_socket_timeout_secs(),
        }
    }
}

impl PollConfig {
    /// Creates a new poll config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Sets the socket timeout.
    #[must_use]
    pub fn with_socket_timeout_secs(mut self, secs: u64) -> Self {
        self.socket_timeout_secs = secs;
        self
    }

    /// Returns the socket timeout as a Duration.
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

/// Poll progress for a single job.
#[derive(Debug, Default)]
pub struct PollState {
    /// Number of re-checks made so far.
    pub attempt: u32,
}

impl PollState {
    /// Creates a new poll state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once `retry_count` re-checks have been spent.
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        self.attempt >= retry_count
    }

    /// Calculates the delay before the next re-check.
    #[must_use]
    pub fn calculate_delay(&self, config: &PollConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let attempt = self.attempt;

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

async fn with_socket_timeout<T, F>(
    config: &PollConfig,
    operation: &str,
    call: F,
) -> Result<T, WarehouseError>
where
    F: Future<Output = Result<T, WarehouseError>>,
{
    match tokio::time::timeout(config.socket_timeout(), call).await {
        Ok(result) => result,
        Err(_) => Err(WarehouseError::Timeout {
            operation: operation.to_string(),
            seconds: config.socket_timeout_secs,
        }),
    }
}

/// Submits `job` and waits for it to reach a terminal state.
///
/// The job state is checked once immediately and then up to
/// `job.retry_count` more times with backoff in between.
///
/// # Errors
///
/// Returns the submission error, the job's terminal error, a socket timeout,
/// or [`WarehouseError::PollExhausted`] if the job is still running when the
/// budget is spent.
pub async fn run_query(
    client: &dyn WarehouseClient,
    job: &QueryJob,
    config: &PollConfig,
) -> Result<JobId, WarehouseError> {
    let job_id = with_socket_timeout(config, "submit", client.submit(job)).await?;
    let mut state = PollState::new();

    loop {
        match with_socket_timeout(config, "job_state", client.job_state(&job_id)).await? {
            JobState::Done => return Ok(job_id),
            JobState::Failed { reason, message } => {
                return Err(WarehouseError::job_failed(job_id.as_str(), reason, message));
            }
            JobState::Pending | JobState::Running => {
                if state.is_exhausted(job.retry_count) {
                    return Err(WarehouseError::PollExhausted {
                        job_id: job_id.0,
                        attempts: state.attempt as usize + 1,
                    });
                }
                let delay = state.calculate_delay(config);
                tracing::debug!(
                    job_id = %job_id,
                    attempt = state.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Job not finished, polling again"
                );
                tokio::time::sleep(delay).await;
                state.attempt += 1;
            }
        }
    }
}
