//! Wall-clock timing for stages and rules.

use crate::core::DataStage;
use std::time::Instant;

/// The unit of work a [`RunTimer`] measures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimedUnit {
    /// A whole stage run.
    Stage(DataStage),
    /// One rule, by catalog key.
    Rule(String),
}

/// Measures how long a stage or a rule takes.
///
/// `finish` emits a trace event with the same `stage` or `rule` field the
/// engine's other events carry, so durations join up with the run's logs.
#[derive(Debug)]
pub struct RunTimer {
    start: Instant,
    unit: TimedUnit,
}

impl RunTimer {
    /// Starts timing a stage.
    #[must_use]
    pub fn stage(stage: DataStage) -> Self {
        Self {
            start: Instant::now(),
            unit: TimedUnit::Stage(stage),
        }
    }

    /// Starts timing the rule registered under `key`.
    #[must_use]
    pub fn rule(key: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            unit: TimedUnit::Rule(key.into()),
        }
    }

    /// Returns what is being timed.
    #[must_use]
    pub fn unit(&self) -> &TimedUnit {
        &self.unit
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        let duration_ms = self.elapsed_ms();
        match &self.unit {
            TimedUnit::Stage(stage) => tracing::trace!(stage = %stage, duration_ms, "Stage timer stopped"),
            TimedUnit::Rule(key) => tracing::trace!(rule = %key, duration_ms, "Rule timer stopped"),
        }
        duration_ms
    }
}
