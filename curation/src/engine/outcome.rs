//! Per-rule outcomes, the status tracker and the stage summary.

use crate::core::{DataStage, RuleStatus, Verification};
use crate::errors::RuleError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Enforces the legal order of rule states.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    rule: String,
    status: RuleStatus,
    history: Vec<RuleStatus>,
}

impl StatusTracker {
    /// Starts tracking `rule` in `Pending`.
    #[must_use]
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            status: RuleStatus::Pending,
            history: vec![RuleStatus::Pending],
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn status(&self) -> RuleStatus {
        self.status
    }

    /// Returns every state entered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[RuleStatus] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::IllegalTransition`] and stays put if the move is
    /// not allowed from the current state.
    pub fn transition(&mut self, next: RuleStatus) -> Result<(), RuleError> {
        if !self.status.can_transition_to(next) {
            return Err(RuleError::IllegalTransition {
                rule: self.rule.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(rule = %self.rule, from = %self.status, to = %next, "Rule state change");
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Failed` unless the rule already finished.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = RuleStatus::Failed;
            self.history.push(RuleStatus::Failed);
        }
    }
}

/// What happened to one rule during a stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// Catalog key.
    pub rule: String,
    /// Ticket ids of the rule, empty if it was never built.
    pub issue_numbers: Vec<String>,
    /// Terminal state.
    pub status: RuleStatus,
    /// Result of `validate_rule`; `Unverified` if it never ran.
    pub verification: Verification,
    /// Number of query specs that completed.
    pub queries_run: usize,
    /// Error text for failed rules.
    pub error: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl RuleOutcome {
    /// Returns true if the rule succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RuleStatus::Succeeded
    }

    /// Returns true if the rule succeeded without a verified post-condition.
    #[must_use]
    pub fn is_unverified(&self) -> bool {
        self.is_success() && self.verification == Verification::Unverified
    }
}

/// Aggregate result of running one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    /// Identifier of this run, attached to every log line of the stage.
    pub run_id: Uuid,
    /// The stage that ran.
    pub stage: DataStage,
    /// Rules that were started.
    pub attempted: usize,
    /// Rules that reached `Succeeded`.
    pub succeeded: usize,
    /// Rules that reached `Failed`.
    pub failed: usize,
    /// Succeeded rules whose validation was not implemented.
    pub unverified: usize,
    /// Per-rule outcomes in registry order.
    pub outcomes: Vec<RuleOutcome>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl StageSummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(stage: DataStage) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            stage,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            unverified: 0,
            outcomes: Vec::new(),
            duration_ms: 0.0,
        }
    }

    /// Adds a finished rule.
    pub fn record(&mut self, outcome: RuleOutcome) {
        self.attempted += 1;
        if outcome.is_success() {
            self.succeeded += 1;
            if outcome.is_unverified() {
                self.unverified += 1;
            }
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Returns true if any rule failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Returns the share of attempted rules that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.attempted as f64
    }

    /// Returns the outcome of `rule`.
    #[must_use]
    pub fn outcome(&self, rule: &str) -> Option<&RuleOutcome> {
        self.outcomes.iter().find(|o| o.rule == rule)
    }

    /// Returns the failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(rule: &str, status: RuleStatus, verification: Verification) -> RuleOutcome {
        RuleOutcome {
            rule: rule.to_string(),
            issue_numbers: vec!["DC-1".to_string()],
            status,
            verification,
            queries_run: 0,
            error: None,
            duration_ms: 1.0,
        }
    }

    #[test]
    fn test_tracker_rejects_skipping_setup() {
        let mut tracker = StatusTracker::new("r");
        let err = tracker.transition(RuleStatus::Validating).unwrap_err();

        assert!(matches!(err, RuleError::IllegalTransition { .. }));
        assert_eq!(tracker.status(), RuleStatus::Pending);
    }

    #[test]
    fn test_tracker_history() {
        let mut tracker = StatusTracker::new("r");
        tracker.transition(RuleStatus::Setup).unwrap();
        tracker.transition(RuleStatus::Executing { index: 0, total: 1 }).unwrap();
        tracker.fail();
        tracker.fail();

        assert_eq!(
            tracker.history(),
            &[
                RuleStatus::Pending,
                RuleStatus::Setup,
                RuleStatus::Executing { index: 0, total: 1 },
                RuleStatus::Failed
            ]
        );
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = StageSummary::new(DataStage::Rdr);
        summary.record(outcome("a", RuleStatus::Succeeded, Verification::Verified));
        summary.record(outcome("b", RuleStatus::Succeeded, Verification::Unverified));
        summary.record(outcome("c", RuleStatus::Failed, Verification::Unverified));

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unverified, 1);
        assert!(summary.has_failures());
        assert!((summary.success_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(summary.failures().map(|o| o.rule.as_str()).collect::<Vec<_>>(), vec!["c"]);
        assert!(summary.outcome("b").unwrap().is_unverified());
    }

    #[test]
    fn test_empty_summary() {
        let summary = StageSummary::new(DataStage::Ehr);
        assert!(!summary.has_failures());
        assert_eq!(summary.success_rate(), 0.0);
        assert_ne!(summary.run_id, StageSummary::new(DataStage::Ehr).run_id);
    }
}
