//! Test assertions for stage summaries.

use super::InMemoryWarehouse;
use crate::core::{RuleStatus, Verification};
use crate::engine::{RuleOutcome, StageSummary};

fn outcome<'a>(summary: &'a StageSummary, rule: &str) -> &'a RuleOutcome {
    summary.outcome(rule).unwrap_or_else(|| {
        panic!(
            "Expected an outcome for rule '{}', got {:?}",
            rule,
            summary.outcomes.iter().map(|o| o.rule.as_str()).collect::<Vec<_>>()
        )
    })
}

/// Asserts that `rule` succeeded.
pub fn assert_rule_succeeded(summary: &StageSummary, rule: &str) {
    let outcome = outcome(summary, rule);
    assert_eq!(
        outcome.status,
        RuleStatus::Succeeded,
        "Expected rule '{}' to succeed, error: {:?}",
        rule,
        outcome.error
    );
}

/// Asserts that `rule` failed.
pub fn assert_rule_failed(summary: &StageSummary, rule: &str) {
    let outcome = outcome(summary, rule);
    assert_eq!(
        outcome.status,
        RuleStatus::Failed,
        "Expected rule '{}' to fail, got status: {}",
        rule,
        outcome.status
    );
}

/// Asserts that `rule` succeeded with a verified post-condition.
pub fn assert_rule_verified(summary: &StageSummary, rule: &str) {
    assert_rule_succeeded(summary, rule);
    assert_eq!(outcome(summary, rule).verification, Verification::Verified);
}

/// Asserts the attempted, succeeded and failed counts.
pub fn assert_summary_counts(summary: &StageSummary, attempted: usize, succeeded: usize, failed: usize) {
    assert_eq!(
        (summary.attempted, summary.succeeded, summary.failed),
        (attempted, succeeded, failed),
        "Unexpected (attempted, succeeded, failed); failures: {:?}",
        summary.failures().map(|o| (&o.rule, &o.error)).collect::<Vec<_>>()
    );
}

/// Asserts that nothing reached the warehouse.
pub fn assert_no_jobs_submitted(warehouse: &InMemoryWarehouse) {
    let submitted = warehouse.submitted();
    assert!(
        submitted.is_empty(),
        "Expected no submitted jobs, got {:?}",
        submitted.iter().map(|j| &j.query).collect::<Vec<_>>()
    );
}
