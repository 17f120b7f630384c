//! Stage execution engine.
//!
//! [`CleaningEngine`] resolves a stage's rules, checks every contract before
//! touching the warehouse, then drives each rule through
//! `Pending -> Setup -> Executing -> Validating -> Succeeded`. A rule that
//! fails lands in `Failed`; later rules still run.

mod outcome;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use outcome::{RuleOutcome, StageSummary, StatusTracker};
pub use runner::{CleaningEngine, PreparedRule, RunRequest};
