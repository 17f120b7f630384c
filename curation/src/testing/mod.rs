//! Testing utilities for cleaning rules and stages.
//!
//! This module provides:
//! - An in-memory warehouse that interprets the SQL built-in rules emit
//! - Configurable static rules that record their hook calls
//! - Assertions over stage summaries

mod assertions;
mod eval;
mod rules;
mod warehouse;

pub use assertions::{
    assert_no_jobs_submitted, assert_rule_failed, assert_rule_succeeded, assert_rule_verified,
    assert_summary_counts,
};
pub use eval::Row;
pub use rules::{failing_definition, StaticRule};
pub use warehouse::InMemoryWarehouse;
