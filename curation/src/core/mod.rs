//! Core types for the curation engine.
//!
//! This module contains the fundamental types used throughout the engine:
//! - `DataStage`: pipeline stages
//! - `QuerySpec`: the unit of submitted SQL work
//! - `RuleStatus`: per-rule execution state
//! - `Verification`: tagged outcome of setup and validation hooks

mod query;
mod stage;
mod status;

pub use query::{QuerySpec, WriteDisposition, DEFAULT_RETRY_COUNT};
pub use stage::DataStage;
pub use status::{RuleStatus, Verification};
