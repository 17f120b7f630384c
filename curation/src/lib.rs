//! # Curation
//!
//! A stage-scoped cleaning rule engine for OMOP CDM datasets held in a SQL
//! warehouse.
//!
//! The engine provides:
//!
//! - **A rule contract**: every cleaning rule turns its arguments into an ordered list of query specs
//! - **A stage registry**: the ordered rule list of every pipeline stage, validated up front
//! - **Sandboxing**: destructive rewrites are refused unless the affected rows were copied first
//! - **Per-rule isolation**: a failing rule is reported and the stage carries on
//! - **Dry runs**: every stage's SQL can be rendered to CSV or JSON without touching the warehouse
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use curation::prelude::*;
//!
//! let engine = CleaningEngine::new(StageRegistry::builtin()?, client, EngineConfig::default());
//! let request = RunRequest::new(DataStage::Rdr, "my-project", "rdr_2024")
//!     .with_param("truncation_date", "2024-07-01".into());
//!
//! let summary = engine.run_stage(&request).await?;
//! println!("{} of {} rules succeeded", summary.succeeded, summary.attempted);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod report;
pub mod rules;
pub mod testing;
pub mod warehouse;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::{DataStage, QuerySpec, RuleStatus, Verification, WriteDisposition};
    pub use crate::engine::{CleaningEngine, RuleOutcome, RunRequest, StageSummary};
    pub use crate::errors::{ConfigurationError, CurationError, ReportError, RuleError, WarehouseError};
    pub use crate::registry::{RegistryEntry, RuleCatalog, RuleDefinition, StageRegistry};
    pub use crate::report::{write_csv, write_json, ReportFormat, ReportRow, Reporter};
    pub use crate::rules::{CleaningRule, ParamSpec, RuleArgs, RuleDescriptor};
    pub use crate::warehouse::{PollConfig, Warehouse, WarehouseClient};
}
