//! Rule catalog, stage registry and argument resolution.
//!
//! - [`RuleCatalog`]: rule key to definition (factory, parameters, dependencies)
//! - [`StageRegistry`]: stage to ordered rule entries, validated on registration
//! - [`resolve_stage`]: binds arguments to every rule of a stage
//! - [`DependencyGraph`]: cycle and unknown-key detection over the catalog

mod catalog;
mod defaults;
mod graph;
mod resolver;
mod stages;

pub use catalog::{RuleCatalog, RuleDefinition, RuleFactory};
pub use defaults::default_stage_lists;
pub use graph::DependencyGraph;
pub use resolver::{bind_arguments, check_unknown_arguments, resolve_stage, ResolvedRule};
pub use stages::{RegistryEntry, RegistryManifest, StageRegistry, StageRule};
