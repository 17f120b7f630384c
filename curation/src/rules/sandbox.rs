//! Sandbox table naming.
//!
//! Every rule that deletes or rewrites rows first copies them into a sandbox
//! table. Sandbox names are namespaced by the sandbox dataset and by a rule
//! identifier derived from the rule's ticket ids, so two rules touching the
//! same CDM table never share a backup table.

use crate::errors::ConfigurationError;
use sha2::{Digest, Sha256};

/// Maximum length of a warehouse table identifier, in bytes.
pub const MAX_TABLE_ID_LEN: usize = 1024;

const DIGEST_LEN: usize = 12;

/// Returns the conventional sandbox dataset for `dataset_id`.
#[must_use]
pub fn sandbox_dataset_for(dataset_id: &str) -> String {
    format!("{dataset_id}_sandbox")
}

/// Rejects a sandbox dataset that is the dataset being cleaned.
///
/// Backups written there would be overwritten by the very rewrites they
/// protect against.
pub fn check_sandbox_dataset(dataset_id: &str, sandbox_dataset_id: &str) -> Result<(), ConfigurationError> {
    if dataset_id.trim() == sandbox_dataset_id.trim() {
        return Err(ConfigurationError::SandboxIsTarget {
            dataset: dataset_id.to_string(),
        });
    }
    Ok(())
}

/// Normalizes a value into a legal table identifier fragment.
///
/// Lowercases ASCII letters and replaces every character outside
/// `[a-z0-9_]` with an underscore.
#[must_use]
pub fn normalize_identifier(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds the rule identifier used as a sandbox prefix.
///
/// The identifier is the rule's ticket ids joined with `_`, followed by the
/// optional table namer (a per-stage or per-release suffix).
#[must_use]
pub fn rule_identifier<S: AsRef<str>>(issue_numbers: &[S], table_namer: Option<&str>) -> String {
    let mut parts: Vec<&str> = issue_numbers.iter().map(AsRef::as_ref).collect();
    if let Some(namer) = table_namer.filter(|n| !n.trim().is_empty()) {
        parts.push(namer);
    }
    normalize_identifier(&parts.join("_"))
}

/// Returns the sandbox table id for `table_name` under `rule_identifier`.
///
/// Deterministic and always a legal identifier. Names longer than
/// [`MAX_TABLE_ID_LEN`] are truncated and suffixed with a digest of the full
/// name so that distinct inputs keep distinct outputs.
#[must_use]
pub fn sandbox_table_name(rule_identifier: &str, table_name: &str) -> String {
    let full = normalize_identifier(&format!("{rule_identifier}_{table_name}"));
    if full.len() <= MAX_TABLE_ID_LEN {
        return full;
    }

    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let keep = MAX_TABLE_ID_LEN - DIGEST_LEN - 1;
    format!("{}_{}", &full[..keep], &digest[..DIGEST_LEN])
}

/// A fully located sandbox table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxTable {
    /// The sandbox dataset.
    pub dataset_id: String,
    /// The sandbox table id.
    pub table_id: String,
}

impl SandboxTable {
    /// Locates the sandbox table for `table_name` in `sandbox_dataset_id`.
    #[must_use]
    pub fn new(sandbox_dataset_id: &str, rule_identifier: &str, table_name: &str) -> Self {
        Self {
            dataset_id: sandbox_dataset_id.to_string(),
            table_id: sandbox_table_name(rule_identifier, table_name),
        }
    }

    /// Returns the backtick-quoted `project.dataset.table` reference.
    #[must_use]
    pub fn fq_name(&self, project_id: &str) -> String {
        format!("`{}.{}.{}`", project_id, self.dataset_id, self.table_id)
    }
}
