//! Query specifications emitted by cleaning rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of job status re-checks before a query is abandoned.
pub const DEFAULT_RETRY_COUNT: u32 = 10;

/// How a query's result interacts with an existing destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Fail if the destination already holds data.
    WriteEmpty,
    /// Replace the destination's contents.
    WriteTruncate,
    /// Append to the destination.
    WriteAppend,
}

impl WriteDisposition {
    /// Returns the warehouse identifier for the disposition.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteEmpty => "WRITE_EMPTY",
            Self::WriteTruncate => "WRITE_TRUNCATE",
            Self::WriteAppend => "WRITE_APPEND",
        }
    }

    /// Returns true if writing with this disposition discards existing rows.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::WriteTruncate)
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's unit of submitted work.
///
/// A spec either writes its result into a destination table, in which case
/// dataset and disposition are mandatory, or runs as a standalone statement
/// (DDL/DML) with no destination at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// SQL text.
    pub query: String,
    /// Destination table id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<String>,
    /// Destination dataset id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_dataset: Option<String>,
    /// Write disposition for the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_disposition: Option<WriteDisposition>,
    /// Job status re-checks before giving up.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Run at batch priority.
    #[serde(default)]
    pub batch: bool,
    /// Use the legacy SQL dialect.
    #[serde(default)]
    pub legacy_sql: bool,
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

impl QuerySpec {
    /// Creates a standalone query with no destination.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            destination_table: None,
            destination_dataset: None,
            write_disposition: None,
            retry_count: DEFAULT_RETRY_COUNT,
            batch: false,
            legacy_sql: false,
        }
    }

    /// Sets the complete destination.
    #[must_use]
    pub fn with_destination(
        mut self,
        dataset: impl Into<String>,
        table: impl Into<String>,
        disposition: WriteDisposition,
    ) -> Self {
        self.destination_dataset = Some(dataset.into());
        self.destination_table = Some(table.into());
        self.write_disposition = Some(disposition);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Runs the query at batch priority.
    #[must_use]
    pub fn batch(mut self) -> Self {
        self.batch = true;
        self
    }

    /// Uses the legacy SQL dialect.
    #[must_use]
    pub fn legacy(mut self) -> Self {
        self.legacy_sql = true;
        self
    }

    /// Returns true if the spec replaces the contents of its destination.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        self.destination_table.is_some()
            && self.write_disposition.is_some_and(|d| d.is_destructive())
    }

    /// Returns `dataset.table` when the spec has a destination.
    #[must_use]
    pub fn destination(&self) -> Option<(&str, &str)> {
        match (&self.destination_dataset, &self.destination_table) {
            (Some(dataset), Some(table)) => Some((dataset.as_str(), table.as_str())),
            _ => None,
        }
    }

    /// Validates the spec's invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query text is empty".to_string());
        }
        if self.destination_table.is_some() {
            if self.destination_dataset.is_none() {
                return Err("destination_table is set without destination_dataset".to_string());
            }
            if self.write_disposition.is_none() {
                return Err("destination_table is set without write_disposition".to_string());
            }
        } else if self.destination_dataset.is_some() || self.write_disposition.is_some() {
            return Err(
                "destination_dataset/write_disposition are set without destination_table"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_spec_is_valid() {
        let spec = QuerySpec::new("DELETE FROM `p.d.t` WHERE TRUE");
        assert!(spec.validate().is_ok());
        assert!(!spec.is_destructive());
        assert_eq!(spec.retry_count, DEFAULT_RETRY_COUNT);
    }

    #[test]
    fn test_destination_spec_is_valid() {
        let spec = QuerySpec::new("SELECT 1")
            .with_destination("d", "t", WriteDisposition::WriteTruncate)
            .with_retry_count(2)
            .batch();

        assert!(spec.validate().is_ok());
        assert!(spec.is_destructive());
        assert_eq!(spec.destination(), Some(("d", "t")));
        assert!(spec.batch);
    }

    #[test]
    fn test_partial_destination_is_rejected() {
        let mut spec = QuerySpec::new("SELECT 1");
        spec.destination_table = Some("t".to_string());
        assert!(spec.validate().unwrap_err().contains("destination_dataset"));

        spec.destination_dataset = Some("d".to_string());
        assert!(spec.validate().unwrap_err().contains("write_disposition"));

        let mut orphan = QuerySpec::new("SELECT 1");
        orphan.write_disposition = Some(WriteDisposition::WriteAppend);
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_empty_query_is_rejected() {
        assert!(QuerySpec::new("   ").validate().is_err());
    }

    #[test]
    fn test_append_is_not_destructive() {
        let spec =
            QuerySpec::new("SELECT 1").with_destination("d", "t", WriteDisposition::WriteAppend);
        assert!(!spec.is_destructive());
    }

    #[test]
    fn test_disposition_serialize() {
        let json = serde_json::to_string(&WriteDisposition::WriteTruncate).unwrap();
        assert_eq!(json, r#""WRITE_TRUNCATE""#);
    }
}
