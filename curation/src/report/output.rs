//! Report serialization.

use super::{ReportRow, COLUMNS};
use crate::errors::ReportError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

/// Output format of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Comma separated, RFC 4180 quoting.
    #[default]
    Csv,
    /// JSON array of row objects.
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format '{other}' (expected csv or json)")),
        }
    }
}

/// Writes `rows` as CSV with a header line.
///
/// `columns` selects and orders the output columns; an empty slice means
/// every column.
///
/// # Errors
///
/// Returns [`ReportError::UnknownColumn`] before writing anything if a
/// column name is not a report column.
pub fn write_csv<W: Write>(rows: &[ReportRow], columns: &[&str], writer: W) -> Result<(), ReportError> {
    let columns: Vec<&str> = if columns.is_empty() { COLUMNS.to_vec() } else { columns.to_vec() };
    if let Some(unknown) = columns.iter().find(|c| !COLUMNS.contains(c)) {
        return Err(ReportError::UnknownColumn((*unknown).to_string()));
    }

    let mut csv = csv::WriterBuilder::new().from_writer(writer);
    csv.write_record(&columns)?;
    for row in rows {
        csv.write_record(columns.iter().map(|c| row.field(c).unwrap_or_default()))?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes `rows` as a pretty-printed JSON array.
pub fn write_json<W: Write>(rows: &[ReportRow], mut writer: W) -> Result<(), ReportError> {
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row() -> ReportRow {
        ReportRow {
            stage: "rdr".to_string(),
            rule: "r".to_string(),
            sql: "SELECT \"a\", b\nFROM t".to_string(),
            ..ReportRow::default()
        }
    }

    #[test]
    fn test_csv_quotes_fields() {
        let mut out = Vec::new();
        write_csv(&[row()], &["rule", "sql"], &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "rule,sql\nr,\"SELECT \"\"a\"\", b\nFROM t\"\n");
    }

    #[test]
    fn test_csv_all_columns_header() {
        let mut out = Vec::new();
        write_csv(&[], &[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim_end(), COLUMNS.join(","));
    }

    #[test]
    fn test_unknown_column() {
        let err = write_csv(&[row()], &["rule", "sqll"], Vec::new()).unwrap_err();
        assert!(matches!(err, ReportError::UnknownColumn(ref c) if c == "sqll"));
    }

    #[test]
    fn test_json_output() {
        let mut out = Vec::new();
        write_json(&[row()], &mut out).unwrap();

        let parsed: Vec<ReportRow> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, vec![row()]);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_csv_to_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_csv(&[row()], &["stage"], std::fs::File::create(file.path()).unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "stage\nrdr\n");
    }
}
