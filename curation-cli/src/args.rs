//! Command line arguments.

use clap::{CommandFactory, Parser};
use curation::report::ReportFormat;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "clean-cdm")]
#[command(about = "Runs the cleaning rules of one OMOP CDM pipeline stage", long_about = None)]
#[command(rename_all = "snake_case")]
pub struct Cli {
    /// Project that owns the dataset
    #[arg(long)]
    pub project_id: String,

    /// Dataset to clean
    #[arg(long)]
    pub dataset_id: String,

    /// Stage whose rules run (ehr, rdr, unioned, combined, deid_base, ...)
    #[arg(long)]
    pub data_stage: String,

    /// Sandbox dataset (defaults to {dataset_id}_sandbox)
    #[arg(long)]
    pub sandbox_dataset_id: Option<String>,

    /// Render the stage's SQL instead of running it
    #[arg(long)]
    pub list_queries: bool,

    /// Mirror the file log to stderr
    #[arg(long)]
    pub console_log: bool,

    /// Log file path (defaults to logs/clean-cdm.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Write the file log as JSON lines
    #[arg(long)]
    pub json_log: bool,

    /// Log filter directive, overriding the configuration file
    #[arg(long)]
    pub log_level: Option<String>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stage registry manifest (JSON); defaults to the built-in lists
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Report or summary output path (defaults to stdout)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "csv")]
    pub format: ReportFormat,

    /// Report columns to keep, comma separated
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Suffix added to every sandbox table name
    #[arg(long)]
    pub table_namer: Option<String>,

    /// Exit non-zero when any rule fails
    #[arg(long)]
    pub fail_on_rule_failure: bool,

    /// OAuth access token for the warehouse
    #[cfg(feature = "bigquery")]
    #[arg(long, env = "CLEAN_CDM_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

fn known_flags() -> BTreeSet<String> {
    let command = Cli::command();
    let mut flags: BTreeSet<String> = command
        .get_arguments()
        .filter_map(|arg| arg.get_long().map(str::to_string))
        .collect();
    flags.insert("help".to_string());
    flags
}

fn parse_value(raw: &str) -> serde_json::Value {
    if raw.trim_start().starts_with('[') {
        if let Ok(value) = serde_json::from_str(raw) {
            return value;
        }
    }
    serde_json::Value::String(raw.to_string())
}

/// Separates rule arguments from the flags clap knows about.
///
/// Every `--name value` or `--name=value` pair whose name is not a known
/// flag becomes a rule argument. The returned argv keeps the program name.
pub fn split_dynamic_args<I>(argv: I) -> Result<(Vec<String>, BTreeMap<String, serde_json::Value>), String>
where
    I: IntoIterator<Item = String>,
{
    let known = known_flags();
    let mut argv = argv.into_iter();
    let mut kept: Vec<String> = argv.next().into_iter().collect();
    let mut params = BTreeMap::new();

    while let Some(token) = argv.next() {
        let Some(flag) = token.strip_prefix("--") else {
            kept.push(token);
            continue;
        };
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag, None),
        };
        if name.is_empty() || known.contains(name) {
            kept.push(token.clone());
            continue;
        }

        let value = match inline {
            Some(value) => value,
            None => argv.next().ok_or_else(|| format!("argument --{name} needs a value"))?,
        };
        if params.insert(name.to_string(), parse_value(&value)).is_some() {
            return Err(format!("argument --{name} given more than once"));
        }
    }
    Ok((kept, params))
}
