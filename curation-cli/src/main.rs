//! `clean-cdm`: runs or lists the cleaning rules of one pipeline stage.

mod args;

use anyhow::{Context, Result};
use args::{split_dynamic_args, Cli};
use clap::Parser;
use curation::config::EngineConfig;
use curation::core::DataStage;
use curation::engine::{CleaningEngine, RunRequest};
use curation::observability::{init_logging, LoggingOptions};
use curation::registry::{RuleCatalog, StageRegistry};
use curation::report::{write_csv, write_json, ReportFormat, Reporter};
use curation::warehouse::WarehouseClient;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

const RULE_FAILURE_EXIT: u8 = 2;

fn main() -> ExitCode {
    let (argv, params) = match split_dynamic_args(std::env::args()) {
        Ok(split) => split,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let cli = Cli::parse_from(argv);

    match run(&cli, params) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, params: BTreeMap<String, serde_json::Value>) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config = config.with_log_level(level);
    }

    let mut logging = LoggingOptions {
        level: config.log_level.clone(),
        console: cli.console_log,
        json: cli.json_log,
        ..LoggingOptions::default()
    };
    if let Some(log_file) = &cli.log_file {
        logging.log_file.clone_from(log_file);
    }
    let _guard = init_logging(&logging)?;

    let stage: DataStage = cli.data_stage.parse()?;
    let registry = match &cli.registry {
        Some(path) => StageRegistry::from_manifest_path(RuleCatalog::builtin(), path)
            .with_context(|| format!("loading registry manifest {}", path.display()))?,
        None => StageRegistry::builtin()?,
    };
    let request = RunRequest::new(stage, &cli.project_id, &cli.dataset_id)
        .with_sandbox_dataset(cli.sandbox_dataset_id.clone())
        .with_table_namer(cli.table_namer.clone())
        .with_params(params);

    if cli.list_queries {
        list_queries(cli, &registry, &request)?;
        return Ok(ExitCode::SUCCESS);
    }

    let engine = CleaningEngine::new(registry, warehouse_client(cli, &config)?, config);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting the async runtime")?;
    let summary = runtime.block_on(engine.run_stage(&request))?;

    if let Some(path) = &cli.output {
        serde_json::to_writer_pretty(create(path)?, &summary)?;
    }
    eprintln!(
        "{}: {} rules attempted, {} succeeded, {} failed ({} unverified)",
        summary.stage, summary.attempted, summary.succeeded, summary.failed, summary.unverified
    );

    if summary.has_failures() && cli.fail_on_rule_failure {
        return Ok(ExitCode::from(RULE_FAILURE_EXIT));
    }
    Ok(ExitCode::SUCCESS)
}

fn list_queries(cli: &Cli, registry: &StageRegistry, request: &RunRequest) -> Result<()> {
    let rows = Reporter::new(registry)
        .with_ids(
            &request.args.project_id,
            &request.args.dataset_id,
            Some(request.args.sandbox_dataset_id.clone()),
        )
        .with_table_namer(request.args.table_namer.clone())
        .stage_rows(request.stage, &request.params)?;
    tracing::info!(stage = %request.stage, rows = rows.len(), "Listed stage queries");

    let writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(create(path)?),
        None => Box::new(std::io::stdout().lock()),
    };
    match cli.format {
        ReportFormat::Csv => {
            let columns: Vec<&str> = cli.columns.iter().map(String::as_str).collect();
            write_csv(&rows, &columns, writer)?;
        }
        ReportFormat::Json => write_json(&rows, writer)?,
    }
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

#[cfg(feature = "bigquery")]
fn warehouse_client(cli: &Cli, config: &EngineConfig) -> Result<Arc<dyn WarehouseClient>> {
    use curation::warehouse::BigQueryClient;

    let token = cli
        .access_token
        .clone()
        .context("--access_token (or CLEAN_CDM_ACCESS_TOKEN) is required to run rules")?;
    Ok(Arc::new(BigQueryClient::new(token, config.poll.socket_timeout())?))
}

#[cfg(not(feature = "bigquery"))]
fn warehouse_client(_cli: &Cli, _config: &EngineConfig) -> Result<Arc<dyn WarehouseClient>> {
    anyhow::bail!("clean-cdm was built without a warehouse client; rebuild with --features bigquery or use --list_queries")
}
