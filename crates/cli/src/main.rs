//! `flowmend` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — validate one or more workflow JSON files.
//! - `repair`   — repair a workflow and write the corrected JSON.
//! - `catalog`  — print the active node catalog.
//!
//! Logs go to stderr (filtered by `RUST_LOG`) so stdout stays parseable.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::{ValidationReport, ValidatorConfig, Workflow, WorkflowValidator};
use nodes::NodeCatalog;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "flowmend",
    about = "Validate and repair automation workflow graphs",
    version
)]
struct Cli {
    /// Node catalog JSON to use instead of the built-in catalog.
    #[arg(long, global = true, env = "FLOWMEND_CATALOG")]
    catalog: Option<PathBuf>,

    /// Also report nodes on primary-channel cycles.
    #[arg(long, global = true)]
    detect_cycles: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate workflow JSON files. Exits with 1 if any is not executable.
    Validate {
        /// Paths to workflow JSON files.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Print the reports as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Repair a workflow. The change log goes to stderr.
    Repair {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Report JSON (`{"issues": [...]}`) to repair from instead of a fresh validation.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Where to write the repaired workflow; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print the active node catalog as JSON.
    Catalog,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let validator = Arc::new(load_validator(cli.catalog.as_deref(), cli.detect_cycles).await?);

    match cli.command {
        Command::Validate { paths, json } => validate_files(validator, paths, json).await,
        Command::Repair { path, report, output } => {
            repair_file(&validator, &path, report.as_deref(), output.as_deref()).await
        }
        Command::Catalog => {
            println!("{}", validator.catalog().to_json_pretty()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn load_validator(catalog: Option<&Path>, detect_cycles: bool) -> Result<WorkflowValidator> {
    let catalog = match catalog {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read catalog {}", path.display()))?;
            let catalog = NodeCatalog::from_json(&text)
                .with_context(|| format!("invalid catalog {}", path.display()))?;
            info!(kinds = catalog.kinds().len(), "loaded catalog from {}", path.display());
            Arc::new(catalog)
        }
        None => nodes::builtin::catalog(),
    };
    let config = ValidatorConfig { detect_cycles, ..ValidatorConfig::default() };
    Ok(WorkflowValidator::new(catalog, config))
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

async fn validate_files(
    validator: Arc<WorkflowValidator>,
    paths: Vec<PathBuf>,
    json: bool,
) -> Result<ExitCode> {
    let mut tasks = JoinSet::new();
    for (index, path) in paths.into_iter().enumerate() {
        let validator = Arc::clone(&validator);
        tasks.spawn(async move {
            let outcome = check_file(validator, &path).await;
            (index, path, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.context("validation task failed")?);
    }
    results.sort_by_key(|(index, ..)| *index);

    let failed = results
        .iter()
        .filter(|(_, _, outcome)| !outcome.as_ref().is_ok_and(ValidationReport::is_executable))
        .count();

    if json {
        let documents: Vec<serde_json::Value> = results
            .iter()
            .map(|(_, path, outcome)| match outcome {
                Ok(report) => json!({ "file": path.display().to_string(), "report": report }),
                Err(e) => json!({ "file": path.display().to_string(), "error": format!("{e:#}") }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&documents)?);
    } else {
        for (_, path, outcome) in &results {
            match outcome {
                Ok(report) => println!("{}: {report}", path.display()),
                Err(e) => println!("{}: error: {e:#}", path.display()),
            }
        }
    }

    debug!(files = results.len(), failed, "validate finished");
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn check_file(validator: Arc<WorkflowValidator>, path: &Path) -> Result<ValidationReport> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let report = tokio::task::spawn_blocking(move || {
        let workflow = Workflow::from_json(&text)?;
        validator.validate(&workflow)
    })
    .await
    .context("validation task panicked")??;
    Ok(report)
}

// ---------------------------------------------------------------------------
// repair
// ---------------------------------------------------------------------------

async fn repair_file(
    validator: &WorkflowValidator,
    path: &Path,
    report: Option<&Path>,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let workflow = Workflow::from_json(&text).with_context(|| format!("in {}", path.display()))?;

    let report = match report {
        Some(report_path) => {
            let text = tokio::fs::read_to_string(report_path)
                .await
                .with_context(|| format!("cannot read report {}", report_path.display()))?;
            serde_json::from_str::<ValidationReport>(&text)
                .with_context(|| format!("invalid report {}", report_path.display()))?
        }
        None => validator.validate(&workflow)?,
    };

    let repaired = validator.repair(&workflow, &report)?;
    if repaired.change_log.is_empty() {
        eprintln!("no changes");
    }
    for entry in &repaired.change_log {
        eprintln!("- {entry}");
    }

    let rendered = repaired.workflow.to_json_pretty()?;
    match output {
        Some(out) => tokio::fs::write(out, format!("{rendered}\n"))
            .await
            .with_context(|| format!("cannot write {}", out.display()))?,
        None => println!("{rendered}"),
    }

    let remaining = validator.validate(&repaired.workflow)?;
    if !remaining.is_executable() {
        eprintln!("still not executable:\n{remaining}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
