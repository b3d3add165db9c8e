//! fluxguard CLI
//!
//! Repair and run model-written analysis snippets, and audit model-written
//! narratives against the data they describe.
//!
//! ## Commands
//!
//! - `repair`: run the repair pipeline on raw model output
//! - `exec`: repair a snippet and execute it in the sandbox
//! - `verify`: check a narrative against evidence rows
//! - `ask`: ask the model a question about a dataset
//! - `audit`: generate a narrative for a dataset and check it
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fluxguard_core::{repair, verify, Dataset, Narrative, RepairReport};
use fluxguard_runtime::{load_dataset, Runtime};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "fluxguard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Guard rails for LLM-written analysis code and narratives", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Runtime config file (YAML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair raw model output into a runnable snippet
    Repair {
        /// File with the raw output (default: stdin)
        input: Option<PathBuf>,
    },

    /// Repair a snippet and run it against a dataset
    Exec {
        /// Dataset as a JSON array of records
        #[arg(short, long)]
        data: PathBuf,

        /// File with the snippet (default: stdin)
        input: Option<PathBuf>,
    },

    /// Check a narrative against evidence rows
    Verify {
        /// Narrative as JSON `{summary, recommendations}`, or plain text
        #[arg(short, long)]
        narrative: PathBuf,

        /// Evidence as a JSON array of records
        #[arg(short, long)]
        evidence: PathBuf,
    },

    /// Ask the model a question about a dataset
    Ask {
        /// Dataset as a JSON array of records
        #[arg(short, long)]
        data: PathBuf,

        /// The question
        question: String,
    },

    /// Generate a narrative for a dataset and audit it
    Audit {
        /// Dataset as a JSON array of records
        #[arg(short, long)]
        data: PathBuf,

        /// Evidence rows (default: the first rows of the dataset)
        #[arg(short, long)]
        evidence: Option<PathBuf>,
    },
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
            .ok();
    }
}

/// Read `path`, or stdin when it is absent or `-`.
fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn read_dataset(path: &Path) -> Result<Dataset> {
    load_dataset(path).with_context(|| format!("Failed to load dataset {}", path.display()))
}

/// A JSON narrative, or the whole file as its summary.
fn read_narrative(path: &Path) -> Result<Narrative> {
    let text = read_input(Some(path))?;
    Ok(serde_json::from_str(&text).unwrap_or_else(|_| Narrative::new(text.trim())))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn repair_json(report: &RepairReport) -> serde_json::Value {
    json!({
        "state": report.final_state(),
        "validated": report.outcome.is_validated(),
        "code": report.outcome.text(),
        "trail": report.trail,
        "extraction": report.extraction,
        "findings": report.findings,
        "fallback": report.fallback,
        "parse_error": report.parse_error,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::WARN });

    let runtime = Runtime::load(cli.config.as_deref()).context("Failed to load config")?;
    debug!(config = ?cli.config, "runtime ready");

    let ok = match cli.command {
        Commands::Repair { input } => {
            let raw = read_input(input.as_deref())?;
            let report = repair(&raw);
            print_json(&repair_json(&report))?;
            report.outcome.is_validated()
        }

        Commands::Exec { data, input } => {
            let dataset = read_dataset(&data)?;
            let code = read_input(input.as_deref())?;
            let response = runtime.analyst().run_snippet(&code, "", &dataset, None).await;
            print_json(&response)?;
            response.is_success()
        }

        Commands::Verify {
            narrative,
            evidence,
        } => {
            let narrative = read_narrative(&narrative)?;
            let evidence = read_dataset(&evidence)?;
            let report = verify(&narrative, &evidence, &runtime.config().verifier);
            print_json(&report)?;
            true
        }

        Commands::Ask { data, question } => {
            let dataset = read_dataset(&data)?;
            let response = runtime.analyst().ask(&dataset, &question).await;
            print_json(&response)?;
            response.is_success()
        }

        Commands::Audit { data, evidence } => {
            let dataset = read_dataset(&data)?;
            let evidence = evidence.as_deref().map(read_dataset).transpose()?;
            let report = runtime.auditor().audit(&dataset, evidence.as_ref()).await;
            print_json(&report)?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
