//! fixport - security-fix backporting CLI
//!
//! ## Commands
//!
//! - `prejudge`: decide whether a mainline fix applies to a target tree
//! - `backport`: prejudge, synthesize and validate one project fix
//! - `batch`: prejudge (or fully process) every row of a CVE CSV file

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use config::ProjectConfig;
use fixport_core::{SimilarityOracle, SymbolOracle};
use fixport_oracle::{LlmOracle, OracleConfig};
use fixport_pipeline::{
    run_batch, BatchConfig, HarnessConfig, Pipeline, PipelineConfig, RunRecord, Sanitizer,
    WorkItem, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_POC_TIMEOUT_SECS,
};

#[derive(Parser)]
#[command(name = "fixport")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Backport security fixes: prejudge -> backport -> validate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    oracle: OracleArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OracleKind {
    /// Line-similarity thresholds only
    Similarity,
    /// OpenAI-compatible chat-completions endpoint
    Llm,
}

#[derive(Args)]
struct OracleArgs {
    /// Oracle consulted for ambiguous code-path matches
    #[arg(long, value_enum, default_value_t = OracleKind::Similarity, global = true)]
    oracle: OracleKind,

    /// Base URL of the completions endpoint
    #[arg(long, env = "FIXPORT_ORACLE_ENDPOINT", global = true)]
    oracle_endpoint: Option<String>,

    /// Model name sent to the endpoint
    #[arg(long, env = "FIXPORT_ORACLE_MODEL", global = true)]
    oracle_model: Option<String>,

    /// Bearer token for the endpoint
    #[arg(long, env = "FIXPORT_ORACLE_API_KEY", hide_env_values = true, global = true)]
    oracle_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether a mainline fix applies to a target tree
    Prejudge {
        /// Mainline git repository holding the fix
        #[arg(long)]
        mainline: PathBuf,

        /// Target source tree
        #[arg(long)]
        target: PathBuf,

        /// Fix commit hash
        commit: String,

        /// Diff base (default: the fix's first parent)
        #[arg(long)]
        parent: Option<String>,

        /// Target revision to judge, checked out into a scratch worktree
        /// (default: the working tree as it is)
        #[arg(long)]
        release: Option<String>,

        /// Build-configuration manifest (repeatable; default: discovered)
        #[arg(long = "manifest")]
        manifests: Vec<PathBuf>,

        /// Print the full JSON report instead of the verdict line
        #[arg(long)]
        report: bool,
    },

    /// Prejudge, synthesize and validate one project fix
    Backport {
        /// Per-project YAML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Write the synthesized patch here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after synthesis
        #[arg(long)]
        no_validate: bool,

        /// Build in a scratch copy instead of the project directory
        #[arg(long)]
        isolate: bool,

        /// Write the JSON run record here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Process a CSV file of CVE-ID,Mainline_Commit,Status rows
    Batch {
        /// Input CSV
        input: PathBuf,

        /// Output CSV (input columns + Prejudge_Result)
        output: PathBuf,

        /// Mainline git repository
        #[arg(long)]
        mainline: PathBuf,

        /// Default target tree (rows may override with Target_Dir)
        #[arg(long)]
        target: PathBuf,

        /// Rows processed at once
        #[arg(short = 'j', long, default_value = "1")]
        concurrency: usize,

        /// Synthesize patches for applicable rows
        #[arg(long)]
        full: bool,

        /// Scripts directory; enables validation (implies --full)
        #[arg(long)]
        scripts: Option<PathBuf>,

        /// Sanitizer whose signature decides validation
        #[arg(long)]
        sanitizer: Option<Sanitizer>,

        /// Diagnostic substring expected before the fix
        #[arg(long)]
        expected: Option<String>,

        /// Build timeout in seconds
        #[arg(long, default_value_t = DEFAULT_BUILD_TIMEOUT_SECS)]
        build_timeout: u64,

        /// Trigger timeout in seconds
        #[arg(long, default_value_t = DEFAULT_POC_TIMEOUT_SECS)]
        poc_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fixport_core::init_tracing(cli.json, level);

    let oracle = build_oracle(&cli.oracle)?;

    match cli.command {
        Commands::Prejudge {
            mainline,
            target,
            commit,
            parent,
            release,
            manifests,
            report,
        } => {
            let mut item = WorkItem::new(mainline, target, commit);
            item.parent = parent;
            let config = PipelineConfig {
                target_release: release,
                config_manifests: manifests,
                ..PipelineConfig::prejudge_only()
            };
            cmd_prejudge(oracle, config, &item, report).await
        }
        Commands::Backport {
            config,
            output,
            no_validate,
            isolate,
            report,
        } => {
            cmd_backport(
                oracle,
                &config,
                output.as_deref(),
                !no_validate,
                isolate,
                report.as_deref(),
            )
            .await
        }
        Commands::Batch {
            input,
            output,
            mainline,
            target,
            concurrency,
            full,
            scripts,
            sanitizer,
            expected,
            build_timeout,
            poc_timeout,
        } => {
            let harness = scripts.map(|dir| HarnessConfig {
                sanitizer,
                expected,
                build_timeout_secs: build_timeout,
                poc_timeout_secs: poc_timeout,
                // concurrent rows must not share a tree
                isolate: concurrency > 1,
                ..HarnessConfig::new(dir)
            });
            let config = batch_pipeline_config(full, harness);
            let batch = BatchConfig {
                mainline_dir: mainline,
                target_dir: target,
                concurrency,
            };
            cmd_batch(oracle, config, &batch, &input, &output).await
        }
    }
}

fn build_oracle(args: &OracleArgs) -> Result<Arc<dyn SymbolOracle>> {
    match args.oracle {
        OracleKind::Similarity => Ok(Arc::new(SimilarityOracle::default())),
        OracleKind::Llm => {
            let mut config = OracleConfig::from_env();
            if let Some(endpoint) = &args.oracle_endpoint {
                config.endpoint = endpoint.clone();
            }
            if let Some(model) = &args.oracle_model {
                config.model = model.clone();
            }
            if let Some(key) = &args.oracle_api_key {
                config.api_key = Some(key.clone());
            }
            info!(endpoint = %config.endpoint, model = %config.model, "using LLM oracle");
            let oracle = LlmOracle::new(config).context("Failed to set up LLM oracle")?;
            Ok(Arc::new(oracle))
        }
    }
}

fn batch_pipeline_config(full: bool, harness: Option<HarnessConfig>) -> PipelineConfig {
    match harness {
        Some(harness) => PipelineConfig::full().with_harness(harness),
        None if full => PipelineConfig::full(),
        None => PipelineConfig::prejudge_only(),
    }
}

async fn cmd_prejudge(
    oracle: Arc<dyn SymbolOracle>,
    config: PipelineConfig,
    item: &WorkItem,
    report: bool,
) -> Result<()> {
    let record = Pipeline::new(config, oracle)
        .run(item)
        .await
        .with_context(|| format!("Failed to prejudge {}", item.fix))?;

    if report {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", record.outcome.prejudge_result());
        for finding in record.outcome.findings() {
            info!("{finding}");
        }
    }
    Ok(())
}

async fn cmd_backport(
    oracle: Arc<dyn SymbolOracle>,
    config_path: &Path,
    output: Option<&Path>,
    validate: bool,
    isolate: bool,
    report: Option<&Path>,
) -> Result<()> {
    let project = ProjectConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!(
        project = %project.project,
        fix = %project.new_patch,
        release = %project.target_release,
        tag = ?project.tag,
        url = ?project.project_url,
        "backporting"
    );

    let mut config = PipelineConfig {
        target_release: Some(project.target_release.clone()),
        config_manifests: project.config_manifests.clone(),
        ..PipelineConfig::full()
    };
    if validate {
        config = config.with_harness(project.harness(isolate)?);
    }

    let mut item = WorkItem::new(project.mainline_dir(), &project.project_dir, &project.new_patch);
    item.parent = project.new_patch_parent.clone();

    let record = Pipeline::new(config, oracle)
        .run(&item)
        .await
        .with_context(|| format!("Failed to backport {}", project.new_patch))?;

    if let Some(path) = output {
        write_patch(&record, path)?;
    }
    if let Some(path) = report {
        std::fs::write(path, serde_json::to_string_pretty(&record)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    println!("{}", record.outcome.prejudge_result());
    for finding in record.outcome.findings() {
        info!("{finding}");
    }
    Ok(())
}

fn write_patch(record: &RunRecord, path: &Path) -> Result<()> {
    match &record.patch_diff {
        Some(diff) => {
            std::fs::write(path, diff)
                .with_context(|| format!("Failed to write patch to {}", path.display()))?;
            info!(path = %path.display(), "patch written");
        }
        None => info!("no patch to write"),
    }
    Ok(())
}

async fn cmd_batch(
    oracle: Arc<dyn SymbolOracle>,
    config: PipelineConfig,
    batch: &BatchConfig,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let reader = File::open(input)
        .with_context(|| format!("Failed to open input CSV: {}", input.display()))?;
    let writer = File::create(output)
        .with_context(|| format!("Failed to create output CSV: {}", output.display()))?;

    let pipeline = Pipeline::new(config, oracle);
    let summary = run_batch(&pipeline, batch, BufReader::new(reader), BufWriter::new(writer))
        .await
        .context("Batch failed")?;

    println!(
        "{} rows: {} applicable, {} not applicable, {} errors",
        summary.rows, summary.applicable, summary.not_applicable, summary.errors
    );
    println!("Results written to {}", output.display());
    Ok(())
}
