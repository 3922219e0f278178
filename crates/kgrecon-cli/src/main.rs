//! kgrecon CLI
//!
//! Command-line front end for:
//! - Reconciling a batch of cell values against the candidate index and reranker
//! - Browsing offloaded evidence and judgment facets in the sidecar store
//! - Logging human corrections
//! - Running the scrutinizer gate over resolved records before export

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use kgrecon_funnel::{
    BatchExecutor, FunnelController, OffloadPolicy, ReconConfig, ReconciliationService, RerankerClient,
    ServiceError, TaggerClient,
};
use kgrecon_model::{Cell, Judgment};
use kgrecon_qa::{ExportPolicy, QaConfig, QaWarning, ResolvedRecord, ScrutinizerGate, Severity};
use kgrecon_sidecar::{CorrectionEntry, SidecarOffloadManager, SidecarStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_BLOCKED: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "kgrecon")]
#[command(author, version, about = "kgrecon: knowledge-graph cell reconciliation")]
struct Cli {
    /// Sidecar evidence database.
    #[arg(long, global = true, env = "KGRECON_DB", default_value = "kgrecon.db")]
    db: PathBuf,

    /// JSON reconciliation config; falls back to `KGRECON_*` environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a JSON array of `{row, value, context}` entries.
    Reconcile {
        input: PathBuf,
        #[arg(long, default_value = "default")]
        dataset: String,
        /// Keep evidence in memory and write it only after the gate passes.
        #[arg(long)]
        deferred: bool,
        /// Run the scrutinizer gate over the resolved rows.
        #[arg(long)]
        gate: bool,
        /// With `--gate`, also block on Error-severity warnings.
        #[arg(long)]
        strict: bool,
    },

    /// Print offloaded evidence rows `[start, start + limit)` as JSON.
    Evidence {
        dataset: String,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },

    /// Row counts per judgment.
    Facets { dataset: String },

    /// Log a human correction to the feedback table.
    Correct {
        dataset: String,
        #[arg(long)]
        surface_form: String,
        #[arg(long)]
        accepted: String,
        #[arg(long)]
        rejected: Option<String>,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long)]
        comment: Option<String>,
        /// Context tokens around the cell (repeatable).
        #[arg(long = "context")]
        context: Vec<String>,
    },

    /// List logged corrections as JSON.
    Corrections { dataset: String },

    /// Run the scrutinizer gate over a JSON array of resolved records.
    Qa {
        input: PathBuf,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        qa_config: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    row: u64,
    value: String,
    #[serde(default)]
    context: Vec<String>,
}

enum Outcome {
    Done,
    Blocked,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = if cli.command.needs_store() {
        let store = SidecarStore::open(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?;
        Some(Arc::new(store))
    } else {
        None
    };

    let result = tokio::select! {
        result = run(&cli, store.clone()) => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; closing sidecar store");
            Ok(None)
        }
    };

    if let Some(store) = store {
        store.close().context("closing sidecar store")?;
    }

    Ok(match result? {
        Some(Outcome::Done) => ExitCode::SUCCESS,
        Some(Outcome::Blocked) => ExitCode::from(EXIT_BLOCKED),
        None => ExitCode::from(EXIT_INTERRUPTED),
    })
}

impl Commands {
    fn needs_store(&self) -> bool {
        !matches!(self, Commands::Qa { .. })
    }
}

async fn run(cli: &Cli, store: Option<Arc<SidecarStore>>) -> Result<Outcome> {
    let manager = store.map(SidecarOffloadManager::new);
    let sidecar = || manager.clone().context("sidecar store not opened");

    match &cli.command {
        Commands::Reconcile {
            input,
            dataset,
            deferred,
            gate,
            strict,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let policy = if *deferred {
                OffloadPolicy::Deferred
            } else {
                OffloadPolicy::Immediate
            };
            let service = build_service(config, sidecar()?)?.with_policy(policy);
            let gate = gate.then_some(ExportPolicy { strict: *strict });
            cmd_reconcile(&service, input, dataset, gate).await
        }
        Commands::Evidence { dataset, start, limit } => {
            let rows = sidecar()?.fetch_range(dataset, *start, *limit).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(Outcome::Done)
        }
        Commands::Facets { dataset } => {
            for (judgment, count) in sidecar()?.judgment_counts(dataset).await? {
                println!("{:>10}  {}", judgment_label(judgment), count);
            }
            Ok(Outcome::Done)
        }
        Commands::Correct {
            dataset,
            surface_form,
            accepted,
            rejected,
            score,
            comment,
            context,
        } => {
            let entry = CorrectionEntry {
                surface_form: surface_form.clone(),
                context_window: context.clone(),
                rejected_id: rejected.clone(),
                accepted_id: accepted.clone(),
                consensus_score: *score,
                comment: comment.clone(),
            };
            let id = sidecar()?.log_correction(dataset, entry).await?;
            println!("{} correction {}", "logged".green().bold(), id.to_string().bold());
            Ok(Outcome::Done)
        }
        Commands::Corrections { dataset } => {
            let corrections = sidecar()?.corrections(dataset).await?;
            println!("{}", serde_json::to_string_pretty(&corrections)?);
            Ok(Outcome::Done)
        }
        Commands::Qa {
            input,
            strict,
            qa_config,
        } => {
            let records: Vec<ResolvedRecord> = read_json(input)?;
            let warnings = run_gate(qa_config.as_deref(), &records)?;
            Ok(report_gate(&warnings, ExportPolicy { strict: *strict }))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ReconConfig> {
    let config = match path {
        Some(path) => ReconConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => ReconConfig::from_env().context("reading KGRECON_* environment")?,
    };
    config.validate()?;
    Ok(config)
}

fn build_service(config: ReconConfig, sidecar: SidecarOffloadManager) -> Result<ReconciliationService> {
    let source = TaggerClient::new(&config.candidate_url, config.candidate_timeout(), config.tag_limit)
        .context("building candidate index client")?;
    let reranker = RerankerClient::new(&config.reranker_url, config.rerank_timeout())
        .context("building reranker client")?;
    info!(
        candidate_url = %config.candidate_url,
        reranker_url = %config.reranker_url,
        rerank_concurrency = config.rerank_concurrency,
        "reconciliation service ready"
    );
    let funnel = FunnelController::new(Arc::new(source), Arc::new(reranker), config);
    Ok(ReconciliationService::new(BatchExecutor::new(funnel), sidecar))
}

async fn cmd_reconcile(
    service: &ReconciliationService,
    input: &Path,
    dataset: &str,
    gate: Option<ExportPolicy>,
) -> Result<Outcome> {
    let rows: Vec<InputRow> = read_json(input)?;
    println!("{} {} rows from {}", "Reconciling".green().bold(), rows.len(), input.display());

    let row_indices: Vec<u64> = rows.iter().map(|r| r.row).collect();
    let contexts: Vec<Vec<String>> = rows.iter().map(|r| r.context.clone()).collect();
    let mut cells: Vec<Cell> = rows.into_iter().map(|r| Cell::new(r.value)).collect();

    let report = match service.reconcile(dataset, &mut cells, &row_indices, &contexts).await {
        Ok(report) => report,
        Err(ServiceError::Persistence {
            report,
            attempts,
            source,
            ..
        }) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            anyhow::bail!("evidence for `{dataset}` not persisted after {attempts} attempts: {source}");
        }
        Err(err) => return Err(err.into()),
    };

    for (row, cell) in row_indices.iter().zip(&cells) {
        let matched = cell
            .recon
            .as_ref()
            .and_then(|r| r.match_candidate.as_ref())
            .map(|c| c.id.as_str())
            .unwrap_or("-");
        println!(
            "  {} {:>6}  {:<32} {:>9} {}",
            "→".yellow(),
            row,
            cell.raw_value(),
            judgment_label(cell.judgment()),
            matched
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    let outcome = match gate {
        Some(policy) => {
            let records: Vec<ResolvedRecord> = row_indices
                .iter()
                .zip(&cells)
                .map(|(row, cell)| ResolvedRecord::from_cell(*row, cell))
                .collect();
            let warnings = run_gate(None, &records)?;
            report_gate(&warnings, policy)
        }
        None => Outcome::Done,
    };

    if service.policy() == OffloadPolicy::Deferred {
        if matches!(outcome, Outcome::Blocked) {
            warn!(dataset, "export blocked; deferred evidence discarded");
        } else {
            let written = service.commit_evidence(dataset, &mut cells, &row_indices, &report).await?;
            println!("{} {} evidence rows", "committed".green().bold(), written);
        }
    }
    Ok(outcome)
}

fn run_gate(qa_config: Option<&Path>, records: &[ResolvedRecord]) -> Result<Vec<QaWarning>> {
    let config = match qa_config {
        Some(path) => QaConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => QaConfig::default(),
    };
    let gate = ScrutinizerGate::with_default_rules(&config)?;
    Ok(gate.validate(records)?)
}

fn report_gate(warnings: &[QaWarning], policy: ExportPolicy) -> Outcome {
    if warnings.is_empty() {
        println!("{} no QA warnings", "ok".green().bold());
        return Outcome::Done;
    }
    for w in warnings {
        let severity = match w.severity {
            Severity::Warning => w.severity.to_string().yellow(),
            Severity::Error => w.severity.to_string().red(),
            Severity::Critical => w.severity.to_string().red().bold(),
        };
        println!(
            "  {:>8}  {} ×{}  {}",
            severity,
            w.kind.bold(),
            w.count,
            w.sender.as_deref().unwrap_or("")
        );
    }
    if policy.blocks(warnings) {
        println!("{} export blocked", "blocked".red().bold());
        Outcome::Blocked
    } else {
        println!("{} export allowed with warnings", "ok".green().bold());
        Outcome::Done
    }
}

fn judgment_label(judgment: Judgment) -> colored::ColoredString {
    match judgment {
        Judgment::Matched => judgment.as_str().green(),
        Judgment::Ambiguous => judgment.as_str().yellow(),
        Judgment::New => judgment.as_str().cyan(),
        Judgment::None => judgment.as_str().dimmed(),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
