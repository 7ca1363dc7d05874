use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use coordination::{Orchestrator, SharedStore, Tier};
use enrich_agents::clients::Clients;
use enrich_agents::config::EnrichConfig;
use enrich_agents::import::load_targets;
use enrich_agents::processors::processor_set;
use enrich_agents::sinks::{JsonlResultSink, JsonlReviewSink};
use enrich_agents::telemetry::{append_telemetry, init_tracing, RunTelemetry};

#[derive(Parser)]
#[command(name = "enrich-agents")]
#[command(about = "Tiered bell-schedule enrichment campaigns")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "ENRICH_CONFIG")]
    config: Option<PathBuf>,

    /// Campaign state directory (overrides config)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Concurrent processor calls per free tier (overrides config)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add targets from a JSON or JSON-lines catalog and queue them at tier 1
    Import { file: PathBuf },
    /// Resume the campaign and drive it until idle
    Run {
        /// Import this catalog first, skipping ids already in the campaign
        #[arg(long)]
        targets: Option<PathBuf>,
        /// Run a single dequeue round per tier instead of draining
        #[arg(long)]
        once: bool,
        /// Restrict a single round to one tier (1-5)
        #[arg(long, requires = "once")]
        tier: Option<u8>,
    },
    /// Print campaign counts per tier and category
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print the attempt ledger of one target
    History { target_id: String },
}

impl Commands {
    /// Commands that only make sense against state that outlives the process
    fn needs_persistent_state(&self) -> bool {
        match self {
            Commands::Import { .. } | Commands::Status { .. } | Commands::History { .. } => true,
            Commands::Run { targets, .. } => targets.is_none(),
        }
    }
}

/// Refuse commands that would silently act on a throwaway in-memory store
fn check_state_mode(command: &Commands, persistent: bool) -> Result<()> {
    if !persistent && command.needs_persistent_state() {
        bail!(
            "Campaign state is in memory only (built without heavy-state); \
             use `run --targets <file>` or rebuild with `--features heavy-state`"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = EnrichConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(state) = cli.state {
        config.output.state_path = state;
    }
    if let Some(n) = cli.concurrency {
        config.orchestrator.concurrency = n;
    }

    check_state_mode(&cli.command, cfg!(feature = "heavy-state"))?;
    let orchestrator = build_orchestrator(&config)?;

    match cli.command {
        Commands::Import { file } => {
            let targets = load_targets(&file)
                .with_context(|| format!("Failed to load targets from {}", file.display()))?;
            let count = orchestrator.import(targets).context("Import rejected")?;
            println!("Imported {count} targets");
        }
        Commands::Run {
            targets,
            once,
            tier,
        } => {
            if let Some(file) = targets {
                import_new(&orchestrator, &file)?;
            }
            run(&orchestrator, &config, once, tier).await?;
        }
        Commands::Status { json } => {
            let status = orchestrator.status().context("Failed to read campaign status")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{status}");
            }
        }
        Commands::History { target_id } => {
            let store = orchestrator.store();
            if store.get_target(&target_id)?.is_none() {
                bail!("Unknown target: {target_id}");
            }
            for attempt in store.history(&target_id)? {
                println!("{}", serde_json::to_string(&attempt)?);
            }
            if let Some(entry) = store.entry(&target_id)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(())
}

fn open_store(config: &EnrichConfig) -> Result<SharedStore> {
    #[cfg(feature = "heavy-state")]
    {
        let store = coordination::RocksStore::open(&config.output.state_path).with_context(|| {
            format!(
                "Failed to open campaign state at {}",
                config.output.state_path.display()
            )
        })?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "heavy-state"))]
    {
        warn!(
            path = %config.output.state_path.display(),
            "Built without heavy-state; campaign state lives in memory for this process only"
        );
        Ok(Arc::new(coordination::MemoryStore::new()))
    }
}

fn build_orchestrator(config: &EnrichConfig) -> Result<Orchestrator> {
    let store = open_store(config)?;
    let clients =
        Clients::from_config(&config.collaborators).context("Failed to build collaborator clients")?;
    let processors = processor_set(&clients, &config.crawl);

    Ok(Orchestrator::new(
        store,
        processors,
        Arc::new(JsonlResultSink::new(&config.output.results_path)),
        Arc::new(JsonlReviewSink::new(&config.output.review_path)),
        config.orchestrator.clone(),
    )?)
}

/// Import only the catalog entries the campaign does not know yet
fn import_new(orchestrator: &Orchestrator, file: &Path) -> Result<()> {
    let targets = load_targets(file)
        .with_context(|| format!("Failed to load targets from {}", file.display()))?;
    let total = targets.len();
    let mut fresh = Vec::with_capacity(total);
    for target in targets {
        if orchestrator.store().get_target(&target.id)?.is_none() {
            fresh.push(target);
        }
    }
    let added = orchestrator.import(fresh)?;
    info!(added, skipped = total - added, "Catalog merged");
    Ok(())
}

async fn run(
    orchestrator: &Orchestrator,
    config: &EnrichConfig,
    once: bool,
    tier: Option<u8>,
) -> Result<()> {
    let started_at = Utc::now();
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight work");
            on_signal.cancel();
        }
    });

    let resumed = orchestrator.resume().await.context("Failed to resume campaign")?;

    let outcome = if once {
        let tiers = match tier {
            Some(n) => vec![Tier::from_number(n).with_context(|| format!("No tier {n}"))?],
            None => Tier::ALL.to_vec(),
        };
        let mut report = coordination::RunReport::default();
        let mut failure = None;
        for tier in tiers {
            match orchestrator.step_tier(tier, true, &cancel).await {
                Ok(step) => {
                    report.processed.insert(tier, step.processed);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        report.cancelled = cancel.is_cancelled();
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    } else {
        orchestrator.run_until_idle(cancel.clone()).await
    };

    let status = orchestrator.status().context("Failed to read campaign status")?;
    let telemetry = match &outcome {
        Ok(report) => RunTelemetry::new(started_at, report, resumed.reconciled, &status),
        Err(e) => RunTelemetry::new(started_at, &Default::default(), resumed.reconciled, &status)
            .with_error(e),
    };
    append_telemetry(&telemetry, &config.output.telemetry_path);

    let report = outcome.context("Campaign run halted")?;
    println!(
        "Processed {} targets{}",
        report.total_processed(),
        if report.cancelled { " (interrupted)" } else { "" }
    );
    print!("{status}");
    Ok(())
}
