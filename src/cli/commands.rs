//! CLI command definitions for newsreel.
//!
//! This module wires configuration, the item store and the HTTP
//! collaborators together and exposes the pipeline as subcommands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::{info, warn};
use uuid::Uuid;

use crate::item::Stage;
use crate::metrics;
use crate::pipeline::{
    resolve_publish, CycleReport, Orchestrator, PipelineConfig, PublishResolution, Scheduler,
};
use crate::services::{
    FsStorage, HttpMediaService, HttpPublisher, HttpScraper, LlmParaphraser, Services,
};
use crate::store::{summarize, SqliteItemStore};

/// Resumable news-to-video pipeline.
#[derive(Parser)]
#[command(name = "newsreel")]
#[command(about = "Turn scraped news articles into published short videos")]
#[command(version)]
#[command(
    long_about = "newsreel scrapes news articles, paraphrases them, generates images and narration, renders a video and publishes it.\n\nEvery stage is recorded per item, so an interrupted run resumes where it stopped.\n\nExample usage:\n  newsreel run --interval-secs 7200\n  newsreel once --stage images\n  newsreel status --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database path. Overrides NEWSREEL_DATABASE_URL from the configuration.
    #[arg(long, env = "NEWSREEL_DATABASE_URL", global = true)]
    pub database: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the pipeline on a schedule until interrupted.
    Run(RunArgs),

    /// Run a single cycle, or a single stage, and print what happened.
    Once(OnceArgs),

    /// Settle an item whose publish outcome could not be confirmed.
    Resolve(ResolveArgs),

    /// Show how many items wait at each stage.
    Status(StatusArgs),
}

/// Arguments for `newsreel run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Wait for the first interval instead of running a cycle at startup.
    #[arg(long)]
    pub no_initial_run: bool,

    /// Seconds between cycles (defaults to the configured interval).
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Periodically write Prometheus metrics to this file.
    #[arg(long, env = "NEWSREEL_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,
}

/// Arguments for `newsreel once`.
#[derive(Parser, Debug)]
pub struct OnceArgs {
    /// Run only this stage (scrape, prompts, images, audio, video, publish).
    #[arg(short, long)]
    pub stage: Option<Stage>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Print the cycle report as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `newsreel resolve`.
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("resolution").required(true).args(["posted", "retry"])))]
pub struct ResolveArgs {
    /// Id of the held item.
    pub id: Uuid,

    /// The video was posted: mark the item published and delete its media.
    #[arg(long)]
    pub posted: bool,

    /// The video was not posted: publish it again on the next cycle.
    #[arg(long)]
    pub retry: bool,
}

impl ResolveArgs {
    pub fn resolution(&self) -> PublishResolution {
        if self.posted {
            PublishResolution::Posted
        } else {
            PublishResolution::Retry
        }
    }
}

/// Arguments for `newsreel status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print the summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env().context("invalid configuration")?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }

    match cli.command {
        Commands::Run(args) => run_daemon(config, args).await,
        Commands::Once(args) => run_once(config, args).await,
        Commands::Resolve(args) => run_resolve(config, args).await,
        Commands::Status(args) => run_status(config, args).await,
    }
}

async fn open_store(config: &PipelineConfig) -> anyhow::Result<Arc<SqliteItemStore>> {
    let store = SqliteItemStore::open(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    Ok(Arc::new(store))
}

/// Build every collaborator from environment variables.
fn build_services(config: &PipelineConfig) -> anyhow::Result<Services> {
    let paraphraser = LlmParaphraser::from_env(config.generation_timeout)?
        .with_prompt_count(config.expected_prompts);
    info!(model = %paraphraser.model(), "Paraphrase model configured");

    Ok(Services {
        scraper: Arc::new(HttpScraper::from_env(config.fetch_timeout)?),
        paraphraser: Arc::new(paraphraser),
        images: Arc::new(HttpMediaService::from_env(
            "NEWSREEL_IMAGE_URL",
            config.generation_timeout,
        )?),
        audio: Arc::new(HttpMediaService::from_env(
            "NEWSREEL_AUDIO_URL",
            config.generation_timeout,
        )?),
        video: Arc::new(HttpMediaService::from_env(
            "NEWSREEL_VIDEO_URL",
            config.generation_timeout,
        )?),
        storage: Arc::new(FsStorage::new(config.media_root.clone())),
        publisher: Arc::new(HttpPublisher::from_env(config.generation_timeout)?),
    })
}

async fn build_orchestrator(config: PipelineConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let store = open_store(&config).await?;
    let services = build_services(&config)?;
    Ok(Arc::new(Orchestrator::new(store, services, config)))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// How often `run --metrics-file` rewrites the metrics file.
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

async fn run_daemon(config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    metrics::init_metrics().context("failed to initialize metrics")?;

    let orchestrator = build_orchestrator(config).await?;
    let mut scheduler = Scheduler::new(orchestrator);
    if let Some(secs) = args.interval_secs {
        anyhow::ensure!(secs > 0, "--interval-secs must be greater than 0");
        scheduler = scheduler.with_cycle_interval(Duration::from_secs(secs));
    }
    if args.no_initial_run {
        scheduler = scheduler.with_run_on_start(false);
    }
    let exporter = args.metrics_file.map(|path| {
        info!(path = %path.display(), "Exporting metrics to file");
        (tokio::spawn(export_metrics(path.clone())), path)
    });

    scheduler
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Failed to listen for Ctrl-C, stopping");
            }
        })
        .await;

    if let Some((exporter, path)) = exporter {
        exporter.abort();
        metrics::write_textfile(&path)
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    Ok(())
}

async fn export_metrics(path: PathBuf) {
    let mut ticker = tokio::time::interval(METRICS_EXPORT_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(err) = metrics::write_textfile(&path).await {
            warn!(path = %path.display(), error = %err, "Failed to write metrics file");
        }
    }
}

async fn run_once(config: PipelineConfig, args: OnceArgs) -> anyhow::Result<()> {
    if args.metrics {
        metrics::init_metrics().context("failed to initialize metrics")?;
    }

    let orchestrator = build_orchestrator(config).await?;
    let report = match args.stage {
        Some(stage) => orchestrator.run_stages(&[stage]).await,
        None => orchestrator.run_cycle().await,
    };
    let report = report.context("a cycle is already running")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if args.metrics {
        print!("{}", metrics::gather_text()?);
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!(
        "Cycle started {} ({:.1}s)",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.duration.as_secs_f64()
    );
    if let Some(scraped) = &report.scraped {
        println!(
            "  {:<8} fetched {}, created {}, duplicates {}, rejected {}",
            Stage::Scraped.as_str(),
            scraped.fetched,
            scraped.created,
            scraped.duplicates,
            scraped.rejected
        );
        if let Some(error) = &scraped.error {
            println!("           error: {}", error);
        }
    }
    for stage in &report.stages {
        println!(
            "  {:<8} {} succeeded, {} failed, {} skipped",
            stage.stage.as_str(),
            stage.succeeded(),
            stage.failed(),
            stage.skipped()
        );
        if let Some(error) = &stage.fatal_error {
            println!("           aborted: {}", error);
        }
        for outcome in stage.outcomes.iter().filter(|o| !o.success) {
            println!(
                "           {} {}",
                outcome.item_id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

async fn run_resolve(config: PipelineConfig, args: ResolveArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let storage = FsStorage::new(config.media_root.clone());
    let resolution = args.resolution();
    resolve_publish(store.as_ref(), &storage, args.id, resolution)
        .await
        .with_context(|| format!("failed to resolve item {}", args.id))?;
    match resolution {
        PublishResolution::Posted => println!("{} marked as published", args.id),
        PublishResolution::Retry => println!("{} will be published on the next cycle", args.id),
    }
    Ok(())
}

async fn run_status(config: PipelineConfig, args: StatusArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let summary = summarize(store.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Items: {}", summary.total);
    println!("Furthest stage reached:");
    for (stage, count) in &summary.by_stage {
        println!("  {:<14} {}", stage.as_str(), count);
    }
    println!("Eligible:");
    for (predicate, count) in &summary.eligible {
        println!("  {:<14} {}", predicate, count);
    }
    println!("With errors: {}", summary.failing);
    println!("Held:        {}", summary.held);
    Ok(())
}
