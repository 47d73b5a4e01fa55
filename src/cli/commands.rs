//! CLI command definitions for volusphere.
//!
//! This module provides the command-line surface over the gateway and the
//! worker pool: project creation, job/experience inspection, the operator
//! actions publish/retry/cancel, and the long-running worker process.

use std::sync::Arc;

use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use crate::gateway::{Gateway, ProjectRequest};
use crate::manifest::ManifestWriter;
use crate::metrics;
use crate::pipeline::{
    PipelineConfig, SimulatedExecutor, Stage, WorkerPool, WorkerPoolConfig,
};
use crate::queue::{RedisWorkQueue, WorkQueue};
use crate::store::{Interpolation, JobStore, PostgresStore, Quality};

/// Default manifest output directory.
const DEFAULT_MANIFEST_DIR: &str = "./manifests";

/// Volumetric video processing pipeline.
#[derive(Parser)]
#[command(name = "volusphere")]
#[command(about = "Process volumetric captures into publishable XR experiences")]
#[command(version)]
#[command(
    long_about = "volusphere drives volumetric captures through a seven-stage processing pipeline\n(ingest, reconstruction, stabilization, interpolation, LOD baking, packaging, CDN publish)\nand manages the resulting experiences.\n\nExample usage:\n  volusphere worker --workers 4\n  volusphere create --title \"Neon Parkour Run\" --devices android_xr,quest"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Connection settings shared by every command.
#[derive(Parser, Debug)]
pub struct BackendArgs {
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,

    /// Logical queue name (Redis key prefix).
    #[arg(long, env = "VOLUSPHERE_QUEUE_NAME", default_value = "volusphere:work")]
    pub queue_name: String,

    /// Manifest output directory.
    #[arg(long, env = "VOLUSPHERE_MANIFEST_PATH", default_value = DEFAULT_MANIFEST_DIR)]
    pub manifest_path: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the worker pool until interrupted.
    Worker(WorkerArgs),

    /// Create a new volumetric project and start its pipeline.
    Create(CreateArgs),

    /// List all jobs, most recent first.
    Jobs(JobsArgs),

    /// Show one job, including per-stage progress and its event log.
    Job(JobArgs),

    /// List all experiences, most recent first.
    Experiences(ExperiencesArgs),

    /// Publish a job that finished the pipeline.
    Publish(PublishArgs),

    /// Retry a failed job from the stage it failed at.
    Retry(RetryArgs),

    /// Cancel a queued or processing job.
    Cancel(CancelArgs),

    /// Show work queue statistics.
    #[command(name = "queue-stats")]
    QueueStats(QueueStatsArgs),
}

/// Arguments for `volusphere worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Number of worker tasks.
    #[arg(short = 'w', long, env = "VOLUSPHERE_NUM_WORKERS", default_value = "4")]
    pub workers: usize,

    /// Delay between simulated progress steps, in milliseconds.
    #[arg(long, env = "VOLUSPHERE_STEP_DELAY_MS", default_value = "350")]
    pub step_delay_ms: u64,

    /// Progress increment per simulated step.
    #[arg(long, env = "VOLUSPHERE_STEP_SIZE", default_value = "20")]
    pub step_size: u8,

    /// Inject a failure at the named stage (staging/testing only).
    #[arg(long)]
    pub fail_at: Option<String>,
}

/// Arguments for `volusphere create`.
#[derive(Parser, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Experience title.
    #[arg(short = 't', long)]
    pub title: String,

    /// Experience description.
    #[arg(short = 'd', long, default_value = "")]
    pub description: String,

    /// Comma-separated discovery tags.
    #[arg(long)]
    pub tags: Option<String>,

    /// Comma-separated target devices.
    #[arg(long, default_value = "android_xr")]
    pub devices: String,

    /// Mark the experience mixed-reality ready.
    #[arg(long)]
    pub mr_ready: bool,

    /// Default playback quality (Base, High, Ultra).
    #[arg(short = 'q', long, default_value = "High")]
    pub quality: String,

    /// Default frame interpolation (Off, 120fps, 240fps).
    #[arg(short = 'i', long, default_value = "Off")]
    pub interpolation: String,

    /// Poster image location.
    #[arg(long, default_value = "")]
    pub poster: String,

    /// Trailer location.
    #[arg(long, default_value = "")]
    pub trailer: String,
}

/// Arguments for `volusphere jobs`.
#[derive(Parser, Debug)]
pub struct JobsArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `volusphere job`.
#[derive(Parser, Debug)]
pub struct JobArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Job id.
    pub id: Uuid,

    /// Output JSON instead of a summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `volusphere experiences`.
#[derive(Parser, Debug)]
pub struct ExperiencesArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `volusphere publish`.
#[derive(Parser, Debug)]
pub struct PublishArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Job id to publish.
    pub id: Uuid,

    /// Release notes stored on the experience.
    #[arg(short = 'n', long, default_value = "")]
    pub notes: String,
}

/// Arguments for `volusphere retry`.
#[derive(Parser, Debug)]
pub struct RetryArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Job id to retry.
    pub id: Uuid,
}

/// Arguments for `volusphere cancel`.
#[derive(Parser, Debug)]
pub struct CancelArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Job id to cancel.
    pub id: Uuid,
}

/// Arguments for `volusphere queue-stats`.
#[derive(Parser, Debug)]
pub struct QueueStatsArgs {
    #[command(flatten)]
    pub backend: BackendArgs,
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
///
/// This is the main entry point for the volusphere CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Worker(args) => run_worker_command(args).await?,
        Commands::Create(args) => run_create_command(args).await?,
        Commands::Jobs(args) => run_jobs_command(args).await?,
        Commands::Job(args) => run_job_command(args).await?,
        Commands::Experiences(args) => run_experiences_command(args).await?,
        Commands::Publish(args) => run_publish_command(args).await?,
        Commands::Retry(args) => run_retry_command(args).await?,
        Commands::Cancel(args) => run_cancel_command(args).await?,
        Commands::QueueStats(args) => run_queue_stats_command(args).await?,
    }
    Ok(())
}

/// Parses a unit enum from its wire-format string (e.g. "120fps", "Ultra").
fn parse_wire_enum<T: DeserializeOwned>(value: &str, what: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| anyhow::anyhow!("Invalid {}: '{}'", what, value))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn build_store(args: &BackendArgs) -> anyhow::Result<Arc<PostgresStore>> {
    let store = PostgresStore::connect(&args.database_url).await?;
    store.run_migrations().await?;
    Ok(Arc::new(store))
}

async fn build_queue(args: &BackendArgs) -> anyhow::Result<Arc<RedisWorkQueue>> {
    Ok(Arc::new(
        RedisWorkQueue::connect(&args.redis_url, &args.queue_name).await?,
    ))
}

async fn build_gateway(args: &BackendArgs) -> anyhow::Result<Gateway> {
    let store = build_store(args).await?;
    let queue = build_queue(args).await?;
    let manifests = ManifestWriter::new(args.manifest_path.clone())?;
    Ok(Gateway::new(store, queue, manifests))
}

// ============================================================================
// Worker Command Implementation
// ============================================================================

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    metrics::init_metrics()?;

    let config = PipelineConfig::default()
        .with_num_workers(args.workers)
        .with_queue_name(args.backend.queue_name.clone())
        .with_step_delay(std::time::Duration::from_millis(args.step_delay_ms))
        .with_step_size(args.step_size)
        .with_database_url(args.backend.database_url.clone())
        .with_redis_url(args.backend.redis_url.clone());
    config.validate()?;

    let store = build_store(&args.backend).await?;
    let queue = build_queue(&args.backend).await?;

    let mut executor = SimulatedExecutor::new()
        .with_step_delay(config.step_delay)
        .with_step_size(config.step_size);
    if let Some(stage) = &args.fail_at {
        let stage: Stage = parse_wire_enum(stage, "stage")?;
        executor = executor.with_failure_at(stage);
    }

    let pool_config = WorkerPoolConfig::new(config.num_workers)
        .with_poll_interval(config.poll_interval)
        .with_sweep_interval(config.sweep_interval)
        .with_shutdown_timeout(config.shutdown_timeout);

    let queue: Arc<dyn WorkQueue> = queue;
    let store: Arc<dyn JobStore> = store;
    let mut pool = WorkerPool::new(pool_config, queue, store, Arc::new(executor));

    pool.start().await?;
    info!(workers = args.workers, "Worker pool running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    pool.shutdown().await?;

    let stats = pool.stats();
    println!(
        "Processed {} stage executions ({} completed, {} failed), {} jobs finished the pipeline",
        stats.total_stages(),
        stats.stages_completed,
        stats.stages_failed,
        stats.jobs_completed
    );

    Ok(())
}

// ============================================================================
// Gateway Command Implementations
// ============================================================================

async fn run_create_command(args: CreateArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;

    let quality: Quality = parse_wire_enum(&args.quality, "quality")?;
    let interpolation: Interpolation = parse_wire_enum(&args.interpolation, "interpolation")?;

    let request = ProjectRequest::new(&args.title, &args.description)
        .with_tags(args.tags.as_deref().map(split_csv).unwrap_or_default())
        .with_devices(split_csv(&args.devices))
        .with_mr_ready(args.mr_ready)
        .with_quality(quality)
        .with_interpolation(interpolation)
        .with_poster_url(&args.poster)
        .with_trailer_url(&args.trailer);

    let (experience, job) = gateway.create_project(request).await?;

    println!("Created experience {} ({})", experience.id, experience.title);
    println!("Pipeline job {} queued at {}", job.id, job.current_stage);

    Ok(())
}

async fn run_jobs_command(args: JobsArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let jobs = gateway.list_jobs().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    for job in jobs {
        println!(
            "{}  {:<14}  {:<28}  {:>3}%  {}",
            job.id,
            job.status.to_string(),
            job.current_stage.to_string(),
            job.progress(job.current_stage),
            job.experience_title
        );
    }

    Ok(())
}

async fn run_job_command(args: JobArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let job = gateway.get_job(args.id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!("Job {} ({})", job.id, job.experience_title);
    println!("  Status: {}", job.status);
    println!("  Stage:  {}", job.current_stage);
    if let Some(eta) = &job.eta {
        println!("  ETA:    {}", eta);
    }
    println!("  Progress:");
    for (stage, percent) in &job.stage_progress {
        println!("    {:<28} {:>3}%", stage.to_string(), percent);
    }
    println!("  Log:");
    for line in &job.logs {
        println!("    {}", line);
    }

    Ok(())
}

async fn run_experiences_command(args: ExperiencesArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let experiences = gateway.list_experiences().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&experiences)?);
        return Ok(());
    }

    if experiences.is_empty() {
        println!("No experiences.");
        return Ok(());
    }

    for experience in experiences {
        println!(
            "{}  {:<10}  v{:<3}  {}",
            experience.id,
            format!("{:?}", experience.status),
            experience.version,
            experience.title
        );
    }

    Ok(())
}

async fn run_publish_command(args: PublishArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let experience = gateway.publish(args.id, args.notes).await?;

    println!(
        "Published {} as v{} ({})",
        experience.id, experience.version, experience.title
    );

    Ok(())
}

async fn run_retry_command(args: RetryArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let job = gateway.retry(args.id).await?;

    println!("Job {} re-queued at {}", job.id, job.current_stage);

    Ok(())
}

async fn run_cancel_command(args: CancelArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let job = gateway.cancel(args.id).await?;

    println!("Job {} cancelled at {}", job.id, job.current_stage);

    Ok(())
}

async fn run_queue_stats_command(args: QueueStatsArgs) -> anyhow::Result<()> {
    let gateway = build_gateway(&args.backend).await?;
    let stats = gateway.queue_stats().await?;

    println!("Ready:       {}", stats.ready);
    println!("In flight:   {}", stats.in_flight);
    println!("Dead letter: {}", stats.dead_letter);

    Ok(())
}
