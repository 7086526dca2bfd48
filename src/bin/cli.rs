//! Realty ingest CLI
//!
//! Local entry point: enqueue jobs, run the scheduler, inspect state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use realty_ingest::{
    config,
    error::{AppError, Result},
    models::{Config, JobKind, JobStatus, TargetRef, TrackedEntity},
    scheduler::{self, EnqueueRequest, JobQueue, RecurringTriggers},
    services::{BrowserEngine, SourceRegistry, UnavailableBrowser},
    storage::{LocalStore, RecordStore, Store},
    utils::log as cli_log,
};
use uuid::Uuid;

/// Realty ingest - assessor and brokerage scraping pipeline
#[derive(Parser, Debug)]
#[command(
    name = "realty-ingest",
    version,
    about = "Scrapes real-estate sources into validated records"
)]
struct Cli {
    /// Path to storage directory containing config files and the store
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enqueue a scrape job
    Enqueue {
        /// Job kind (tax-assessment, property-listing, market-research, comparable-sale, market-data)
        #[arg(long)]
        kind: JobKind,

        #[arg(long, conflicts_with_all = ["url", "entity"])]
        postal_code: Option<String>,

        #[arg(long, conflicts_with = "entity")]
        url: Option<String>,

        /// Tracked entity id
        #[arg(long)]
        entity: Option<String>,

        /// Lower runs sooner
        #[arg(long)]
        priority: Option<i32>,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Use this source instead of resolving one
        #[arg(long)]
        source: Option<String>,
    },

    /// Track an entity for periodic refresh
    Track {
        id: String,

        /// Job kind that refreshes it
        #[arg(long)]
        kind: JobKind,

        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        city: Option<String>,

        #[arg(long)]
        region: Option<String>,

        #[arg(long)]
        postal_code: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        source: Option<String>,
    },

    /// Run the scheduler with recurring triggers
    Run {
        /// Process what is dispatchable now, then exit
        #[arg(long)]
        once: bool,
    },

    /// Show one job
    Status { job_id: Uuid },

    /// List recent jobs
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Enqueue refresh jobs for stale entities
    Stale {
        #[arg(long)]
        max: Option<usize>,
    },

    /// Cancel a pending job
    Cancel { job_id: Uuid },

    /// Delete finished jobs older than N days
    Cleanup {
        #[arg(long)]
        days: Option<i64>,
    },

    /// Show registered sources and their health
    Sources,

    /// Show quality report history
    Report {
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Validate configuration files
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn target(
    postal_code: Option<String>,
    url: Option<String>,
    entity: Option<String>,
) -> Result<TargetRef> {
    match (postal_code, url, entity) {
        (Some(code), None, None) => Ok(TargetRef::PostalCode(code)),
        (None, Some(url), None) => Ok(TargetRef::Url(url)),
        (None, None, Some(id)) => Ok(TargetRef::Entity(id)),
        _ => Err(AppError::validation(
            "exactly one of --postal-code, --url or --entity is required",
        )),
    }
}

async fn browser_engine(config: &Config) -> Arc<dyn BrowserEngine> {
    #[cfg(feature = "browser")]
    match realty_ingest::services::ChromiumEngine::launch(&config.scraper).await {
        Ok(engine) => return Arc::new(engine),
        Err(e) => log::warn!("Chromium unavailable, interactive sources will fail: {}", e),
    }
    #[cfg(not(feature = "browser"))]
    let _ = config;
    Arc::new(UnavailableBrowser::new("no browser engine available"))
}

async fn open_store(dir: &Path) -> Result<Arc<LocalStore>> {
    Ok(Arc::new(LocalStore::open(dir).await?))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, registry) = match config::load_all(&cli.storage_dir) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logging(cli.verbose, "info");
            log::error!("Configuration invalid: {}", e);
            return Err(e);
        }
    };
    init_logging(cli.verbose, &config.logging.level);
    log::debug!("Loaded configuration from {}", cli.storage_dir.display());

    let registry = Arc::new(registry);
    let store = open_store(&cli.storage_dir).await?;
    let job_store: Arc<dyn Store> = store.clone();
    let queue = JobQueue::new(job_store, Arc::clone(&registry), config.scheduler.clone());

    match cli.command {
        Command::Enqueue {
            kind,
            postal_code,
            url,
            entity,
            priority,
            max_retries,
            source,
        } => {
            let mut request = EnqueueRequest::new(kind, target(postal_code, url, entity)?);
            request.priority = priority;
            request.max_retries = max_retries;
            request.source_id = source;
            let id = queue.enqueue_with(request).await?;
            println!("{id}");
        }

        Command::Track {
            id,
            kind,
            address,
            city,
            region,
            postal_code,
            url,
            source,
        } => {
            let mut entity = TrackedEntity::new(id, kind.entity_type());
            entity.address = address;
            entity.city = city;
            entity.region = region;
            entity.postal_code = postal_code;
            entity.url = url;
            entity.source_id = source;
            if registry.resolve_entity(&entity).is_none() {
                log::warn!("No compatible source for entity {} yet", entity.id);
            }
            queue.track(&entity).await?;
            log::info!("Tracking {}", entity.id);
        }

        Command::Run { once } => {
            let engine = browser_engine(&config).await;
            let scheduler = scheduler::build(&config, Arc::clone(&registry), store, engine)?;

            if once {
                cli_log::header("Draining queue");
                let summary = scheduler.drain().await?;
                cli_log::summary(
                    "Run",
                    &[
                        ("completed", summary.completed.to_string()),
                        ("retrying", summary.retried.to_string()),
                        ("failed", summary.failed.to_string()),
                        ("errors", summary.errors.to_string()),
                    ],
                );
            } else {
                cli_log::header("Scheduler running (Ctrl-C to stop)");
                let triggers = RecurringTriggers::new(queue.clone(), &config.scheduler)?;
                let shutdown = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("Signal handler failed: {}", e);
                    }
                };
                let (tx, rx) = tokio::sync::watch::channel(false);
                let stop = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
                    let _ = rx.wait_for(|stopped| *stopped).await;
                };
                tokio::join!(
                    async {
                        shutdown.await;
                        let _ = tx.send(true);
                    },
                    scheduler.run_until(stop(rx.clone())),
                    triggers.run_until(stop(rx)),
                );
            }
        }

        Command::Status { job_id } => {
            let view = queue.status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }

        Command::Jobs { status, limit } => {
            for job in queue.list(status, limit).await? {
                println!(
                    "{}  {:<9}  {:<16}  p{}  {}/{}  {}",
                    job.id,
                    job.status,
                    format!("{:?}", job.kind),
                    job.priority,
                    job.retry_count,
                    job.max_retries,
                    job.target
                );
            }
            for (status, count) in queue.counts().await? {
                cli_log::sub_item(&format!("{status}: {count}"));
            }
        }

        Command::Stale { max } => {
            let max = max.unwrap_or(config.scheduler.stale_batch_size);
            let created = queue.bulk_enqueue_stale(max).await?;
            log::info!("Enqueued {} refresh jobs", created.len());
        }

        Command::Cancel { job_id } => {
            queue.cancel(job_id).await?;
            log::info!("Cancelled {}", job_id);
        }

        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.scheduler.cleanup_after_days);
            let removed = queue.cleanup(days).await?;
            log::info!("Removed {} jobs", removed);
        }

        Command::Sources => {
            let records = store.count_records_by_source().await?;
            for source in registry.all() {
                let mode = if source.auth_required {
                    "auth (unsupported)"
                } else if source.needs_interactive_rendering {
                    "interactive"
                } else {
                    "static"
                };
                println!(
                    "{:<26} {:<22} {:<18} records={}",
                    source.id,
                    source.name,
                    mode,
                    records.get(&source.id).copied().unwrap_or(0)
                );
            }
            cli_log::header("Source health");
            for health in registry.health() {
                let rate = health
                    .success_rate
                    .map(|r| format!("{:.0}%", r * 100.0))
                    .unwrap_or_else(|| "n/a".to_string());
                cli_log::sub_item(&format!(
                    "{}: {} ok / {} failed ({})",
                    health.source_id, health.success_count, health.failure_count, rate
                ));
            }
        }

        Command::Report { source, limit } => {
            for report in store.quality_reports(source.as_deref(), limit).await? {
                println!(
                    "{}  {:<24} {:<18} total={} valid={} dup={} missing={} completeness={:.1}%",
                    report.created_at.format("%Y-%m-%d %H:%M"),
                    report.source_id,
                    report.data_type,
                    report.total,
                    report.valid,
                    report.duplicates,
                    report.missing_required,
                    report.completeness_score
                );
            }
        }

        Command::Validate => {
            // load_all already validated both files
            log::info!("✓ Config OK");
            log::info!("✓ {} sources OK", registry.len());
            for source in registry.all().iter().filter(|s| s.auth_required) {
                log::warn!("Source {} requires authentication and will never be scraped", source.id);
            }
            log::info!("All validations passed!");
        }
    }

    Ok(())
}
