use std::sync::Arc;

use alertfeed_storage::{PgStore, SourceCatalog};
use alertfeed_sync::{CatalogBackend, Persistence, RulesBackend, SyncConfig, SyncPipeline, SyncRunSummary};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "alertfeed")]
#[command(about = "Alert feed ingestion pipeline")]
struct Cli {
    /// Print full JSON reports instead of one-line summaries.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll every due source once.
    Sync {
        /// Keep rows and telemetry in memory instead of the database.
        #[arg(long)]
        dry_run: bool,
        /// Process only this source, ignoring its polling interval.
        #[arg(long)]
        source: Option<String>,
    },
    /// Fetch and normalize one source without storing anything.
    TestSource { id: String },
    /// Run the sync on the configured cron schedule until interrupted.
    Schedule,
    /// Apply database migrations.
    Migrate,
    /// List active sources from the configured catalog.
    Sources,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ALERTFEED_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read-only commands only need the database when a backend lives there.
fn read_persistence(config: &SyncConfig) -> Persistence {
    if config.catalog_backend == CatalogBackend::Store || config.rules_backend == RulesBackend::Store {
        Persistence::Database
    } else {
        Persistence::Memory
    }
}

fn print_summary(summary: &SyncRunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!(
        "sync complete: run_id={} due={} skipped={} not_due={} succeeded={} failed={} stored={} queued={}",
        summary.run_id,
        summary.sources_due,
        summary.sources_skipped,
        summary.sources_not_due,
        summary.sources_succeeded,
        summary.sources_failed,
        summary.alerts_stored,
        summary.alerts_queued
    );
    for source in summary.sources.iter().filter(|s| !s.success) {
        println!(
            "  {} failed after {} attempt(s): {}",
            source.source_id,
            source.attempts,
            source.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        source: None,
    }) {
        Commands::Sync { dry_run, source } => {
            let persistence = if dry_run {
                Persistence::Memory
            } else {
                Persistence::Database
            };
            let pipeline = SyncPipeline::from_config(config, persistence).await?;
            match source {
                Some(id) => {
                    let report = pipeline.run_source(&id).await?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!(
                            "{}: success={} attempts={} raw={} stored={} queued={}",
                            report.source_id,
                            report.success,
                            report.attempts,
                            report.raw_items,
                            report.stored,
                            report.queued
                        );
                    }
                }
                None => {
                    let summary = pipeline.run_once().await?;
                    print_summary(&summary, cli.json)?;
                }
            }
        }
        Commands::TestSource { id } => {
            let persistence = read_persistence(&config);
            let pipeline = SyncPipeline::from_config(config, persistence).await?;
            let report = pipeline.test_source(&id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{}: http_status={} elapsed_ms={} raw={} failures={}",
                    report.source_id,
                    report.http_status.map_or_else(|| "-".to_string(), |s| s.to_string()),
                    report.elapsed_ms,
                    report.raw_items,
                    report.normalization_failures
                );
                for alert in report.alerts.iter().take(5) {
                    println!("  [{}] {} ({})", alert.severity, alert.title, alert.category);
                }
                if let Some(error) = report.error {
                    println!("  error: {error}");
                }
            }
        }
        Commands::Schedule => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..config
            };
            let pipeline = Arc::new(SyncPipeline::from_config(config, Persistence::Database).await?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                anyhow::bail!("scheduler is disabled");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().sync_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url, config.db_max_connections)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Sources => {
            let persistence = read_persistence(&config);
            let pipeline = SyncPipeline::from_config(config, persistence).await?;
            let sources = pipeline
                .catalog()
                .active_sources()
                .await
                .context("listing active sources")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sources)?);
            } else {
                for source in sources {
                    println!(
                        "{}\t{}\tevery {}s\t{}",
                        source.id, source.source_type, source.polling_interval_secs, source.api_endpoint
                    );
                }
            }
        }
    }

    Ok(())
}
