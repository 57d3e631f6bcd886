//! Batch driver: gate, fetch, normalize, classify, store, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alertfeed_adapters::{fetch_feed, Classifier, Normalizer, SourceTypePolicy};
use alertfeed_core::{AlertSource, CanonicalAlert, StagedAlert};
use alertfeed_storage::{
    AlertStore, FeedFetcher, HttpClientConfig, HttpFetcher, MemoryStore, PgStore, SourceCatalog,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::YamlSourceCatalog;
use crate::config::{CatalogBackend, RulesBackend, SyncConfig};
use crate::gate::{self, GateDecision};
use crate::health::{with_retry, HealthMonitor, ProcessError};
use crate::quality::QualityMonitor;
use crate::router::{StorageRouter, StoreOutcome};
use crate::rules::{load_rule_set, RuleProvider, StaticRuleProvider, StoreRuleProvider};

/// Where alert rows, queue items and telemetry go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Database,
    /// Process-local store; nothing survives the run.
    Memory,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRunReport {
    pub source_id: String,
    pub source_type: String,
    pub success: bool,
    pub attempts: usize,
    pub http_status: Option<u16>,
    pub raw_items: usize,
    pub normalized: usize,
    pub normalization_failures: usize,
    pub stored: usize,
    pub queued: usize,
    pub store_failures: usize,
    pub quality_score: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_considered: usize,
    pub sources_due: usize,
    pub sources_not_due: usize,
    pub sources_skipped: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub alerts_normalized: usize,
    pub alerts_stored: usize,
    pub alerts_queued: usize,
    pub sources: Vec<SourceRunReport>,
}

/// Connectivity check output: fetched and normalized, nothing persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SourceTestReport {
    pub source_id: String,
    pub http_status: Option<u16>,
    pub elapsed_ms: u64,
    pub raw_items: usize,
    pub normalization_failures: usize,
    pub alerts: Vec<CanonicalAlert>,
    pub error: Option<String>,
}

struct AttemptOutput {
    http_status: u16,
    raw_items: usize,
    alerts: Vec<StagedAlert>,
    normalization_failures: usize,
    stored: StoreOutcome,
}

pub struct SyncPipeline {
    config: SyncConfig,
    catalog: Arc<dyn SourceCatalog>,
    store: Arc<dyn AlertStore>,
    rules: Arc<dyn RuleProvider>,
    fetcher: Arc<dyn FeedFetcher>,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        catalog: Arc<dyn SourceCatalog>,
        store: Arc<dyn AlertStore>,
        rules: Arc<dyn RuleProvider>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        Self {
            config,
            catalog,
            store,
            rules,
            fetcher,
        }
    }

    pub async fn from_config(config: SyncConfig, persistence: Persistence) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            global_concurrency: config.max_concurrency.max(1) * 2,
        })?);

        let pg = match persistence {
            Persistence::Database => Some(Arc::new(
                PgStore::connect(&config.database_url, config.db_max_connections)
                    .await
                    .context("connecting to database")?,
            )),
            Persistence::Memory => None,
        };

        let store: Arc<dyn AlertStore> = match &pg {
            Some(pg) => pg.clone(),
            None => Arc::new(MemoryStore::new()),
        };

        let catalog: Arc<dyn SourceCatalog> = match (config.catalog_backend, &pg) {
            (CatalogBackend::Yaml, _) => Arc::new(YamlSourceCatalog::load(&config.sources_path).await?),
            (CatalogBackend::Store, Some(pg)) => pg.clone(),
            (CatalogBackend::Store, None) => {
                anyhow::bail!("catalog backend `store` needs a database; run without --dry-run")
            }
        };

        let rules: Arc<dyn RuleProvider> = match (config.rules_backend, &pg) {
            (RulesBackend::Static, _) => Arc::new(StaticRuleProvider::from_yaml_file(&config.rules_path).await?),
            (RulesBackend::Store, Some(pg)) => Arc::new(StoreRuleProvider::new(pg.clone())),
            (RulesBackend::Store, None) => {
                anyhow::bail!("rules backend `store` needs a database; run without --dry-run")
            }
        };

        Ok(Self::new(config, catalog, store, rules, fetcher))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn catalog(&self) -> &dyn SourceCatalog {
        self.catalog.as_ref()
    }

    /// One pass over every active source that is due and not gated.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run_batch(run_id, started_at).instrument(span).await
    }

    async fn run_batch(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<SyncRunSummary> {
        let sources = self
            .catalog
            .active_sources()
            .await
            .context("listing active sources")?;
        let classifier = Classifier::new(load_rule_set(self.rules.as_ref()).await);

        let mut due = Vec::new();
        let mut not_due = 0usize;
        let mut skipped = 0usize;
        for source in &sources {
            match gate::evaluate(source, started_at) {
                GateDecision::Poll => due.push(source.clone()),
                GateDecision::NotDue => not_due += 1,
                GateDecision::Skip(reason) => {
                    skipped += 1;
                    info!(source_id = %source.id, reason = %reason, "skipping source");
                }
            }
        }

        let sources_due = due.len();
        let classifier = &classifier;
        let reports: Vec<SourceRunReport> = stream::iter(due)
            .map(|source: AlertSource| async move { self.process_source(&source, classifier).await })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let finished_at = Utc::now();
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            sources_considered: sources.len(),
            sources_due,
            sources_not_due: not_due,
            sources_skipped: skipped,
            sources_succeeded: reports.iter().filter(|r| r.success).count(),
            sources_failed: reports.iter().filter(|r| !r.success).count(),
            alerts_normalized: reports.iter().map(|r| r.normalized).sum(),
            alerts_stored: reports.iter().map(|r| r.stored).sum(),
            alerts_queued: reports.iter().map(|r| r.queued).sum(),
            sources: reports,
        };
        info!(
            considered = summary.sources_considered,
            due = summary.sources_due,
            skipped = summary.sources_skipped,
            succeeded = summary.sources_succeeded,
            failed = summary.sources_failed,
            stored = summary.alerts_stored,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Process one source now, ignoring its polling interval.
    pub async fn run_source(&self, source_id: &str) -> Result<SourceRunReport> {
        let source = self.lookup(source_id).await?;
        if let Some(reason) = gate::should_skip(&source) {
            anyhow::bail!("source {source_id} cannot be polled: {reason}");
        }
        let classifier = Classifier::new(load_rule_set(self.rules.as_ref()).await);
        Ok(self.process_source(&source, &classifier).await)
    }

    /// Fetch and normalize a single source once, without retries or writes.
    pub async fn test_source(&self, source_id: &str) -> Result<SourceTestReport> {
        let source = self.lookup(source_id).await?;
        let classifier = Classifier::new(load_rule_set(self.rules.as_ref()).await);
        let started = Instant::now();
        let span = info_span!("test_source", source_id = %source.id, source_type = %source.source_type);

        let fetched = fetch_feed(self.fetcher.as_ref(), &source).instrument(span).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let report = match fetched {
            Ok(feed) => {
                let items_path = source
                    .configuration
                    .normalization
                    .as_ref()
                    .and_then(|n| n.items_path.as_deref());
                let raw = feed.payload.raw_items(items_path);
                let batch = Normalizer::new(&source, &classifier).normalize_batch(&raw, Utc::now());
                SourceTestReport {
                    source_id: source.id.clone(),
                    http_status: Some(feed.http_status),
                    elapsed_ms,
                    raw_items: raw.len(),
                    normalization_failures: batch.failures,
                    alerts: batch.alerts.into_iter().map(|s| s.alert).collect(),
                    error: None,
                }
            }
            Err(err) => SourceTestReport {
                source_id: source.id.clone(),
                http_status: err.http_status(),
                elapsed_ms,
                raw_items: 0,
                normalization_failures: 0,
                alerts: Vec::new(),
                error: Some(err.to_string()),
            },
        };
        Ok(report)
    }

    async fn lookup(&self, source_id: &str) -> Result<AlertSource> {
        self.catalog
            .source(source_id)
            .await
            .with_context(|| format!("looking up source {source_id}"))?
            .with_context(|| format!("unknown source {source_id}"))
    }

    async fn attempt(&self, source: &AlertSource, classifier: &Classifier) -> Result<AttemptOutput, ProcessError> {
        let feed = fetch_feed(self.fetcher.as_ref(), source).await?;
        let items_path = source
            .configuration
            .normalization
            .as_ref()
            .and_then(|n| n.items_path.as_deref());
        let raw = feed.payload.raw_items(items_path);

        let now = Utc::now();
        let batch = Normalizer::new(source, classifier).normalize_batch(&raw, now);
        let stored = StorageRouter::new(self.store.as_ref())
            .store(&source.source_type, &batch.alerts, now)
            .await;

        Ok(AttemptOutput {
            http_status: feed.http_status,
            raw_items: raw.len(),
            normalization_failures: batch.failures,
            alerts: batch.alerts,
            stored,
        })
    }

    /// Retry per the source type's policy, then write exactly one health
    /// metric, advance the poll time, and score the run.
    pub async fn process_source(&self, source: &AlertSource, classifier: &Classifier) -> SourceRunReport {
        let span = info_span!("process_source", source_id = %source.id, source_type = %source.source_type);
        async {
            let policy = SourceTypePolicy::for_type(&source.source_type);
            let backoff = policy.backoff.with_base_delay(self.config.retry_base_delay);

            let outcome = with_retry(&source.id, &backoff, |_| self.attempt(source, classifier)).await;
            let finished_at = Utc::now();

            let (records_processed, http_status) = match &outcome.result {
                Ok(output) => (output.stored.stored, Some(output.http_status)),
                Err(_) => (0, None),
            };
            let metric = HealthMonitor::metric(&source.id, &outcome, records_processed, http_status, finished_at);
            HealthMonitor::new(self.store.as_ref()).record(&metric).await;

            if let Err(err) = self.catalog.mark_polled(&source.id, finished_at).await {
                warn!(error = %err, "recording poll time failed");
            }

            let mut report = SourceRunReport {
                source_id: source.id.clone(),
                source_type: source.source_type.to_string(),
                success: metric.success,
                attempts: outcome.attempts,
                http_status: metric.http_status_code,
                raw_items: 0,
                normalized: 0,
                normalization_failures: 0,
                stored: 0,
                queued: 0,
                store_failures: 0,
                quality_score: None,
                error: metric.error_message.clone(),
            };

            match outcome.result {
                Ok(output) => {
                    report.raw_items = output.raw_items;
                    report.normalization_failures = output.normalization_failures;
                    report.normalized = output.alerts.len() - output.normalization_failures;
                    report.stored = output.stored.stored;
                    report.queued = output.stored.queued;
                    report.store_failures = output.stored.failed;

                    if output.raw_items > 0 {
                        let quality =
                            QualityMonitor::evaluate(&source.id, output.raw_items, &output.alerts, finished_at);
                        info!(
                            score = quality.quality_score,
                            success_rate = quality.success_rate,
                            issues = ?quality.issues,
                            "feed quality"
                        );
                        if let Err(err) = self.store.record_quality_metrics(&quality).await {
                            error!(error = %err, "quality metrics write failed");
                        }
                        report.quality_score = Some(quality.quality_score);
                    }
                    info!(
                        attempts = report.attempts,
                        records = report.stored,
                        raw = report.raw_items,
                        "source processed"
                    );
                }
                Err(err) => {
                    error!(attempts = report.attempts, http_status = report.http_status, error = %err, "source failed");
                }
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Cron job running `run_once`, when enabled in config.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(run_id = %summary.run_id, stored = summary.alerts_stored, "scheduled sync finished"),
                    Err(err) => error!(error = ?err, "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}
