//! Storage seams and the in-memory backend.

use std::collections::{BTreeMap, HashSet};

use alertfeed_core::{AlertSource, ClassificationRule, FeedQualityMetrics, HealthMetric, IngestionQueueItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::rows::{SecurityAlertRow, TravelAnnouncementRow, WeatherAlertRow};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{table} rejected row {id}: {reason}")]
    Rejected {
        table: &'static str,
        id: String,
        reason: String,
    },
    #[error("source catalog error: {0}")]
    Catalog(String),
}

/// Write side of the pipeline: alert tables, queue and telemetry.
///
/// Alert writes are upserts keyed by alert id; everything else appends.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn upsert_security_alert(&self, row: &SecurityAlertRow) -> Result<(), StorageError>;
    async fn upsert_weather_alert(&self, row: &WeatherAlertRow) -> Result<(), StorageError>;
    async fn upsert_travel_announcement(&self, row: &TravelAnnouncementRow) -> Result<(), StorageError>;
    async fn enqueue(&self, item: &IngestionQueueItem) -> Result<(), StorageError>;
    async fn record_health_metric(&self, metric: &HealthMetric) -> Result<(), StorageError>;
    async fn record_quality_metrics(&self, metrics: &FeedQualityMetrics) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn active_sources(&self) -> Result<Vec<AlertSource>, StorageError>;
    async fn source(&self, id: &str) -> Result<Option<AlertSource>, StorageError>;
    async fn mark_polled(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn active_classification_rules(&self) -> Result<Vec<ClassificationRule>, StorageError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    sources: BTreeMap<String, AlertSource>,
    rules: Vec<ClassificationRule>,
    security: BTreeMap<String, SecurityAlertRow>,
    weather: BTreeMap<String, WeatherAlertRow>,
    travel: BTreeMap<String, TravelAnnouncementRow>,
    queue: Vec<IngestionQueueItem>,
    health: Vec<HealthMetric>,
    quality: Vec<FeedQualityMetrics>,
    rejected_ids: HashSet<String>,
}

/// Process-local store used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = AlertSource>) -> Self {
        let mut tables = MemoryTables::default();
        for source in sources {
            tables.sources.insert(source.id.clone(), source);
        }
        Self {
            tables: Mutex::new(tables),
        }
    }

    pub async fn add_rules(&self, rules: impl IntoIterator<Item = ClassificationRule>) {
        self.tables.lock().await.rules.extend(rules);
    }

    /// Make every upsert for `id` fail.
    pub async fn reject_alert_id(&self, id: impl Into<String>) {
        self.tables.lock().await.rejected_ids.insert(id.into());
    }

    pub async fn security_alerts(&self) -> Vec<SecurityAlertRow> {
        self.tables.lock().await.security.values().cloned().collect()
    }

    pub async fn weather_alerts(&self) -> Vec<WeatherAlertRow> {
        self.tables.lock().await.weather.values().cloned().collect()
    }

    pub async fn travel_announcements(&self) -> Vec<TravelAnnouncementRow> {
        self.tables.lock().await.travel.values().cloned().collect()
    }

    pub async fn queue(&self) -> Vec<IngestionQueueItem> {
        self.tables.lock().await.queue.clone()
    }

    pub async fn health_metrics(&self) -> Vec<HealthMetric> {
        self.tables.lock().await.health.clone()
    }

    pub async fn quality_metrics(&self) -> Vec<FeedQualityMetrics> {
        self.tables.lock().await.quality.clone()
    }

    fn check_rejected(tables: &MemoryTables, table: &'static str, id: &str) -> Result<(), StorageError> {
        if tables.rejected_ids.contains(id) {
            return Err(StorageError::Rejected {
                table,
                id: id.to_string(),
                reason: "rejected by memory store".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn upsert_security_alert(&self, row: &SecurityAlertRow) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        Self::check_rejected(&tables, "security_alerts", &row.id)?;
        tables.security.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn upsert_weather_alert(&self, row: &WeatherAlertRow) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        Self::check_rejected(&tables, "weather_alerts", &row.id)?;
        tables.weather.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn upsert_travel_announcement(&self, row: &TravelAnnouncementRow) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        Self::check_rejected(&tables, "immigration_travel_announcements", &row.id)?;
        tables.travel.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn enqueue(&self, item: &IngestionQueueItem) -> Result<(), StorageError> {
        self.tables.lock().await.queue.push(item.clone());
        Ok(())
    }

    async fn record_health_metric(&self, metric: &HealthMetric) -> Result<(), StorageError> {
        self.tables.lock().await.health.push(metric.clone());
        Ok(())
    }

    async fn record_quality_metrics(&self, metrics: &FeedQualityMetrics) -> Result<(), StorageError> {
        self.tables.lock().await.quality.push(metrics.clone());
        Ok(())
    }
}

#[async_trait]
impl SourceCatalog for MemoryStore {
    async fn active_sources(&self) -> Result<Vec<AlertSource>, StorageError> {
        Ok(self
            .tables
            .lock()
            .await
            .sources
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn source(&self, id: &str) -> Result<Option<AlertSource>, StorageError> {
        Ok(self.tables.lock().await.sources.get(id).cloned())
    }

    async fn mark_polled(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        match tables.sources.get_mut(id) {
            Some(source) => {
                source.last_poll_at = Some(at);
                Ok(())
            }
            None => Err(StorageError::Catalog(format!("unknown source {id}"))),
        }
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn active_classification_rules(&self) -> Result<Vec<ClassificationRule>, StorageError> {
        Ok(self
            .tables
            .lock()
            .await
            .rules
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn security_row(id: &str, title: &str) -> SecurityAlertRow {
        SecurityAlertRow {
            id: id.to_string(),
            source_id: "cccs".to_string(),
            title: title.to_string(),
            summary: "summary".to_string(),
            link: None,
            pub_date: Utc::now(),
            source: "Other".to_string(),
            category: "Cybersecurity".to_string(),
            location: None,
            raw_data: json!({"title": title}),
        }
    }

    #[tokio::test]
    async fn upsert_same_id_keeps_one_row_with_latest_values() {
        let store = MemoryStore::new();
        store.upsert_security_alert(&security_row("a1", "first")).await.unwrap();
        store.upsert_security_alert(&security_row("a1", "second")).await.unwrap();

        let rows = store.security_alerts().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "second");
    }

    #[tokio::test]
    async fn rejected_ids_fail_without_touching_other_rows() {
        let store = MemoryStore::new();
        store.reject_alert_id("bad").await;
        assert!(store.upsert_security_alert(&security_row("bad", "x")).await.is_err());
        store.upsert_security_alert(&security_row("good", "y")).await.unwrap();
        assert_eq!(store.security_alerts().await.len(), 1);
    }
}
