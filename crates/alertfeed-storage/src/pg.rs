//! PostgreSQL backend over `sqlx`.

use alertfeed_core::{
    AlertSource, ClassificationRule, FeedQualityMetrics, HealthMetric, HealthStatus,
    IngestionQueueItem, RuleType, SourceConfiguration, SourceType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::rows::{SecurityAlertRow, TravelAnnouncementRow, WeatherAlertRow};
use crate::store::{AlertStore, RuleStore, SourceCatalog, StorageError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

const SOURCE_COLUMNS: &str = r#"
    id, name, type, api_endpoint, is_active, polling_interval,
    last_poll_at, health_status, configuration
"#;

fn source_from_row(row: &PgRow) -> Result<AlertSource, StorageError> {
    let id: String = row.try_get("id")?;
    let configuration: JsonValue = row.try_get("configuration")?;
    let configuration = match serde_json::from_value::<SourceConfiguration>(configuration) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(source_id = %id, error = %err, "unreadable source configuration; using defaults");
            SourceConfiguration::default()
        }
    };
    let polling_interval: i32 = row.try_get("polling_interval")?;
    let source_type: String = row.try_get("type")?;
    let health_status: String = row.try_get("health_status")?;

    Ok(AlertSource {
        id,
        name: row.try_get("name")?,
        source_type: SourceType::parse(&source_type),
        api_endpoint: row.try_get("api_endpoint")?,
        is_active: row.try_get("is_active")?,
        polling_interval_secs: polling_interval.max(0) as u64,
        last_poll_at: row.try_get("last_poll_at")?,
        health_status: HealthStatus::parse(&health_status),
        configuration,
    })
}

#[async_trait]
impl SourceCatalog for PgStore {
    async fn active_sources(&self) -> Result<Vec<AlertSource>, StorageError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM alert_sources WHERE is_active ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn source(&self, id: &str) -> Result<Option<AlertSource>, StorageError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM alert_sources WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn mark_polled(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE alert_sources
               SET last_poll_at = $2,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for PgStore {
    async fn active_classification_rules(&self) -> Result<Vec<ClassificationRule>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_type, source_types, pattern, classification_value,
                   priority, confidence_score, is_active
              FROM classification_rules
             WHERE is_active
             ORDER BY priority DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let rule_type: String = row.try_get("rule_type")?;
            let rule_type = match rule_type.as_str() {
                "severity" => RuleType::Severity,
                "category" => RuleType::Category,
                other => {
                    warn!(rule_id = %id, rule_type = other, "skipping rule with unknown type");
                    continue;
                }
            };
            let source_types: Vec<String> = row.try_get("source_types")?;
            out.push(ClassificationRule {
                id: Some(id),
                rule_type,
                source_types: source_types.iter().map(|s| SourceType::parse(s)).collect(),
                pattern: row.try_get("pattern")?,
                value: row.try_get("classification_value")?,
                priority: row.try_get("priority")?,
                confidence: row.try_get("confidence_score")?,
                is_active: row.try_get("is_active")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn upsert_security_alert(&self, row: &SecurityAlertRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO security_alerts
                (id, source_id, title, summary, link, pub_date, source, category, location, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
               SET source_id = EXCLUDED.source_id,
                   title = EXCLUDED.title,
                   summary = EXCLUDED.summary,
                   link = EXCLUDED.link,
                   pub_date = EXCLUDED.pub_date,
                   source = EXCLUDED.source,
                   category = EXCLUDED.category,
                   location = EXCLUDED.location,
                   raw_data = EXCLUDED.raw_data,
                   updated_at = NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.source_id)
        .bind(&row.title)
        .bind(&row.summary)
        .bind(&row.link)
        .bind(row.pub_date)
        .bind(&row.source)
        .bind(&row.category)
        .bind(&row.location)
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_weather_alert(&self, row: &WeatherAlertRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO weather_alerts
                (id, source_id, description, severity, event_type, onset, expires,
                 geometry_coordinates, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
               SET source_id = EXCLUDED.source_id,
                   description = EXCLUDED.description,
                   severity = EXCLUDED.severity,
                   event_type = EXCLUDED.event_type,
                   onset = EXCLUDED.onset,
                   expires = EXCLUDED.expires,
                   geometry_coordinates = EXCLUDED.geometry_coordinates,
                   raw_data = EXCLUDED.raw_data,
                   updated_at = NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.source_id)
        .bind(&row.description)
        .bind(&row.severity)
        .bind(&row.event_type)
        .bind(row.onset)
        .bind(row.expires)
        .bind(&row.geometry_coordinates)
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_travel_announcement(&self, row: &TravelAnnouncementRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO immigration_travel_announcements
                (id, source_id, title, summary, content, link, pub_date, source, category,
                 announcement_type, location, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
               SET source_id = EXCLUDED.source_id,
                   title = EXCLUDED.title,
                   summary = EXCLUDED.summary,
                   content = EXCLUDED.content,
                   link = EXCLUDED.link,
                   pub_date = EXCLUDED.pub_date,
                   source = EXCLUDED.source,
                   category = EXCLUDED.category,
                   announcement_type = EXCLUDED.announcement_type,
                   location = EXCLUDED.location,
                   raw_data = EXCLUDED.raw_data,
                   updated_at = NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.source_id)
        .bind(&row.title)
        .bind(&row.summary)
        .bind(&row.content)
        .bind(&row.link)
        .bind(row.pub_date)
        .bind(&row.source)
        .bind(&row.category)
        .bind(&row.announcement_type)
        .bind(&row.location)
        .bind(&row.raw_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enqueue(&self, item: &IngestionQueueItem) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_queue
                (id, source_id, raw_data, processing_status, attempts, error_message,
                 created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(item.id)
        .bind(&item.source_id)
        .bind(&item.payload)
        .bind(item.processing_status.as_str())
        .bind(item.attempts as i32)
        .bind(&item.error)
        .bind(item.created_at)
        .bind(item.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_health_metric(&self, metric: &HealthMetric) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO source_health_metrics
                (source_id, response_time_ms, success, error_message, records_processed,
                 http_status_code, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&metric.source_id)
        .bind(i64::try_from(metric.response_time_ms).unwrap_or(i64::MAX))
        .bind(metric.success)
        .bind(&metric.error_message)
        .bind(metric.records_processed as i64)
        .bind(metric.http_status_code.map(i32::from))
        .bind(metric.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_quality_metrics(&self, metrics: &FeedQualityMetrics) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO feed_quality_metrics
                (source_id, raw_count, normalized_count, success_rate, avg_title_length,
                 avg_description_length, severity_distribution, category_distribution,
                 quality_score, issues, recommendations, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&metrics.source_id)
        .bind(metrics.raw_count as i64)
        .bind(metrics.normalized_count as i64)
        .bind(metrics.success_rate)
        .bind(metrics.avg_title_length)
        .bind(metrics.avg_description_length)
        .bind(serde_json::to_value(&metrics.severity_distribution)?)
        .bind(serde_json::to_value(&metrics.category_distribution)?)
        .bind(metrics.quality_score)
        .bind(serde_json::to_value(&metrics.issues)?)
        .bind(serde_json::to_value(&metrics.recommendations)?)
        .bind(metrics.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
