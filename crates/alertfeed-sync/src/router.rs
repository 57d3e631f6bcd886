//! Storage routing: one row shape per domain, plus the downstream queue.

use alertfeed_core::{IngestionQueueItem, SourceType, StagedAlert, StorageDomain};
use alertfeed_storage::{
    AlertStore, SecurityAlertRow, StorageError, TravelAnnouncementRow, WeatherAlertRow,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{error, warn};

const TRAVEL_SUMMARY_MAX_CHARS: usize = 300;

static ANNOUNCEMENT_TYPES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("travel-advisory", r"\btravel (?:advice|advisor(?:y|ies))|\bavoid (?:all|non-essential) travel"),
        ("visa-policy", r"\b(?:visas?|eta|electronic travel authori[sz]ation|work permits?|study permits?)\b"),
        ("border-measure", r"\b(?:border|entry requirements?|ports? of entry|quarantine|customs)\b"),
        ("program-update", r"\b(?:program(?:me)?s?|streams?|intake|draws?|express entry|pathways?)\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("static announcement regex")))
    .collect()
});

pub fn infer_announcement_type(title: &str, description: &str) -> &'static str {
    let content = format!("{title} {description}").to_lowercase();
    ANNOUNCEMENT_TYPES
        .iter()
        .find(|(_, re)| re.is_match(&content))
        .map(|(label, _)| *label)
        .unwrap_or("announcement")
}

/// Storage domain for a source type. Unrecognized types go to security
/// storage, and say so.
pub fn route_for(source_type: &SourceType) -> StorageDomain {
    source_type.storage_domain().unwrap_or_else(|| {
        warn!(source_type = %source_type, "unrecognized source type; routing to security storage");
        StorageDomain::Security
    })
}

fn summary_of(description: &str) -> String {
    if description.chars().count() <= TRAVEL_SUMMARY_MAX_CHARS {
        return description.to_string();
    }
    let mut out = description
        .chars()
        .take(TRAVEL_SUMMARY_MAX_CHARS - 3)
        .collect::<String>();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

/// A staged alert mapped into its domain's row shape.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageRecord {
    Security(SecurityAlertRow),
    Weather(WeatherAlertRow),
    ImmigrationTravel(TravelAnnouncementRow),
}

impl StorageRecord {
    pub fn build(domain: StorageDomain, staged: &StagedAlert) -> Self {
        let alert = &staged.alert;
        match domain {
            StorageDomain::Security => Self::Security(SecurityAlertRow {
                id: alert.id.clone(),
                source_id: staged.source_id.clone(),
                title: alert.title.clone(),
                summary: alert.description.clone(),
                link: alert.url.clone(),
                pub_date: alert.published,
                source: alert.source.as_str().to_string(),
                category: alert.category.clone(),
                location: alert.area.clone(),
                raw_data: staged.raw.clone(),
            }),
            StorageDomain::Weather => Self::Weather(WeatherAlertRow {
                id: alert.id.clone(),
                source_id: staged.source_id.clone(),
                description: alert.description.clone(),
                severity: alert.severity.as_str().to_string(),
                event_type: alert.title.clone(),
                onset: alert.effective.or(Some(alert.published)),
                expires: alert.expires,
                geometry_coordinates: alert
                    .coordinates
                    .map(|c| json!([c.longitude, c.latitude])),
                raw_data: staged.raw.clone(),
            }),
            StorageDomain::ImmigrationTravel => Self::ImmigrationTravel(TravelAnnouncementRow {
                id: alert.id.clone(),
                source_id: staged.source_id.clone(),
                title: alert.title.clone(),
                summary: summary_of(&alert.description),
                content: alert.description.clone(),
                link: alert.url.clone(),
                pub_date: alert.published,
                source: alert.source.as_str().to_string(),
                category: alert.category.clone(),
                announcement_type: infer_announcement_type(&alert.title, &alert.description).to_string(),
                location: alert.area.clone(),
                raw_data: staged.raw.clone(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Security(row) => &row.id,
            Self::Weather(row) => &row.id,
            Self::ImmigrationTravel(row) => &row.id,
        }
    }

    pub fn domain(&self) -> StorageDomain {
        match self {
            Self::Security(_) => StorageDomain::Security,
            Self::Weather(_) => StorageDomain::Weather,
            Self::ImmigrationTravel(_) => StorageDomain::ImmigrationTravel,
        }
    }

    pub async fn upsert(&self, store: &dyn AlertStore) -> Result<(), StorageError> {
        match self {
            Self::Security(row) => store.upsert_security_alert(row).await,
            Self::Weather(row) => store.upsert_weather_alert(row).await,
            Self::ImmigrationTravel(row) => store.upsert_travel_announcement(row).await,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub stored: usize,
    pub queued: usize,
    pub failed: usize,
}

pub struct StorageRouter<'a> {
    store: &'a dyn AlertStore,
}

impl<'a> StorageRouter<'a> {
    pub fn new(store: &'a dyn AlertStore) -> Self {
        Self { store }
    }

    /// Upsert every alert into its domain table, then queue every alert.
    /// Row failures are logged and counted, never retried.
    pub async fn store(&self, source_type: &SourceType, alerts: &[StagedAlert], now: DateTime<Utc>) -> StoreOutcome {
        let domain = route_for(source_type);
        let mut outcome = StoreOutcome::default();

        for staged in alerts {
            let record = StorageRecord::build(domain, staged);
            match record.upsert(self.store).await {
                Ok(()) => outcome.stored += 1,
                Err(err) => {
                    outcome.failed += 1;
                    error!(
                        source_id = %staged.source_id,
                        alert_id = record.id(),
                        table = domain.table_name(),
                        error = %err,
                        "alert upsert failed"
                    );
                }
            }
        }

        for staged in alerts {
            let payload = match serde_json::to_value(&staged.alert) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(source_id = %staged.source_id, alert_id = %staged.alert.id, error = %err, "alert not serializable for queue");
                    continue;
                }
            };
            let item = IngestionQueueItem::pending(staged.source_id.clone(), payload, now);
            match self.store.enqueue(&item).await {
                Ok(()) => outcome.queued += 1,
                Err(err) => {
                    error!(source_id = %staged.source_id, alert_id = %staged.alert.id, error = %err, "enqueue failed");
                }
            }
        }

        outcome
    }
}
