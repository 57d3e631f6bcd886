//! Core domain model for alert feed ingestion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "alertfeed-core";

pub const DEFAULT_TITLE: &str = "Untitled Alert";
pub const DEFAULT_DESCRIPTION: &str = "No description available";
pub const DEFAULT_CATEGORY: &str = "General";
pub const ERROR_CATEGORY: &str = "Error";

/// Feed specialization tag. Unrecognized tags are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Emergency,
    Weather,
    WeatherGeocmet,
    SecurityRss,
    Rss,
    CustomApi,
    Geojson,
    ImmigrationTravelAtom,
    GovernmentAnnouncements,
    Other(String),
}

impl SourceType {
    pub const RECOGNIZED: [SourceType; 9] = [
        SourceType::Emergency,
        SourceType::Weather,
        SourceType::WeatherGeocmet,
        SourceType::SecurityRss,
        SourceType::Rss,
        SourceType::CustomApi,
        SourceType::Geojson,
        SourceType::ImmigrationTravelAtom,
        SourceType::GovernmentAnnouncements,
    ];

    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "emergency" => Self::Emergency,
            "weather" => Self::Weather,
            "weather-geocmet" => Self::WeatherGeocmet,
            "security-rss" => Self::SecurityRss,
            "rss" => Self::Rss,
            "custom-api" => Self::CustomApi,
            "geojson" => Self::Geojson,
            "immigration-travel-atom" => Self::ImmigrationTravelAtom,
            "government-announcements" => Self::GovernmentAnnouncements,
            _ => Self::Other(tag.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Emergency => "emergency",
            Self::Weather => "weather",
            Self::WeatherGeocmet => "weather-geocmet",
            Self::SecurityRss => "security-rss",
            Self::Rss => "rss",
            Self::CustomApi => "custom-api",
            Self::Geojson => "geojson",
            Self::ImmigrationTravelAtom => "immigration-travel-atom",
            Self::GovernmentAnnouncements => "government-announcements",
            Self::Other(tag) => tag,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Storage table for this feed type. `None` for unrecognized tags; the
    /// router decides what to do with those.
    pub fn storage_domain(&self) -> Option<StorageDomain> {
        match self {
            Self::Weather | Self::WeatherGeocmet | Self::Geojson => Some(StorageDomain::Weather),
            Self::ImmigrationTravelAtom | Self::GovernmentAnnouncements => {
                Some(StorageDomain::ImmigrationTravel)
            }
            Self::SecurityRss | Self::Rss | Self::Emergency | Self::CustomApi => {
                Some(StorageDomain::Security)
            }
            Self::Other(_) => None,
        }
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageDomain {
    Security,
    Weather,
    ImmigrationTravel,
}

impl StorageDomain {
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Security => "security_alerts",
            Self::Weather => "weather_alerts",
            Self::ImmigrationTravel => "immigration_travel_announcements",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "degraded" => Self::Degraded,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Something a source needs before it can be polled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Capability {
    ApiKey,
    Header(String),
}

impl TryFrom<String> for Capability {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if matches!(trimmed.to_ascii_lowercase().as_str(), "api_key" | "api-key" | "apikey") {
            return Ok(Self::ApiKey);
        }
        match trimmed.split_once(':') {
            Some((kind, name)) if kind.eq_ignore_ascii_case("header") && !name.trim().is_empty() => {
                Ok(Self::Header(name.trim().to_string()))
            }
            _ => Err(format!("unknown capability `{trimmed}`")),
        }
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        match value {
            Capability::ApiKey => "api_key".to_string(),
            Capability::Header(name) => format!("header:{name}"),
        }
    }
}

/// Raw-value to canonical-value tables, keyed case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueMapping {
    #[serde(default)]
    pub severity: BTreeMap<String, String>,
    #[serde(default)]
    pub urgency: BTreeMap<String, String>,
    #[serde(default)]
    pub status: BTreeMap<String, String>,
    #[serde(default)]
    pub category: BTreeMap<String, String>,
}

impl ValueMapping {
    pub fn lookup<'a>(table: &'a BTreeMap<String, String>, raw: &str) -> Option<&'a str> {
        let raw = raw.trim();
        table
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(raw))
            .map(|(_, value)| value.as_str())
    }
}

/// Canonical fields a field-mapping entry can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    Id,
    Title,
    Description,
    Severity,
    Urgency,
    Category,
    Status,
    Area,
    Published,
    Updated,
    Expires,
    Effective,
    Url,
    Instructions,
    Author,
    Latitude,
    Longitude,
    Coordinates,
}

impl CanonicalField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Description => "description",
            Self::Severity => "severity",
            Self::Urgency => "urgency",
            Self::Category => "category",
            Self::Status => "status",
            Self::Area => "area",
            Self::Published => "published",
            Self::Updated => "updated",
            Self::Expires => "expires",
            Self::Effective => "effective",
            Self::Url => "url",
            Self::Instructions => "instructions",
            Self::Author => "author",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Coordinates => "coordinates",
        }
    }
}

fn default_strip_prefixes() -> Vec<String> {
    ["Advisory:", "Warning:", "Alert:", "Update:", "Notice:"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

fn default_strip_suffixes() -> Vec<String> {
    [" - Canada.ca", " | Canada.ca", " - Government of Canada"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

fn default_description_max_length() -> usize {
    1000
}

/// Field-mapping block of a source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub value_mapping: ValueMapping,
    #[serde(default)]
    pub items_path: Option<String>,
    #[serde(default = "default_strip_prefixes")]
    pub strip_prefixes: Vec<String>,
    #[serde(default = "default_strip_suffixes")]
    pub strip_suffixes: Vec<String>,
    #[serde(default = "default_description_max_length")]
    pub description_max_length: usize,
    #[serde(default)]
    pub default_category: Option<String>,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            field_mapping: BTreeMap::new(),
            value_mapping: ValueMapping::default(),
            items_path: None,
            strip_prefixes: default_strip_prefixes(),
            strip_suffixes: default_strip_suffixes(),
            description_max_length: default_description_max_length(),
            default_category: None,
        }
    }
}

impl NormalizationConfig {
    pub fn path_for(&self, field: CanonicalField) -> Option<&str> {
        self.field_mapping
            .get(field.as_str())
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
    }
}

/// Typed view of the free-form source configuration object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceConfiguration {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub requires: Vec<Capability>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub normalization: Option<NormalizationConfig>,
}

/// One feed in the source catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSource {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    pub api_endpoint: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
    #[serde(default)]
    pub last_poll_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub configuration: SourceConfiguration,
}

fn default_true() -> bool {
    true
}

fn default_polling_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Extreme,
    Severe,
    Moderate,
    Minor,
    Info,
    Unknown,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extreme => "Extreme",
            Self::Severe => "Severe",
            Self::Moderate => "Moderate",
            Self::Minor => "Minor",
            Self::Info => "Info",
            Self::Unknown => "Unknown",
        }
    }

    /// Case-insensitive match on the canonical names only.
    pub fn from_canonical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "extreme" => Some(Self::Extreme),
            "severe" => Some(Self::Severe),
            "moderate" => Some(Self::Moderate),
            "minor" => Some(Self::Minor),
            "info" => Some(Self::Info),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Immediate,
    Expected,
    Future,
    Past,
    Unknown,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "Immediate",
            Self::Expected => "Expected",
            Self::Future => "Future",
            Self::Past => "Past",
            Self::Unknown => "Unknown",
        }
    }

    pub fn from_canonical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Some(Self::Immediate),
            "expected" => Some(Self::Expected),
            "future" => Some(Self::Future),
            "past" => Some(Self::Past),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    Actual,
    Exercise,
    System,
    Test,
    Draft,
    Unknown,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actual => "Actual",
            Self::Exercise => "Exercise",
            Self::System => "System",
            Self::Test => "Test",
            Self::Draft => "Draft",
            Self::Unknown => "Unknown",
        }
    }

    pub fn from_canonical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "actual" => Some(Self::Actual),
            "exercise" => Some(Self::Exercise),
            "system" => Some(Self::System),
            "test" => Some(Self::Test),
            "draft" => Some(Self::Draft),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Publisher label carried on every canonical alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLabel {
    #[serde(rename = "Alert Ready")]
    AlertReady,
    #[serde(rename = "BC Emergency")]
    BcEmergency,
    Everbridge,
    Other,
}

impl SourceLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlertReady => "Alert Ready",
            Self::BcEmergency => "BC Emergency",
            Self::Everbridge => "Everbridge",
            Self::Other => "Other",
        }
    }

    /// Infer the label from a source's display name and endpoint.
    pub fn infer(name: &str, endpoint: &str) -> Self {
        let haystack = format!("{name} {endpoint}").to_ascii_lowercase();
        if haystack.contains("alertready") || haystack.contains("alert ready") {
            Self::AlertReady
        } else if haystack.contains("everbridge") {
            Self::Everbridge
        } else if haystack.contains("emergencyinfobc")
            || haystack.contains("bc emergency")
            || (haystack.contains("gov.bc.ca") && haystack.contains("emergency"))
        {
            Self::BcEmergency
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Normalized alert every feed format converges to.
///
/// `title`, `description`, `published`, `severity` and `status` are never
/// absent: unresolved input degrades to the `DEFAULT_*` sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAlert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub urgency: Urgency,
    pub category: String,
    pub status: AlertStatus,
    pub area: Option<String>,
    pub published: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub effective: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub instructions: Option<String>,
    pub author: Option<String>,
    pub source: SourceLabel,
    pub coordinates: Option<Coordinates>,
}

impl CanonicalAlert {
    /// Stand-in for an item that could not be normalized, so that output
    /// counts keep matching input counts.
    pub fn normalization_failure(id: String, source: SourceLabel, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            severity: Severity::Unknown,
            urgency: Urgency::Unknown,
            category: ERROR_CATEGORY.to_string(),
            status: AlertStatus::Unknown,
            area: None,
            published: now,
            updated: None,
            expires: None,
            effective: None,
            url: None,
            instructions: None,
            author: None,
            source,
            coordinates: None,
        }
    }
}

/// Handoff from normalization into the storage router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedAlert {
    pub source_id: String,
    pub source_type: SourceType,
    pub alert: CanonicalAlert,
    pub raw: JsonValue,
    /// Set when `alert` is a sentinel standing in for an item that failed.
    #[serde(default)]
    pub normalization_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Severity,
    Category,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Severity => "severity",
            Self::Category => "category",
        }
    }
}

/// Prioritized pattern-to-value rule. An empty `source_types` list applies to
/// every source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    #[serde(default)]
    pub id: Option<String>,
    pub rule_type: RuleType,
    #[serde(default)]
    pub source_types: Vec<SourceType>,
    pub pattern: String,
    pub value: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_confidence() -> f64 {
    1.0
}

impl ClassificationRule {
    pub fn applies_to(&self, source_type: &SourceType) -> bool {
        self.source_types.is_empty() || self.source_types.contains(source_type)
    }
}

/// One processing attempt's terminal outcome. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    pub source_id: String,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub records_processed: usize,
    pub http_status_code: Option<u16>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionQueueItem {
    pub id: Uuid,
    pub source_id: String,
    pub payload: JsonValue,
    pub processing_status: QueueStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionQueueItem {
    pub fn pending(source_id: impl Into<String>, payload: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            payload,
            processing_status: QueueStatus::Pending,
            attempts: 0,
            error: None,
            created_at: now,
            completed_at: None,
        }
    }
}

/// Advisory summary of one processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedQualityMetrics {
    pub source_id: String,
    pub raw_count: usize,
    pub normalized_count: usize,
    pub success_rate: f64,
    pub avg_title_length: f64,
    pub avg_description_length: f64,
    pub severity_distribution: BTreeMap<String, f64>,
    pub category_distribution: BTreeMap<String, f64>,
    pub quality_score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips_known_and_unknown_tags() {
        let parsed: SourceType = serde_json::from_str("\"weather-geocmet\"").unwrap();
        assert_eq!(parsed, SourceType::WeatherGeocmet);
        let other: SourceType = serde_json::from_str("\"pager-feed\"").unwrap();
        assert_eq!(other, SourceType::Other("pager-feed".to_string()));
        assert_eq!(serde_json::to_string(&other).unwrap(), "\"pager-feed\"");
        assert!(other.storage_domain().is_none());
    }

    #[test]
    fn every_recognized_type_has_a_storage_domain() {
        for source_type in SourceType::RECOGNIZED {
            assert!(source_type.storage_domain().is_some(), "{source_type}");
            assert_eq!(SourceType::parse(source_type.as_str()), source_type);
        }
    }

    #[test]
    fn capabilities_parse_from_strings() {
        let caps: Vec<Capability> =
            serde_json::from_str(r#"["api_key", "header:X-Api-Token"]"#).unwrap();
        assert_eq!(
            caps,
            vec![Capability::ApiKey, Capability::Header("X-Api-Token".to_string())]
        );
        assert!(serde_json::from_str::<Capability>("\"telepathy\"").is_err());
    }

    #[test]
    fn normalization_config_defaults_apply_when_fields_missing() {
        let cfg: NormalizationConfig =
            serde_json::from_str(r#"{"field_mapping": {"title": "properties.headline"}}"#).unwrap();
        assert_eq!(cfg.path_for(CanonicalField::Title), Some("properties.headline"));
        assert_eq!(cfg.path_for(CanonicalField::Description), None);
        assert_eq!(cfg.description_max_length, 1000);
        assert!(cfg.strip_prefixes.iter().any(|p| p == "Advisory:"));
    }

    #[test]
    fn value_mapping_lookup_ignores_case() {
        let mut table = BTreeMap::new();
        table.insert("RED".to_string(), "Extreme".to_string());
        assert_eq!(ValueMapping::lookup(&table, "red"), Some("Extreme"));
        assert_eq!(ValueMapping::lookup(&table, "amber"), None);
    }

    #[test]
    fn source_label_inference() {
        assert_eq!(
            SourceLabel::infer("National Alert Ready", "https://example.org"),
            SourceLabel::AlertReady
        );
        assert_eq!(
            SourceLabel::infer("Feed", "https://www.emergencyinfobc.gov.bc.ca/feed"),
            SourceLabel::BcEmergency
        );
        assert_eq!(
            SourceLabel::infer("Everbridge mass notify", "https://api.everbridge.net"),
            SourceLabel::Everbridge
        );
        assert_eq!(SourceLabel::infer("CCCS", "https://cyber.gc.ca"), SourceLabel::Other);
        assert_eq!(
            serde_json::to_string(&SourceLabel::BcEmergency).unwrap(),
            "\"BC Emergency\""
        );
    }

    #[test]
    fn failure_sentinel_keeps_required_fields() {
        let alert = CanonicalAlert::normalization_failure("x".into(), SourceLabel::Other, Utc::now());
        assert_eq!(alert.title, DEFAULT_TITLE);
        assert_eq!(alert.description, DEFAULT_DESCRIPTION);
        assert_eq!(alert.category, ERROR_CATEGORY);
        assert_eq!(alert.status, AlertStatus::Unknown);
    }
}
