//! Persisted record shapes, one per storage table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlertRow {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub summary: String,
    pub link: Option<String>,
    pub pub_date: DateTime<Utc>,
    pub source: String,
    pub category: String,
    pub location: Option<String>,
    pub raw_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlertRow {
    pub id: String,
    pub source_id: String,
    pub description: String,
    pub severity: String,
    pub event_type: String,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    /// `[longitude, latitude]`, GeoJSON order.
    pub geometry_coordinates: Option<JsonValue>,
    pub raw_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelAnnouncementRow {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub link: Option<String>,
    pub pub_date: DateTime<Utc>,
    pub source: String,
    pub category: String,
    pub announcement_type: String,
    pub location: Option<String>,
    pub raw_data: JsonValue,
}
