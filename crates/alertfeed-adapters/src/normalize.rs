//! Raw item to canonical alert.

use alertfeed_core::{
    AlertSource, CanonicalAlert, CanonicalField, Coordinates, NormalizationConfig, SourceLabel,
    StagedAlert, DEFAULT_DESCRIPTION, DEFAULT_TITLE,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classify::{Classifier, RawSignals};
use crate::policy::default_category;
use crate::text::{clean_description, clean_title, collapse_whitespace};

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("item {index} is a json {kind}, expected an object")]
    NotAnObject { index: usize, kind: &'static str },
}

/// Walk a dotted path. Integer segments index arrays; null counts as absent.
pub fn extract_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        cur = match cur {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!cur.is_null()).then_some(cur)
}

/// Text form of a scalar, an array of scalars, or a `{name: ...}` object.
pub fn value_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        JsonValue::Object(map) => return map.get("name").and_then(value_text),
        JsonValue::Null => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Parse the date shapes seen across feeds. `None` if nothing fits.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        return if epoch.unsigned_abs() > 100_000_000_000 {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    None
}

/// Publish time always resolves; unparseable input becomes `now`.
pub fn resolve_published(raw: Option<&str>, now: DateTime<Utc>, source_id: &str) -> DateTime<Utc> {
    match raw {
        Some(value) => parse_datetime(value).unwrap_or_else(|| {
            warn!(source_id, raw = value, "unparseable publish date; defaulting to now");
            now
        }),
        None => {
            debug!(source_id, "item has no publish date; defaulting to now");
            now
        }
    }
}

fn number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn valid(latitude: f64, longitude: f64) -> Option<Coordinates> {
    let ok = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);
    ok.then_some(Coordinates { latitude, longitude })
}

fn collect_positions(value: &JsonValue, out: &mut Vec<(f64, f64)>) {
    let Some(items) = value.as_array() else {
        return;
    };
    match (items.first().and_then(number), items.get(1).and_then(number)) {
        (Some(lon), Some(lat)) => out.push((lon, lat)),
        _ => items.iter().for_each(|inner| collect_positions(inner, out)),
    }
}

/// GeoJSON-ordered position(s): a point, or the mean of a line/polygon ring.
fn from_positions(value: &JsonValue) -> Option<Coordinates> {
    let mut positions = Vec::new();
    collect_positions(value, &mut positions);
    if positions.is_empty() {
        return None;
    }
    let n = positions.len() as f64;
    let (lon, lat) = positions
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    valid(lat / n, lon / n)
}

fn from_scalars(value: &JsonValue) -> Option<Coordinates> {
    const PAIRS: [(&str, &str); 3] = [("latitude", "longitude"), ("lat", "lng"), ("lat", "lon")];
    PAIRS.iter().find_map(|(lat_key, lon_key)| {
        let lat = value.get(*lat_key).and_then(number)?;
        let lon = value.get(*lon_key).and_then(number)?;
        valid(lat, lon)
    })
}

/// Never fails: anything unresolvable or out of range is `None`.
pub fn extract_coordinates(raw: &JsonValue, config: Option<&NormalizationConfig>) -> Option<Coordinates> {
    if let Some(config) = config {
        if let Some(coords) = config
            .path_for(CanonicalField::Coordinates)
            .and_then(|path| extract_path(raw, path))
            .and_then(from_positions)
        {
            return Some(coords);
        }
        let lat = config
            .path_for(CanonicalField::Latitude)
            .and_then(|path| extract_path(raw, path))
            .and_then(number);
        let lon = config
            .path_for(CanonicalField::Longitude)
            .and_then(|path| extract_path(raw, path))
            .and_then(number);
        if let Some(coords) = lat.zip(lon).and_then(|(lat, lon)| valid(lat, lon)) {
            return Some(coords);
        }
    }

    extract_path(raw, "geometry.coordinates")
        .and_then(from_positions)
        .or_else(|| raw.get("coordinates").and_then(from_positions))
        .or_else(|| from_scalars(raw))
        .or_else(|| raw.get("properties").and_then(from_scalars))
}

fn legacy_keys(field: CanonicalField) -> &'static [&'static str] {
    match field {
        CanonicalField::Id => &["id", "guid", "identifier"],
        CanonicalField::Title => &["title", "headline", "name", "event"],
        CanonicalField::Description => &["description", "summary", "content", "body", "text"],
        CanonicalField::Severity => &["severity", "level", "priority"],
        CanonicalField::Urgency => &["urgency"],
        CanonicalField::Category => &["category", "type", "event_type", "event"],
        CanonicalField::Status => &["status"],
        CanonicalField::Area => &["area", "areaDesc", "location", "region"],
        CanonicalField::Published => &["published", "pubDate", "sent", "date", "created_at", "updated"],
        CanonicalField::Updated => &["updated", "modified"],
        CanonicalField::Expires => &["expires"],
        CanonicalField::Effective => &["effective", "onset"],
        CanonicalField::Url => &["url", "link", "web"],
        CanonicalField::Instructions => &["instruction", "instructions"],
        CanonicalField::Author => &["author", "sender", "senderName"],
        CanonicalField::Latitude | CanonicalField::Longitude | CanonicalField::Coordinates => &[],
    }
}

/// Per-item normalization results for one fetch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub alerts: Vec<StagedAlert>,
    pub failures: usize,
}

/// Converts one source's raw items, using its field mapping when configured
/// and fixed candidate keys otherwise.
pub struct Normalizer<'a> {
    source: &'a AlertSource,
    config: Option<&'a NormalizationConfig>,
    fallback_config: NormalizationConfig,
    classifier: &'a Classifier,
    label: SourceLabel,
}

impl<'a> Normalizer<'a> {
    pub fn new(source: &'a AlertSource, classifier: &'a Classifier) -> Self {
        Self {
            source,
            config: source.configuration.normalization.as_ref(),
            fallback_config: NormalizationConfig::default(),
            classifier,
            label: SourceLabel::infer(&source.name, &source.api_endpoint),
        }
    }

    fn config(&self) -> &NormalizationConfig {
        self.config.unwrap_or(&self.fallback_config)
    }

    fn field(&self, raw: &JsonValue, field: CanonicalField) -> Option<String> {
        if let Some(path) = self.config.and_then(|c| c.path_for(field)) {
            return extract_path(raw, path).and_then(value_text);
        }
        let properties = raw.get("properties");
        legacy_keys(field).iter().find_map(|key| {
            raw.get(*key)
                .and_then(value_text)
                .or_else(|| properties.and_then(|p| p.get(*key)).and_then(value_text))
        })
    }

    fn optional_date(&self, raw: &JsonValue, field: CanonicalField) -> Option<DateTime<Utc>> {
        let value = self.field(raw, field)?;
        let parsed = parse_datetime(&value);
        if parsed.is_none() {
            debug!(source_id = %self.source.id, field = field.as_str(), raw = %value, "ignoring unparseable date");
        }
        parsed
    }

    fn fallback_id(&self, raw: &JsonValue, title: &str) -> String {
        let link = self.field(raw, CanonicalField::Url).unwrap_or_default();
        let published = self.field(raw, CanonicalField::Published).unwrap_or_default();
        let key = format!("{}|{}|{}|{}", self.source.id, link, title, published);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
    }

    pub fn normalize_item(
        &self,
        index: usize,
        raw: &JsonValue,
        now: DateTime<Utc>,
    ) -> Result<CanonicalAlert, NormalizationError> {
        if !raw.is_object() {
            return Err(NormalizationError::NotAnObject {
                index,
                kind: json_kind(raw),
            });
        }
        let config = self.config();

        let raw_title = self.field(raw, CanonicalField::Title).unwrap_or_default();
        let title = clean_title(&raw_title, &config.strip_prefixes, &config.strip_suffixes);
        let title = if title.is_empty() { DEFAULT_TITLE.to_string() } else { title };

        let raw_description = self.field(raw, CanonicalField::Description).unwrap_or_default();
        let description = clean_description(&raw_description, config.description_max_length);
        let description = if description.is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            description
        };

        let id = self
            .field(raw, CanonicalField::Id)
            .unwrap_or_else(|| self.fallback_id(raw, &raw_title));

        let severity = self.field(raw, CanonicalField::Severity);
        let urgency = self.field(raw, CanonicalField::Urgency);
        let status = self.field(raw, CanonicalField::Status);
        let category = self.field(raw, CanonicalField::Category);
        let signals = RawSignals {
            title: &title,
            description: &description,
            severity: severity.as_deref(),
            urgency: urgency.as_deref(),
            status: status.as_deref(),
            category: category.as_deref(),
        };
        let fallback_category = config
            .default_category
            .as_deref()
            .unwrap_or_else(|| default_category(&self.source.source_type));
        let classification = self.classifier.classify(
            &self.source.source_type,
            &signals,
            &config.value_mapping,
            fallback_category,
        );

        let published_raw = self.field(raw, CanonicalField::Published);
        Ok(CanonicalAlert {
            id,
            title,
            description,
            severity: classification.severity,
            urgency: classification.urgency,
            category: classification.category,
            status: classification.status,
            area: self
                .field(raw, CanonicalField::Area)
                .map(|a| collapse_whitespace(&a)),
            published: resolve_published(published_raw.as_deref(), now, &self.source.id),
            updated: self.optional_date(raw, CanonicalField::Updated),
            expires: self.optional_date(raw, CanonicalField::Expires),
            effective: self.optional_date(raw, CanonicalField::Effective),
            url: self.field(raw, CanonicalField::Url),
            instructions: self.field(raw, CanonicalField::Instructions),
            author: self.field(raw, CanonicalField::Author),
            source: self.label,
            coordinates: extract_coordinates(raw, self.config),
        })
    }

    /// Output has one alert per input item; failed items become sentinels.
    pub fn normalize_batch(&self, raw_items: &[JsonValue], now: DateTime<Utc>) -> NormalizedBatch {
        let mut batch = NormalizedBatch {
            alerts: Vec::with_capacity(raw_items.len()),
            failures: 0,
        };
        for (index, raw) in raw_items.iter().enumerate() {
            let (alert, normalization_failed) = match self.normalize_item(index, raw, now) {
                Ok(alert) => (alert, false),
                Err(err) => {
                    warn!(source_id = %self.source.id, index, error = %err, "normalization failed; substituting sentinel");
                    batch.failures += 1;
                    let key = format!("{}|failed|{}|{}", self.source.id, index, raw);
                    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string();
                    (CanonicalAlert::normalization_failure(id, self.label, now), true)
                }
            };
            batch.alerts.push(StagedAlert {
                source_id: self.source.id.clone(),
                source_type: self.source.source_type.clone(),
                alert,
                raw: raw.clone(),
                normalization_failed,
            });
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertfeed_core::{AlertStatus, HealthStatus, Severity, SourceConfiguration, SourceType, Urgency};
    use chrono::TimeZone;
    use serde_json::json;

    fn source(source_type: SourceType, normalization: Option<NormalizationConfig>) -> AlertSource {
        AlertSource {
            id: "src-1".to_string(),
            name: "Test feed".to_string(),
            source_type,
            api_endpoint: "https://example.org/feed".to_string(),
            is_active: true,
            polling_interval_secs: 300,
            last_poll_at: None,
            health_status: HealthStatus::Unknown,
            configuration: SourceConfiguration {
                normalization,
                ..SourceConfiguration::default()
            },
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn extract_path_walks_objects_and_arrays() {
        let value = json!({"properties": {"names": ["a", "b"], "empty": null}});
        assert_eq!(extract_path(&value, "properties.names.1"), Some(&json!("b")));
        assert_eq!(extract_path(&value, "properties.missing.deeper"), None);
        assert_eq!(extract_path(&value, "properties.empty"), None);
        assert_eq!(extract_path(&value, "properties.names.x"), None);
    }

    #[test]
    fn dates_in_common_shapes_parse() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(parse_datetime("2024-01-02T15:04:05Z"), Some(expected));
        assert_eq!(parse_datetime("Tue, 02 Jan 2024 15:04:05 GMT"), Some(expected));
        assert_eq!(parse_datetime("Tue, 02 Jan 2024 10:04:05 -0500"), Some(expected));
        assert_eq!(parse_datetime("2024-01-02 15:04:05"), Some(expected));
        assert_eq!(parse_datetime("1704207845"), Some(expected));
        assert_eq!(parse_datetime("1704207845000"), Some(expected));
        assert_eq!(
            parse_datetime("2024-01-02"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("next tuesday"), None);
    }

    #[test]
    fn unparseable_published_dates_resolve_to_now() {
        for raw in ["", "not a date", "32/13/2024", "2024-13-45T99:99:99Z"] {
            assert_eq!(resolve_published(Some(raw), now(), "src"), now(), "{raw}");
        }
        assert_eq!(resolve_published(None, now(), "src"), now());
    }

    #[test]
    fn coordinates_prefer_geometry_then_fallbacks() {
        let point = json!({"geometry": {"type": "Point", "coordinates": [-123.1, 49.25]}});
        let coords = extract_coordinates(&point, None).unwrap();
        assert_eq!((coords.latitude, coords.longitude), (49.25, -123.1));

        let polygon = json!({"geometry": {"type": "Polygon", "coordinates": [[[-124.0, 49.0], [-122.0, 49.0], [-122.0, 51.0], [-124.0, 51.0]]]}});
        let coords = extract_coordinates(&polygon, None).unwrap();
        assert_eq!((coords.latitude, coords.longitude), (50.0, -123.0));

        let generic = json!({"coordinates": [10.5, 20.25]});
        assert_eq!(extract_coordinates(&generic, None).unwrap().latitude, 20.25);

        let scalars = json!({"properties": {"lat": "45.5", "lng": "-73.6"}});
        assert_eq!(extract_coordinates(&scalars, None).unwrap().longitude, -73.6);

        assert!(extract_coordinates(&json!({"lat": 123.0, "lng": 10.0}), None).is_none());
        assert!(extract_coordinates(&json!({"geometry": null}), None).is_none());
    }

    #[test]
    fn configured_mapping_reads_nested_paths() {
        let mut config = NormalizationConfig::default();
        for (field, path) in [
            ("id", "properties.identifier"),
            ("title", "properties.headline"),
            ("description", "properties.descrip_en"),
            ("severity", "properties.risk_colour"),
            ("published", "properties.publication_datetime"),
            ("area", "properties.feature_name_en"),
        ] {
            config.field_mapping.insert(field.to_string(), path.to_string());
        }
        config
            .value_mapping
            .severity
            .insert("red".to_string(), "Extreme".to_string());
        let source = source(SourceType::WeatherGeocmet, Some(config));
        let classifier = Classifier::default();
        let normalizer = Normalizer::new(&source, &classifier);

        let raw = json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [-123.1, 49.25]},
            "properties": {
                "identifier": "geomet-1",
                "headline": "Warning: Rainfall  warning - Canada.ca",
                "descrip_en": "<p>Up to 80 mm.</p>",
                "risk_colour": "red",
                "publication_datetime": "2024-05-30T08:00:00Z",
                "feature_name_en": "Metro   Vancouver"
            }
        });
        let alert = normalizer.normalize_item(0, &raw, now()).unwrap();
        assert_eq!(alert.id, "geomet-1");
        assert_eq!(alert.title, "Rainfall warning");
        assert_eq!(alert.description, "Up to 80 mm.");
        assert_eq!(alert.severity, Severity::Extreme);
        assert_eq!(alert.category, "Weather");
        assert_eq!(alert.area.as_deref(), Some("Metro Vancouver"));
        assert_eq!(alert.published, Utc.with_ymd_and_hms(2024, 5, 30, 8, 0, 0).unwrap());
        assert!(alert.coordinates.is_some());
        assert_eq!(alert.status, AlertStatus::Actual);
    }

    #[test]
    fn legacy_keys_cover_cap_leaves_and_properties() {
        let source = source(SourceType::Emergency, None);
        let classifier = Classifier::default();
        let normalizer = Normalizer::new(&source, &classifier);
        let raw = json!({
            "identifier": "cap-9",
            "headline": "Tsunami bulletin",
            "severity": "Moderate",
            "urgency": "Expected",
            "status": "Exercise",
            "areaDesc": "Coastal BC",
            "sent": "2024-05-01T12:00:00-07:00",
            "instruction": "Move to higher ground"
        });
        let alert = normalizer.normalize_item(0, &raw, now()).unwrap();
        assert_eq!(alert.id, "cap-9");
        assert_eq!(alert.title, "Tsunami bulletin");
        assert_eq!(alert.severity, Severity::Moderate);
        assert_eq!(alert.urgency, Urgency::Expected);
        assert_eq!(alert.status, AlertStatus::Exercise);
        assert_eq!(alert.category, "Emergency");
        assert_eq!(alert.instructions.as_deref(), Some("Move to higher ground"));
        assert_eq!(alert.published, Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap());
    }

    #[test]
    fn missing_title_and_description_get_sentinels() {
        let source = source(SourceType::Rss, None);
        let classifier = Classifier::default();
        let normalizer = Normalizer::new(&source, &classifier);
        let alert = normalizer
            .normalize_item(0, &json!({"link": "https://example.org/a", "pubDate": "garbage"}), now())
            .unwrap();
        assert_eq!(alert.title, DEFAULT_TITLE);
        assert_eq!(alert.description, DEFAULT_DESCRIPTION);
        assert_eq!(alert.published, now());
        assert_eq!(alert.severity, Severity::Unknown);
        assert_eq!(alert.category, "General");
    }

    #[test]
    fn ids_without_guid_are_stable_across_runs() {
        let source = source(SourceType::SecurityRss, None);
        let classifier = Classifier::default();
        let normalizer = Normalizer::new(&source, &classifier);
        let raw = json!({"title": "Advisory", "link": "https://example.org/1"});
        let first = normalizer.normalize_item(0, &raw, now()).unwrap();
        let second = normalizer.normalize_item(3, &raw, Utc::now()).unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.id, normalizer.normalize_item(0, &json!({"title": "Other"}), now()).unwrap().id);
    }

    #[test]
    fn batch_keeps_counts_with_failure_sentinels() {
        let source = source(SourceType::SecurityRss, None);
        let classifier = Classifier::default();
        let normalizer = Normalizer::new(&source, &classifier);
        let items = vec![json!({"title": "One"}), json!("not an object"), json!({"title": "Three"})];
        let batch = normalizer.normalize_batch(&items, now());
        assert_eq!(batch.alerts.len(), 3);
        assert_eq!(batch.failures, 1);
        assert!(batch.alerts[1].normalization_failed);
        assert!(!batch.alerts[0].normalization_failed);
        assert_eq!(batch.alerts[1].raw, json!("not an object"));
        assert_eq!(batch.alerts[0].alert.category, "Security");
    }
}
