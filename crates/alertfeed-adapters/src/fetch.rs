//! Source-aware fetch and content-type dispatch.

use std::time::Duration;

use alertfeed_core::AlertSource;
use alertfeed_storage::{FeedFetcher, FetchError, FetchRequest, FetchedResponse};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use crate::feed::{json_items, parse_feed, FeedItem};
use crate::policy::SourceTypePolicy;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unreadable json body from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl FeedError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Fetch(err) => err.http_status(),
            Self::Parse(_) => None,
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPayload {
    Json(JsonValue),
    Items(Vec<FeedItem>),
    Text(String),
}

impl FeedPayload {
    /// Raw item records, in feed order. Plain text yields nothing.
    pub fn raw_items(&self, items_path: Option<&str>) -> Vec<JsonValue> {
        match self {
            Self::Json(body) => json_items(body, items_path),
            Self::Items(items) => items.iter().map(FeedItem::to_json).collect(),
            Self::Text(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFeed {
    pub http_status: u16,
    pub payload: FeedPayload,
}

/// Build the outbound request: type accept profile, configured headers, bearer key.
pub fn build_request(source: &AlertSource) -> FetchRequest {
    let policy = SourceTypePolicy::for_type(&source.source_type);
    let config = &source.configuration;

    let mut headers: Vec<(String, String)> = config
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        headers.push(("Authorization".to_string(), format!("Bearer {}", key.trim())));
    }

    FetchRequest {
        source_id: source.id.clone(),
        url: source.api_endpoint.clone(),
        accept: policy.accept.to_string(),
        headers,
        timeout: config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(policy.timeout),
    }
}

pub async fn fetch_feed(fetcher: &dyn FeedFetcher, source: &AlertSource) -> Result<FetchedFeed, FeedError> {
    let request = build_request(source);
    let response = fetcher.fetch(&request).await?;
    let payload = decode_body(&response)?;
    Ok(FetchedFeed {
        http_status: response.status,
        payload,
    })
}

enum BodyKind {
    Json,
    Xml,
    Other,
}

fn body_kind(content_type: Option<&str>) -> BodyKind {
    let Some(content_type) = content_type else {
        return BodyKind::Other;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime.contains("json") {
        BodyKind::Json
    } else if mime.contains("xml") || mime.contains("rss") || mime.contains("atom") {
        BodyKind::Xml
    } else {
        BodyKind::Other
    }
}

/// Dispatch on content type. Untyped or `text/plain` bodies are sniffed, since
/// many feed hosts serve RSS and JSON without a useful content type.
pub fn decode_body(response: &FetchedResponse) -> Result<FeedPayload, ParseError> {
    let text = String::from_utf8_lossy(&response.body);
    let text = text.trim_start_matches('\u{feff}');

    let kind = match body_kind(response.content_type.as_deref()) {
        BodyKind::Other => {
            let head = text.trim_start();
            if head.starts_with('<') {
                BodyKind::Xml
            } else if head.starts_with('{') || head.starts_with('[') {
                BodyKind::Json
            } else {
                BodyKind::Other
            }
        }
        known => known,
    };

    let payload = match kind {
        BodyKind::Json => {
            let body = serde_json::from_str(text).map_err(|source| ParseError::Json {
                url: response.final_url.clone(),
                source,
            })?;
            FeedPayload::Json(body)
        }
        BodyKind::Xml => FeedPayload::Items(parse_feed(text)),
        BodyKind::Other => FeedPayload::Text(text.to_string()),
    };
    debug!(
        content_type = response.content_type.as_deref().unwrap_or("-"),
        bytes = response.body.len(),
        "decoded feed body"
    );
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertfeed_core::{HealthStatus, SourceConfiguration, SourceType};
    use async_trait::async_trait;
    use serde_json::json;

    fn response(content_type: Option<&str>, body: &str) -> FetchedResponse {
        FetchedResponse {
            status: 200,
            final_url: "https://example.org/feed".to_string(),
            content_type: content_type.map(ToString::to_string),
            body: body.as_bytes().to_vec(),
            elapsed: Duration::from_millis(5),
        }
    }

    fn source(source_type: SourceType, configuration: SourceConfiguration) -> AlertSource {
        AlertSource {
            id: "src".to_string(),
            name: "Source".to_string(),
            source_type,
            api_endpoint: "https://example.org/feed".to_string(),
            is_active: true,
            polling_interval_secs: 300,
            last_poll_at: None,
            health_status: HealthStatus::Unknown,
            configuration,
        }
    }

    #[test]
    fn json_content_is_parsed_directly() {
        let payload = decode_body(&response(Some("application/geo+json"), r#"{"features": [{}]}"#)).unwrap();
        assert_eq!(payload, FeedPayload::Json(json!({"features": [{}]})));
        assert_eq!(payload.raw_items(None).len(), 1);
    }

    #[test]
    fn xml_content_goes_through_feed_parser() {
        let body = "<rss><channel><item><title>A</title></item></channel></rss>";
        let payload = decode_body(&response(Some("application/rss+xml; charset=utf-8"), body)).unwrap();
        match &payload {
            FeedPayload::Items(items) => assert_eq!(items[0].title.as_deref(), Some("A")),
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(payload.raw_items(None)[0]["title"], "A");
    }

    #[test]
    fn untyped_bodies_are_sniffed_and_plain_text_kept_raw() {
        let payload = decode_body(&response(Some("text/plain"), "  <feed><entry><title>T</title></entry></feed>")).unwrap();
        assert!(matches!(payload, FeedPayload::Items(ref items) if items.len() == 1));

        let payload = decode_body(&response(None, "[{\"id\": 1}]")).unwrap();
        assert!(matches!(payload, FeedPayload::Json(_)));

        let payload = decode_body(&response(Some("text/html"), "maintenance window")).unwrap();
        assert_eq!(payload, FeedPayload::Text("maintenance window".to_string()));
        assert!(payload.raw_items(None).is_empty());
    }

    #[test]
    fn unreadable_json_is_a_parse_error() {
        let err = decode_body(&response(Some("application/json"), "{not json")).unwrap_err();
        assert!(err.to_string().contains("unreadable json body"));
    }

    #[test]
    fn request_carries_policy_headers_and_bearer_key() {
        let mut configuration = SourceConfiguration {
            api_key: Some("s3cret".to_string()),
            ..SourceConfiguration::default()
        };
        configuration
            .headers
            .insert("X-Client".to_string(), "alertfeed".to_string());
        let request = build_request(&source(SourceType::SecurityRss, configuration));

        assert!(request.accept.starts_with("application/rss+xml"));
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Bearer s3cret".to_string())));
        assert!(request
            .headers
            .contains(&("X-Client".to_string(), "alertfeed".to_string())));
    }

    #[test]
    fn configured_timeout_overrides_policy() {
        let configuration = SourceConfiguration {
            timeout_secs: Some(7),
            ..SourceConfiguration::default()
        };
        let request = build_request(&source(SourceType::WeatherGeocmet, configuration));
        assert_eq!(request.timeout, Duration::from_secs(7));
    }

    struct FailingFetcher;

    #[async_trait]
    impl FeedFetcher for FailingFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
            Err(FetchError::HttpStatus {
                status: 404,
                reason: "Not Found".to_string(),
                url: request.url.clone(),
            })
        }
    }

    #[tokio::test]
    async fn fetch_errors_keep_http_status() {
        let err = fetch_feed(&FailingFetcher, &source(SourceType::Rss, SourceConfiguration::default()))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(404));
    }
}
