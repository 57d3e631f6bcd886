use std::sync::Arc;
use std::time::Duration;

use alertfeed_core::{AlertSource, HealthStatus, SourceConfiguration, SourceType};
use alertfeed_storage::{HttpClientConfig, HttpFetcher, MemoryStore};
use alertfeed_sync::{StaticRuleProvider, SyncConfig, SyncPipeline};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn slow_source(endpoint: String) -> AlertSource {
    AlertSource {
        id: "slow".to_string(),
        name: "Slow feed".to_string(),
        source_type: SourceType::SecurityRss,
        api_endpoint: endpoint,
        is_active: true,
        polling_interval_secs: 300,
        last_poll_at: None,
        health_status: HealthStatus::Unknown,
        configuration: SourceConfiguration {
            timeout_secs: Some(1),
            ..SourceConfiguration::default()
        },
    }
}

#[tokio::test]
async fn timed_out_fetches_are_retried_and_recorded_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/alerts.rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<rss version=\"2.0\"><channel></channel></rss>", "application/rss+xml")
                .set_delay(Duration::from_secs(3)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::with_sources([slow_source(format!(
        "{}/alerts.rss",
        server.uri()
    ))]));
    let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
    let config = SyncConfig {
        retry_base_delay: Duration::from_millis(1),
        ..SyncConfig::default()
    };
    let pipeline = SyncPipeline::new(
        config,
        store.clone(),
        store.clone(),
        Arc::new(StaticRuleProvider::new(vec![])),
        fetcher,
    );

    let report = pipeline.run_source("slow").await.unwrap();
    assert!(!report.success);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.http_status, None);

    let health = store.health_metrics().await;
    assert_eq!(health.len(), 1);
    assert!(!health[0].success);
    assert_eq!(health[0].http_status_code, None);
    assert_eq!(health[0].records_processed, 0);
    assert!(store.security_alerts().await.is_empty());
}
