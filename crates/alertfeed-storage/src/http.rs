//! HTTP retrieval of feed endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: u16) -> RetryDisposition {
    match StatusCode::from_u16(status) {
        Ok(code) if code.is_server_error() || code == StatusCode::TOO_MANY_REQUESTS => {
            RetryDisposition::Retryable
        }
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded exponential backoff. `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn fail_fast() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn retries(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay before retry number `attempt_index + 1`.
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            global_concurrency: 16,
        }
    }
}

/// Everything needed to issue one feed GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source_id: String,
    pub url: String,
    pub accept: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} {reason} for {url}")]
    HttpStatus {
        status: u16,
        reason: String,
        url: String,
    },
    #[error("reading body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("transport unavailable: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Request { source, .. } => source.status().map(|s| s.as_u16()),
            Self::Body { .. } | Self::Transport(_) => None,
        }
    }

    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::HttpStatus { status, .. } => classify_status(*status),
            Self::Request { source, .. } => classify_reqwest_error(source),
            Self::Body { .. } | Self::Transport(_) => RetryDisposition::Retryable,
        }
    }
}

/// Transport seam between feed processing and the network.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    async fn send(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("fetcher is shutting down".to_string()))?;

        let started = Instant::now();
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .header(ACCEPT, request.accept.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder.send().await.map_err(|source| FetchError::Request {
            url: request.url.clone(),
            source,
        })?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
                url: final_url,
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Body {
                url: final_url.clone(),
                source,
            })?
            .to_vec();

        debug!(status = status.as_u16(), bytes = body.len(), "feed fetched");
        Ok(FetchedResponse {
            status: status.as_u16(),
            final_url,
            content_type,
            body,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id = %request.source_id, url = %request.url);
        self.send(request).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_for(server: &MockServer, route: &str) -> FetchRequest {
        FetchRequest {
            source_id: "src-1".to_string(),
            url: format!("{}{}", server.uri(), route),
            accept: "application/rss+xml".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer k3y".to_string())],
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
        assert!(!BackoffPolicy::fail_fast().retries());
    }

    #[test]
    fn status_dispositions() {
        assert_eq!(classify_status(503), RetryDisposition::Retryable);
        assert_eq!(classify_status(429), RetryDisposition::Retryable);
        assert_eq!(classify_status(404), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn fetch_sends_accept_and_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("accept", "application/rss+xml"))
            .and(header("authorization", "Bearer k3y"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<rss></rss>", "application/rss+xml; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let resp = fetcher.fetch(&request_for(&server, "/feed")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.content_type.as_deref(),
            Some("application/rss+xml; charset=utf-8")
        );
        assert_eq!(resp.body, b"<rss></rss>");
    }

    #[tokio::test]
    async fn non_success_status_becomes_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let err = fetcher
            .fetch(&request_for(&server, "/down"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(503));
        assert_eq!(err.disposition(), RetryDisposition::Retryable);
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[tokio::test]
    async fn slow_response_times_out_as_retryable_without_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let request = FetchRequest {
            timeout: Duration::from_millis(200),
            ..request_for(&server, "/slow")
        };
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(&err, FetchError::Request { source, .. } if source.is_timeout()));
        assert_eq!(err.http_status(), None);
        assert_eq!(err.disposition(), RetryDisposition::Retryable);
    }
}
