//! Per-source-type request policy: accept profile, timeout, retry budget.

use std::time::Duration;

use alertfeed_core::{SourceType, StorageDomain};
use alertfeed_storage::BackoffPolicy;

pub const ACCEPT_GEOJSON: &str = "application/geo+json, application/json;q=0.9, */*;q=0.5";
pub const ACCEPT_RSS: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.5";
pub const ACCEPT_GENERIC: &str = "application/json, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.5";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTypePolicy {
    pub accept: &'static str,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl SourceTypePolicy {
    pub fn for_type(source_type: &SourceType) -> Self {
        let retrying = BackoffPolicy::default();
        let fail_fast = BackoffPolicy::fail_fast();
        let (accept, timeout_secs, backoff) = match source_type {
            SourceType::SecurityRss => (ACCEPT_RSS, 30, retrying),
            SourceType::WeatherGeocmet => (ACCEPT_GEOJSON, 60, retrying),
            SourceType::Geojson => (ACCEPT_GEOJSON, 20, retrying),
            SourceType::Weather => (ACCEPT_GEOJSON, 20, fail_fast),
            SourceType::ImmigrationTravelAtom | SourceType::GovernmentAnnouncements => {
                (ACCEPT_RSS, 30, fail_fast)
            }
            SourceType::Rss => (ACCEPT_RSS, 20, fail_fast),
            SourceType::Emergency | SourceType::CustomApi => (ACCEPT_GENERIC, 15, fail_fast),
            SourceType::Other(_) => (ACCEPT_GENERIC, 10, fail_fast),
        };
        Self {
            accept,
            timeout: Duration::from_secs(timeout_secs),
            backoff,
        }
    }
}

/// Category used when neither rules, keywords nor the value mapping resolve one.
pub fn default_category(source_type: &SourceType) -> &'static str {
    match source_type {
        SourceType::SecurityRss => "Security",
        SourceType::GovernmentAnnouncements => "Government",
        SourceType::ImmigrationTravelAtom => "Travel",
        other => match other.storage_domain() {
            Some(StorageDomain::Weather) => "Weather",
            _ => alertfeed_core::DEFAULT_CATEGORY,
        },
    }
}
