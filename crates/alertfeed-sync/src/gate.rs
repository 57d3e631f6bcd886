//! Advisory polling gates consulted by the batch driver.

use std::fmt;

use alertfeed_core::{AlertSource, Capability, SourceConfiguration};
use chrono::{DateTime, Duration, Utc};

/// Endpoints known to reject anonymous polling, by host fragment.
const KNOWN_REQUIREMENTS: [(&str, Capability); 1] = [("everbridge", Capability::ApiKey)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    MissingCapability(Capability),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => f.write_str("source is inactive"),
            Self::MissingCapability(Capability::ApiKey) => f.write_str("requires an API key that is not configured"),
            Self::MissingCapability(Capability::Header(name)) => {
                write!(f, "requires header `{name}` that is not configured")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Poll,
    NotDue,
    Skip(SkipReason),
}

/// Never polled, or at least one polling interval has elapsed.
pub fn is_due(source: &AlertSource, now: DateTime<Utc>) -> bool {
    match source.last_poll_at {
        None => true,
        Some(last) => {
            let interval = Duration::seconds(i64::try_from(source.polling_interval_secs).unwrap_or(i64::MAX));
            now.signed_duration_since(last) >= interval
        }
    }
}

fn has_header(config: &SourceConfiguration, name: &str) -> bool {
    config
        .headers
        .iter()
        .any(|(key, value)| key.eq_ignore_ascii_case(name) && !value.trim().is_empty())
}

fn satisfied(capability: &Capability, config: &SourceConfiguration) -> bool {
    match capability {
        Capability::ApiKey => {
            config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
                || has_header(config, "Authorization")
        }
        Capability::Header(name) => has_header(config, name),
    }
}

pub fn required_capabilities(source: &AlertSource) -> Vec<Capability> {
    let endpoint = source.api_endpoint.to_ascii_lowercase();
    let mut required = source.configuration.requires.clone();
    for (fragment, capability) in KNOWN_REQUIREMENTS {
        if endpoint.contains(fragment) && !required.contains(&capability) {
            required.push(capability);
        }
    }
    required
}

/// `Some(reason)` when the source cannot be polled as configured.
pub fn should_skip(source: &AlertSource) -> Option<SkipReason> {
    if !source.is_active {
        return Some(SkipReason::Inactive);
    }
    required_capabilities(source)
        .into_iter()
        .find(|capability| !satisfied(capability, &source.configuration))
        .map(SkipReason::MissingCapability)
}

pub fn evaluate(source: &AlertSource, now: DateTime<Utc>) -> GateDecision {
    if let Some(reason) = should_skip(source) {
        return GateDecision::Skip(reason);
    }
    if !is_due(source, now) {
        return GateDecision::NotDue;
    }
    GateDecision::Poll
}
