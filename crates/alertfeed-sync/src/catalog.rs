//! File-backed source catalog.

use std::collections::BTreeMap;
use std::path::Path;

use alertfeed_core::AlertSource;
use alertfeed_storage::{SourceCatalog, StorageError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<AlertSource>,
}

/// `sources.yaml` as a read-only catalog. Poll times are tracked in memory
/// for the life of the process.
#[derive(Debug)]
pub struct YamlSourceCatalog {
    sources: BTreeMap<String, AlertSource>,
    polled: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl YamlSourceCatalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text)?;
        Self::from_registry(registry)
    }

    pub fn from_registry(registry: SourceRegistry) -> Result<Self> {
        let mut sources = BTreeMap::new();
        for source in registry.sources {
            if let Some(previous) = sources.insert(source.id.clone(), source) {
                anyhow::bail!("duplicate source id `{}`", previous.id);
            }
        }
        Ok(Self {
            sources,
            polled: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    async fn with_poll_time(&self, mut source: AlertSource) -> AlertSource {
        if let Some(at) = self.polled.lock().await.get(&source.id) {
            source.last_poll_at = Some(*at);
        }
        source
    }
}

#[async_trait]
impl SourceCatalog for YamlSourceCatalog {
    async fn active_sources(&self) -> Result<Vec<AlertSource>, StorageError> {
        let mut out = Vec::new();
        for source in self.sources.values().filter(|s| s.is_active) {
            out.push(self.with_poll_time(source.clone()).await);
        }
        Ok(out)
    }

    async fn source(&self, id: &str) -> Result<Option<AlertSource>, StorageError> {
        match self.sources.get(id) {
            Some(source) => Ok(Some(self.with_poll_time(source.clone()).await)),
            None => Ok(None),
        }
    }

    async fn mark_polled(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        if !self.sources.contains_key(id) {
            return Err(StorageError::Catalog(format!("unknown source {id}")));
        }
        self.polled.lock().await.insert(id.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertfeed_core::{Capability, SourceType};
    use std::io::Write;

    const YAML: &str = r#"
sources:
  - id: cccs-advisories
    name: Canadian Centre for Cyber Security
    source_type: security-rss
    api_endpoint: https://www.cyber.gc.ca/api/cccs/rss/v1/get?feed=alerts_advisories&lang=en
    polling_interval_secs: 900
  - id: everbridge
    name: Everbridge
    source_type: custom-api
    api_endpoint: https://api.everbridge.net/alerts
    is_active: false
    configuration:
      requires: [api_key]
      headers:
        X-Org: "42"
"#;

    #[tokio::test]
    async fn loads_yaml_and_filters_inactive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let catalog = YamlSourceCatalog::load(file.path()).await.unwrap();
        assert_eq!(catalog.len(), 2);

        let active = catalog.active_sources().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].source_type, SourceType::SecurityRss);
        assert_eq!(active[0].polling_interval_secs, 900);

        let everbridge = catalog.source("everbridge").await.unwrap().unwrap();
        assert_eq!(everbridge.configuration.requires, vec![Capability::ApiKey]);
        assert_eq!(everbridge.configuration.headers.get("X-Org").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn mark_polled_is_visible_on_later_reads() {
        let catalog = YamlSourceCatalog::from_yaml_str(YAML).unwrap();
        let at = Utc::now();
        catalog.mark_polled("cccs-advisories", at).await.unwrap();
        let source = catalog.source("cccs-advisories").await.unwrap().unwrap();
        assert_eq!(source.last_poll_at, Some(at));
        assert!(catalog.mark_polled("nope", at).await.is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = r#"
sources:
  - {id: a, name: A, source_type: rss, api_endpoint: "https://a"}
  - {id: a, name: A2, source_type: rss, api_endpoint: "https://b"}
"#;
        assert!(YamlSourceCatalog::from_yaml_str(yaml).is_err());
    }
}
