//! Where classification rules come from. Selected once at construction.

use std::path::Path;
use std::sync::Arc;

use alertfeed_adapters::RuleSet;
use alertfeed_core::ClassificationRule;
use alertfeed_storage::{RuleStore, StorageError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

#[async_trait]
pub trait RuleProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn active_rules(&self) -> Result<Vec<ClassificationRule>, StorageError>;
}

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<ClassificationRule>,
}

/// Rules fixed at startup, usually from `rules/classification.yaml`.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleProvider {
    rules: Vec<ClassificationRule>,
}

impl StaticRuleProvider {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: RulesFile = serde_yaml::from_str(text)?;
        Ok(Self::new(file.rules))
    }

    /// A missing file means no rules; a malformed one is an error.
    pub async fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "classification rules file not found; using keyword heuristics only");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[async_trait]
impl RuleProvider for StaticRuleProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn active_rules(&self) -> Result<Vec<ClassificationRule>, StorageError> {
        Ok(self.rules.iter().filter(|r| r.is_active).cloned().collect())
    }
}

pub struct StoreRuleProvider {
    store: Arc<dyn RuleStore>,
}

impl StoreRuleProvider {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RuleProvider for StoreRuleProvider {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn active_rules(&self) -> Result<Vec<ClassificationRule>, StorageError> {
        self.store.active_classification_rules().await
    }
}

/// Load and compile the rule set for one batch. A provider failure degrades
/// to an empty set so keyword and mapping tiers still run.
pub async fn load_rule_set(provider: &dyn RuleProvider) -> RuleSet {
    let rules = match provider.active_rules().await {
        Ok(rules) => rules,
        Err(err) => {
            warn!(provider = provider.name(), error = %err, "loading classification rules failed; continuing without rules");
            Vec::new()
        }
    };
    let loaded = rules.len();
    let (set, rejected) = RuleSet::compile(rules);
    info!(
        provider = provider.name(),
        loaded,
        usable = set.len(),
        rejected = rejected.len(),
        "classification rules ready"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertfeed_core::{RuleType, SourceType};
    use alertfeed_storage::MemoryStore;

    const YAML: &str = r#"
rules:
  - id: sev-zero-day
    rule_type: severity
    source_types: [security-rss]
    pattern: "zero[- ]day|actively exploited"
    value: Extreme
    priority: 100
    confidence: 0.95
  - id: broken
    rule_type: category
    pattern: "(unclosed"
    value: Broken
  - id: disabled
    rule_type: category
    pattern: "anything"
    value: Nope
    is_active: false
"#;

    #[tokio::test]
    async fn static_rules_parse_and_compile() {
        let provider = StaticRuleProvider::from_yaml_str(YAML).unwrap();
        let rules = provider.active_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].rule_type, RuleType::Severity);
        assert_eq!(rules[0].source_types, vec![SourceType::SecurityRss]);

        let set = load_rule_set(&provider).await;
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn missing_rules_file_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StaticRuleProvider::from_yaml_file(dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert!(provider.active_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_provider_reads_active_rules() {
        let store = Arc::new(MemoryStore::new());
        let rules = StaticRuleProvider::from_yaml_str(YAML).unwrap().rules;
        store.add_rules(rules).await;
        let provider = StoreRuleProvider::new(store);
        assert_eq!(provider.active_rules().await.unwrap().len(), 2);
    }
}
