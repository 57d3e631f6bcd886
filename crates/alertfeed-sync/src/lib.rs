//! Alert ingestion orchestration: source gating, the per-source retry loop,
//! storage routing, health and quality telemetry, and the cron scheduler.

pub mod catalog;
pub mod config;
pub mod gate;
pub mod health;
pub mod pipeline;
pub mod quality;
pub mod router;
pub mod rules;

pub use catalog::{SourceRegistry, YamlSourceCatalog};
pub use config::{CatalogBackend, RulesBackend, SyncConfig};
pub use gate::{evaluate, is_due, required_capabilities, should_skip, GateDecision, SkipReason};
pub use health::{with_retry, HealthMonitor, ProcessError, RetryOutcome};
pub use pipeline::{Persistence, SourceRunReport, SourceTestReport, SyncPipeline, SyncRunSummary};
pub use quality::QualityMonitor;
pub use router::{infer_announcement_type, route_for, StorageRecord, StorageRouter, StoreOutcome};
pub use rules::{load_rule_set, RuleProvider, StaticRuleProvider, StoreRuleProvider};

pub const CRATE_NAME: &str = "alertfeed-sync";
