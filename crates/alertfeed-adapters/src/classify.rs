//! Severity, urgency, status and category resolution.
//!
//! Severity and category go through the same tiers: stored rules (highest
//! priority first), keyword families, the source's value mapping, then the
//! default. Urgency and status only use the mapping and canonical names.

use alertfeed_core::{
    AlertStatus, ClassificationRule, RuleType, Severity, SourceType, Urgency, ValueMapping,
};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClassificationRuleError {
    #[error("rule {rule} has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
}

fn keyword_family(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static keyword regex")
}

static SEVERITY_KEYWORDS: Lazy<Vec<(Severity, Regex)>> = Lazy::new(|| {
    vec![
        (Severity::Extreme, keyword_family(r"\b(?:extreme|critical|catastrophic)\b")),
        (Severity::Severe, keyword_family(r"\b(?:severe|high|dangerous|major)\b")),
        (Severity::Moderate, keyword_family(r"\b(?:moderate|medium|elevated)\b")),
        (Severity::Minor, keyword_family(r"\b(?:minor|low)\b")),
        (
            Severity::Info,
            keyword_family(r"\b(?:info|information|informational|statement|notice)\b"),
        ),
    ]
});

const CYBERSECURITY: &str = "Cybersecurity";

static CATEGORY_KEYWORDS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            CYBERSECURITY,
            keyword_family(r"\b(?:cyber\w*|attacks?|breach(?:es)?|malware|ransomware|phishing|vulnerab\w*|exploit\w*)\b"),
        ),
        (
            "Emergency",
            keyword_family(r"\b(?:emergency|emergencies|evacuat\w*|floods?|flooding|wildfires?|earthquakes?|tsunami|shelter)\b"),
        ),
        (
            "Health",
            keyword_family(r"\b(?:health|outbreaks?|disease|pandemic|vaccin\w*|boil water)\b"),
        ),
        (
            "Weather",
            keyword_family(
                r"\b(?:weather|storms?|thunderstorms?|snow|snowfall|rain|rainfall|winds?|heat|tornado(?:es)?|hurricanes?|blizzards?|freezing|fog)\b",
            ),
        ),
        (
            "Travel",
            keyword_family(r"\b(?:travel|visas?|borders?|passports?|immigration|airports?|flights?)\b"),
        ),
        (
            "Government",
            keyword_family(r"\b(?:government|policy|policies|legislation|regulations?|minister|parliament)\b"),
        ),
    ]
});

/// Security feeds only consult the cybersecurity family; vendor product
/// names collide with the others.
fn category_keywords(source_type: &SourceType) -> impl Iterator<Item = &'static (&'static str, Regex)> {
    let security_only = matches!(source_type, SourceType::SecurityRss);
    CATEGORY_KEYWORDS
        .iter()
        .filter(move |(category, _)| !security_only || *category == CYBERSECURITY)
}

#[derive(Debug, Clone)]
struct CompiledRule {
    label: String,
    rule_type: RuleType,
    source_types: Vec<SourceType>,
    pattern: Regex,
    value: String,
    priority: i32,
    confidence: f64,
}

impl CompiledRule {
    fn applies_to(&self, source_type: &SourceType) -> bool {
        self.source_types.is_empty() || self.source_types.contains(source_type)
    }
}

/// Active rules compiled once per batch.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile active rules in descending priority. Invalid patterns are
    /// logged and returned alongside the usable set.
    pub fn compile(rules: impl IntoIterator<Item = ClassificationRule>) -> (Self, Vec<ClassificationRuleError>) {
        let mut compiled = Vec::new();
        let mut rejected = Vec::new();

        for (idx, rule) in rules.into_iter().filter(|r| r.is_active).enumerate() {
            let label = rule.id.clone().unwrap_or_else(|| format!("#{idx}"));
            match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                Ok(pattern) => compiled.push(CompiledRule {
                    label,
                    rule_type: rule.rule_type,
                    source_types: rule.source_types,
                    pattern,
                    value: rule.value,
                    priority: rule.priority,
                    confidence: rule.confidence,
                }),
                Err(source) => {
                    warn!(rule = %label, pattern = %rule.pattern, error = %source, "skipping rule with invalid pattern");
                    rejected.push(ClassificationRuleError::InvalidPattern { rule: label, source });
                }
            }
        }

        // Stable: equal priorities keep load order.
        compiled.sort_by(|a, b| b.priority.cmp(&a.priority));
        (Self { rules: compiled }, rejected)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn candidates<'a>(
        &'a self,
        rule_type: RuleType,
        source_type: &'a SourceType,
        content: &'a str,
    ) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.rule_type == rule_type && r.applies_to(source_type))
            .filter(move |r| r.pattern.is_match(content))
    }
}

/// Raw, unresolved values pulled from one item.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSignals<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub severity: Option<&'a str>,
    pub urgency: Option<&'a str>,
    pub status: Option<&'a str>,
    pub category: Option<&'a str>,
}

impl RawSignals<'_> {
    fn content(&self) -> String {
        format!("{} {}", self.title, self.description).to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub severity: Severity,
    pub urgency: Urgency,
    pub status: AlertStatus,
    pub category: String,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: RuleSet,
}

impl Classifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn classify(
        &self,
        source_type: &SourceType,
        signals: &RawSignals<'_>,
        mapping: &ValueMapping,
        default_category: &str,
    ) -> Classification {
        let content = signals.content();
        Classification {
            severity: self.severity(source_type, &content, signals.severity, mapping),
            urgency: resolve_urgency(signals.urgency, mapping),
            status: resolve_status(signals.status, mapping),
            category: self.category(source_type, &content, signals.category, mapping, default_category),
        }
    }

    fn severity(
        &self,
        source_type: &SourceType,
        content: &str,
        raw: Option<&str>,
        mapping: &ValueMapping,
    ) -> Severity {
        for rule in self.rules.candidates(RuleType::Severity, source_type, content) {
            match Severity::from_canonical(&rule.value) {
                Some(severity) => {
                    debug!(rule = %rule.label, confidence = rule.confidence, severity = %severity, "severity rule matched");
                    return severity;
                }
                None => {
                    warn!(rule = %rule.label, value = %rule.value, "severity rule targets a non-canonical value; skipping");
                }
            }
        }

        if let Some((severity, _)) = SEVERITY_KEYWORDS.iter().find(|(_, re)| re.is_match(content)) {
            return *severity;
        }

        raw.and_then(|raw| {
            ValueMapping::lookup(&mapping.severity, raw)
                .and_then(Severity::from_canonical)
                .or_else(|| Severity::from_canonical(raw))
        })
        .unwrap_or(Severity::Unknown)
    }

    fn category(
        &self,
        source_type: &SourceType,
        content: &str,
        raw: Option<&str>,
        mapping: &ValueMapping,
        default_category: &str,
    ) -> String {
        if let Some(rule) = self.rules.candidates(RuleType::Category, source_type, content).next() {
            debug!(rule = %rule.label, confidence = rule.confidence, category = %rule.value, "category rule matched");
            return rule.value.clone();
        }

        if let Some((category, _)) = category_keywords(source_type).find(|(_, re)| re.is_match(content)) {
            return (*category).to_string();
        }

        raw.and_then(|raw| ValueMapping::lookup(&mapping.category, raw))
            .map(ToString::to_string)
            .unwrap_or_else(|| default_category.to_string())
    }
}

fn resolve_urgency(raw: Option<&str>, mapping: &ValueMapping) -> Urgency {
    raw.and_then(|raw| {
        ValueMapping::lookup(&mapping.urgency, raw)
            .and_then(Urgency::from_canonical)
            .or_else(|| Urgency::from_canonical(raw))
    })
    .unwrap_or(Urgency::Unknown)
}

/// Missing status means a live alert; a present but unrecognized one does not.
fn resolve_status(raw: Option<&str>, mapping: &ValueMapping) -> AlertStatus {
    match raw {
        None => AlertStatus::Actual,
        Some(raw) => ValueMapping::lookup(&mapping.status, raw)
            .and_then(AlertStatus::from_canonical)
            .or_else(|| AlertStatus::from_canonical(raw))
            .unwrap_or(AlertStatus::Unknown),
    }
}
