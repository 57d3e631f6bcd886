//! Advisory quality scoring of one processing run. Never gates storage.

use std::collections::BTreeMap;

use alertfeed_core::{CanonicalAlert, FeedQualityMetrics, Severity, StagedAlert, DEFAULT_CATEGORY};
use chrono::{DateTime, Utc};

const MIN_SUCCESS_RATE: f64 = 0.8;
const MIN_AVG_TITLE_LEN: f64 = 10.0;
const MIN_AVG_DESCRIPTION_LEN: f64 = 20.0;
const ELEVATED_UNKNOWN_SEVERITY: f64 = 0.3;
const HIGH_UNKNOWN_SEVERITY: f64 = 0.5;
const MAX_GENERAL_CATEGORY: f64 = 0.7;

const TITLE_TARGET_LEN: f64 = 30.0;
const DESCRIPTION_TARGET_LEN: f64 = 100.0;

fn proportions<'a>(keys: impl Iterator<Item = &'a str>, total: usize) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key.to_string()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| (key, count as f64 / total as f64))
        .collect()
}

fn average_chars<'a>(values: impl Iterator<Item = &'a str>, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    values.map(|v| v.chars().count()).sum::<usize>() as f64 / total as f64
}

fn percent(share: f64) -> String {
    format!("{:.0}%", share * 100.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityMonitor;

impl QualityMonitor {
    /// Failure sentinels count against the success rate and are excluded
    /// from the length and distribution figures.
    pub fn evaluate(
        source_id: &str,
        raw_count: usize,
        alerts: &[StagedAlert],
        computed_at: DateTime<Utc>,
    ) -> FeedQualityMetrics {
        let normalized: Vec<&CanonicalAlert> = alerts
            .iter()
            .filter(|s| !s.normalization_failed)
            .map(|s| &s.alert)
            .collect();
        let n = normalized.len();

        let success_rate = if raw_count == 0 {
            1.0
        } else {
            (n as f64 / raw_count as f64).min(1.0)
        };
        let avg_title_length = average_chars(normalized.iter().map(|a| a.title.as_str()), n);
        let avg_description_length = average_chars(normalized.iter().map(|a| a.description.as_str()), n);
        let severity_distribution = proportions(normalized.iter().map(|a| a.severity.as_str()), n);
        let category_distribution = proportions(normalized.iter().map(|a| a.category.as_str()), n);

        let unknown_share = severity_distribution
            .get(Severity::Unknown.as_str())
            .copied()
            .unwrap_or(0.0);
        let general_share = category_distribution
            .get(DEFAULT_CATEGORY)
            .copied()
            .unwrap_or(0.0);

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if success_rate < MIN_SUCCESS_RATE {
            issues.push(format!("Low normalization success rate ({})", percent(success_rate)));
            recommendations.push("Review the field mapping for items that fail to normalize".to_string());
        }
        if n > 0 && avg_title_length < MIN_AVG_TITLE_LEN {
            issues.push(format!("Short titles (average {avg_title_length:.1} characters)"));
            recommendations.push("Map a more descriptive title field or relax title cleanup".to_string());
        }
        if n > 0 && avg_description_length < MIN_AVG_DESCRIPTION_LEN {
            issues.push(format!(
                "Short descriptions (average {avg_description_length:.1} characters)"
            ));
            recommendations.push("Map a summary or content field as the description".to_string());
        }
        if unknown_share > HIGH_UNKNOWN_SEVERITY {
            issues.push(format!("High unknown severity rate ({})", percent(unknown_share)));
            recommendations.push("Improve severity detection rules or add a severity value mapping".to_string());
        } else if unknown_share > ELEVATED_UNKNOWN_SEVERITY {
            issues.push(format!("Elevated unknown severity rate ({})", percent(unknown_share)));
            recommendations.push("Improve severity detection rules or add a severity value mapping".to_string());
        }
        if general_share > MAX_GENERAL_CATEGORY {
            issues.push(format!("Most alerts uncategorized ({} General)", percent(general_share)));
            recommendations.push("Add category classification rules or a category value mapping".to_string());
        }

        let title_score = (avg_title_length / TITLE_TARGET_LEN).min(1.0);
        let description_score = (avg_description_length / DESCRIPTION_TARGET_LEN).min(1.0);
        let quality_score = (0.3 * success_rate
            + 0.2 * title_score
            + 0.2 * description_score
            + 0.15 * (1.0 - unknown_share)
            + 0.15 * (1.0 - general_share))
            .clamp(0.0, 1.0);

        FeedQualityMetrics {
            source_id: source_id.to_string(),
            raw_count,
            normalized_count: n,
            success_rate,
            avg_title_length,
            avg_description_length,
            severity_distribution,
            category_distribution,
            quality_score,
            issues,
            recommendations,
            computed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertfeed_core::{AlertStatus, SourceLabel, SourceType, Urgency, ERROR_CATEGORY};
    use serde_json::json;

    fn staged(alert: CanonicalAlert, normalization_failed: bool) -> StagedAlert {
        StagedAlert {
            source_id: "src".to_string(),
            source_type: SourceType::Rss,
            alert,
            raw: json!({}),
            normalization_failed,
        }
    }

    fn alert(i: usize, severity: Severity, category: &str) -> StagedAlert {
        let alert = CanonicalAlert {
            id: format!("a{i}"),
            title: "Boil water advisory for Springfield".to_string(),
            description: "Residents should boil tap water for at least one minute before drinking."
                .to_string(),
            severity,
            urgency: Urgency::Unknown,
            category: category.to_string(),
            status: AlertStatus::Actual,
            area: None,
            published: Utc::now(),
            updated: None,
            expires: None,
            effective: None,
            url: None,
            instructions: None,
            author: None,
            source: SourceLabel::Other,
            coordinates: None,
        };
        staged(alert, false)
    }

    #[test]
    fn forty_percent_unknown_severity_is_flagged() {
        let alerts: Vec<_> = (0..10)
            .map(|i| {
                let severity = if i < 4 { Severity::Unknown } else { Severity::Moderate };
                alert(i, severity, "Health")
            })
            .collect();
        let metrics = QualityMonitor::evaluate("src", 10, &alerts, Utc::now());

        assert_eq!(metrics.severity_distribution.get("Unknown"), Some(&0.4));
        assert!(metrics
            .issues
            .iter()
            .any(|i| i.to_lowercase().contains("unknown severity")));
        assert!(metrics
            .recommendations
            .iter()
            .any(|r| r.contains("severity detection rules")));
    }

    #[test]
    fn healthy_run_has_no_issues_and_high_score() {
        let alerts: Vec<_> = (0..5).map(|i| alert(i, Severity::Minor, "Health")).collect();
        let metrics = QualityMonitor::evaluate("src", 5, &alerts, Utc::now());
        assert!(metrics.issues.is_empty(), "{:?}", metrics.issues);
        assert_eq!(metrics.success_rate, 1.0);
        assert!(metrics.quality_score > 0.9);
    }

    #[test]
    fn sentinels_lower_success_rate() {
        let mut alerts: Vec<_> = (0..3).map(|i| alert(i, Severity::Minor, "General")).collect();
        for id in ["x", "y"] {
            let sentinel = CanonicalAlert::normalization_failure(id.into(), SourceLabel::Other, Utc::now());
            alerts.push(staged(sentinel, true));
        }
        let metrics = QualityMonitor::evaluate("src", 5, &alerts, Utc::now());

        assert_eq!(metrics.normalized_count, 3);
        assert!((metrics.success_rate - 0.6).abs() < 1e-9);
        assert!(metrics.issues.iter().any(|i| i.contains("success rate")));
        assert!(metrics.issues.iter().any(|i| i.contains("General")));
        assert!(metrics.quality_score < 0.9);
    }

    #[test]
    fn empty_run_is_neutral() {
        let metrics = QualityMonitor::evaluate("src", 0, &[], Utc::now());
        assert_eq!(metrics.success_rate, 1.0);
        assert!(metrics.issues.is_empty());
        assert!(metrics.severity_distribution.is_empty());
    }

    #[test]
    fn error_category_alerts_count_as_normalized() {
        let mut real = alert(0, Severity::Minor, ERROR_CATEGORY);
        real.alert.status = AlertStatus::Unknown;
        let alerts = vec![real, alert(1, Severity::Minor, "Health")];
        let metrics = QualityMonitor::evaluate("src", 2, &alerts, Utc::now());

        assert_eq!(metrics.normalized_count, 2);
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.category_distribution.get(ERROR_CATEGORY), Some(&0.5));
    }
}
