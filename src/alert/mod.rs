//! Threshold alerts over the current event set.

pub mod monitor;

use crate::config::EngineConfig;
use crate::ingest::cleaner::{clean_events, CleaningOptions};
use crate::ingest::event::{Event, EventType, RawEvent};
use crate::query::breakdowns::scroll_depth;
use crate::query::count_of;
use crate::query::filter::{group_events, GroupKey};
use crate::query::metrics::conversion_rate;
use crate::query::sessions::{average_time_on_page, bounce_rate};
use crate::query::timeseries::{aggregate_by_time, Granularity};
use crate::query::trend::{analyze_trend, Significance, Trend};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Proposal group key used for events without a proposal id.
const UNASSIGNED: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Threshold,
    Anomaly,
    Opportunity,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    pub metric: String,
    pub current_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub action_required: bool,
    pub suggestions: Vec<String>,
}

struct AlertDraft {
    kind: AlertType,
    severity: Severity,
    title: &'static str,
    description: String,
    metric: &'static str,
    current_value: f64,
    expected_value: Option<f64>,
    threshold: Option<f64>,
    action_required: bool,
    suggestions: &'static [&'static str],
}

/// Clean a raw batch with `config` and evaluate alerts over the result.
pub fn evaluate_raw_alerts(
    raw: &[RawEvent],
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Vec<AnalyticsAlert> {
    let cleaned = clean_events(raw, CleaningOptions::from(config), now);
    let refs: Vec<&Event> = cleaned.iter().collect();
    evaluate_alerts(&refs, config, now)
}

/// Compare each proposal's metrics against the configured alert thresholds.
///
/// Events without a proposal id are evaluated together as one group with no
/// `proposal_id`. Alerts come out grouped by proposal, most severe first within
/// a proposal.
pub fn evaluate_alerts(
    events: &[&Event],
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Vec<AnalyticsAlert> {
    let mut alerts = Vec::new();
    for (proposal, group) in group_events(events, GroupKey::Proposal) {
        let mut drafts = proposal_drafts(&group, config);
        drafts.sort_by(|a, b| b.severity.cmp(&a.severity));
        let proposal_id = (proposal != UNASSIGNED).then_some(proposal);
        alerts.extend(drafts.into_iter().map(|draft| AnalyticsAlert {
            id: uuid::Uuid::new_v4().to_string(),
            kind: draft.kind,
            severity: draft.severity,
            title: draft.title.to_string(),
            description: draft.description,
            triggered_at: now,
            proposal_id: proposal_id.clone(),
            metric: draft.metric.to_string(),
            current_value: draft.current_value,
            expected_value: draft.expected_value,
            threshold: draft.threshold,
            action_required: draft.action_required,
            suggestions: draft.suggestions.iter().map(|s| (*s).to_string()).collect(),
        }));
    }
    if !alerts.is_empty() {
        tracing::debug!(alerts = alerts.len(), events = events.len(), "Evaluated alerts");
    }
    alerts
}

fn proposal_drafts(events: &[&Event], config: &EngineConfig) -> Vec<AlertDraft> {
    let limits = &config.alert_thresholds;
    let mut drafts = Vec::new();
    if events.is_empty() {
        return drafts;
    }

    let bounce = bounce_rate(events);
    if bounce > limits.bounce_rate {
        drafts.push(AlertDraft {
            kind: AlertType::Threshold,
            severity: if bounce >= 90.0 { Severity::Critical } else { Severity::High },
            title: "High Bounce Rate",
            description: format!(
                "{bounce:.1}% of sessions bounced, above the {}% limit.",
                limits.bounce_rate
            ),
            metric: "bounceRate",
            current_value: bounce,
            expected_value: Some(config.benchmarks.bounce_rate),
            threshold: Some(limits.bounce_rate),
            action_required: true,
            suggestions: &[
                "Tighten the opening section",
                "Check that the proposal renders correctly on all devices",
            ],
        });
    }

    if count_of(events.iter().copied(), EventType::View) > 0 {
        let conversion = conversion_rate(events);
        if conversion < limits.conversion_rate {
            drafts.push(AlertDraft {
                kind: AlertType::Warning,
                severity: Severity::High,
                title: "Low Conversion Rate",
                description: format!(
                    "Only {conversion:.1}% of views led to a signature, below the {}% limit.",
                    limits.conversion_rate
                ),
                metric: "conversionRate",
                current_value: conversion,
                expected_value: Some(config.benchmarks.conversion_rate),
                threshold: Some(limits.conversion_rate),
                action_required: true,
                suggestions: &[
                    "Make the signature call to action more prominent",
                    "Follow up with readers who viewed but did not sign",
                ],
            });
        } else if conversion > config.benchmarks.conversion_rate * config.rules.conversion_above_benchmark
        {
            drafts.push(AlertDraft {
                kind: AlertType::Opportunity,
                severity: Severity::Low,
                title: "Conversion Well Above Benchmark",
                description: format!(
                    "{conversion:.1}% of views convert, well above the {}% benchmark.",
                    config.benchmarks.conversion_rate
                ),
                metric: "conversionRate",
                current_value: conversion,
                expected_value: Some(config.benchmarks.conversion_rate),
                threshold: None,
                action_required: false,
                suggestions: &["Reuse this proposal's structure as a template"],
            });
        }
    }

    let avg_time = average_time_on_page(events);
    if avg_time < limits.avg_time_on_page {
        drafts.push(AlertDraft {
            kind: AlertType::Threshold,
            severity: Severity::Medium,
            title: "Short Time on Page",
            description: format!(
                "Sessions last {avg_time:.0} seconds on average, below the {} second limit.",
                limits.avg_time_on_page
            ),
            metric: "avgTimeOnPage",
            current_value: avg_time,
            expected_value: Some(config.benchmarks.avg_time_on_page),
            threshold: Some(limits.avg_time_on_page),
            action_required: true,
            suggestions: &["Lead with a concise executive summary"],
        });
    }

    if count_of(events.iter().copied(), EventType::Scroll) > 0 {
        let depth = scroll_depth(events);
        if depth < limits.scroll_depth {
            drafts.push(AlertDraft {
                kind: AlertType::Threshold,
                severity: Severity::Medium,
                title: "Shallow Scroll Depth",
                description: format!(
                    "Readers reach {depth:.1}% of the document, below the {}% limit.",
                    limits.scroll_depth
                ),
                metric: "scrollDepth",
                current_value: depth,
                expected_value: Some(config.benchmarks.scroll_depth),
                threshold: Some(limits.scroll_depth),
                action_required: true,
                suggestions: &[
                    "Break long sections up with headings and visuals",
                    "Move key value statements higher in the document",
                ],
            });
        }
    }

    let daily_views: Vec<f64> = aggregate_by_time(events, Granularity::Day)
        .iter()
        .map(|b| b.views as f64)
        .collect();
    let trend = analyze_trend("views", &daily_views);
    if trend.trend == Trend::Decreasing && trend.significance == Significance::High {
        drafts.push(AlertDraft {
            kind: AlertType::Anomaly,
            severity: Severity::Medium,
            title: "Views Declining",
            description: format!(
                "Daily views changed by {}% over {}.",
                trend.change_percent, trend.timeframe
            ),
            metric: "views",
            current_value: daily_views.last().copied().unwrap_or_default(),
            expected_value: daily_views.first().copied(),
            threshold: None,
            action_required: false,
            suggestions: &["Check whether the proposal link is still being shared"],
        });
    }

    drafts
}
