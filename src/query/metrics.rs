use crate::config::Benchmarks;
use crate::ingest::cleaner::{is_bot_user_agent, is_valid_timestamp};
use crate::ingest::event::{DeviceType, Event, EventType};
use crate::query::breakdowns::{
    click_through_rates, day_of_week_patterns, device_breakdown, geographic_distribution,
    scroll_depth, scroll_heatmap, section_engagement, section_stats, time_of_day_patterns,
    ScrollHeatmapEntry, SectionEngagement,
};
use crate::query::filter::{group_events, GroupKey};
use crate::query::funnel::{
    average_days_to_signature, conversion_paths, drop_off_points, funnel_metrics,
    signature_flow, ConversionPath, DropOffPoint, FunnelStep, SignatureStage,
};
use crate::query::sessions::{
    average_time_on_page, bounce_rate, return_visitor_rate, session_duration, visitor_patterns,
    VisitorPatterns,
};
use crate::query::timeseries::{aggregate_by_time, Granularity, TimeBucket};
use crate::query::trend::{
    analyze_trend, compare_to_benchmark, significance_test, BenchmarkComparison,
    SignificanceResult, TrendAnalysis,
};
use crate::query::{count_of, percentage};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Number of proposals listed in a summary.
pub const TOP_PROPOSALS: usize = 5;

/// Events older than this many days count against timeliness.
const TIMELINESS_WINDOW_DAYS: i64 = 30;

/// Per-proposal rollup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalPerformance {
    pub id: String,
    pub title: String,
    pub views: usize,
    pub unique_visitors: usize,
    pub conversion_rate: f64,
    pub avg_time_on_page: f64,
    pub avg_scroll_depth: f64,
    pub signature_rate: f64,
    pub download_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_views: usize,
    pub unique_visitors: usize,
    pub avg_time_on_page: f64,
    pub avg_scroll_depth: f64,
    pub conversion_rate: f64,
    pub top_performing_proposals: Vec<ProposalPerformance>,
}

/// Signatures per view, as a percentage.
pub fn conversion_rate(events: &[&Event]) -> f64 {
    percentage(
        count_of(events.iter().copied(), EventType::Signature),
        count_of(events.iter().copied(), EventType::View),
    )
}

fn unique_visitors(events: &[&Event]) -> usize {
    events
        .iter()
        .map(|e| e.visitor_or_session())
        .collect::<BTreeSet<_>>()
        .len()
}

/// Headline numbers plus the best-converting proposals.
pub fn summarize(events: &[&Event]) -> AnalyticsSummary {
    AnalyticsSummary {
        total_views: count_of(events.iter().copied(), EventType::View),
        unique_visitors: unique_visitors(events),
        avg_time_on_page: average_time_on_page(events),
        avg_scroll_depth: scroll_depth(events),
        conversion_rate: conversion_rate(events),
        top_performing_proposals: top_proposals(events, TOP_PROPOSALS),
    }
}

/// Proposals ordered by conversion rate, best first. Ties keep proposal-id order.
pub fn top_proposals(events: &[&Event], limit: usize) -> Vec<ProposalPerformance> {
    let mut proposals: Vec<ProposalPerformance> = group_events(events, GroupKey::Proposal)
        .into_iter()
        .map(|(id, proposal_events)| {
            let views = count_of(proposal_events.iter().copied(), EventType::View);
            let conversion = conversion_rate(&proposal_events);
            ProposalPerformance {
                title: format!("Proposal {id}"),
                views,
                unique_visitors: unique_visitors(&proposal_events),
                conversion_rate: conversion,
                avg_time_on_page: average_time_on_page(&proposal_events),
                avg_scroll_depth: scroll_depth(&proposal_events),
                signature_rate: conversion,
                download_rate: percentage(
                    count_of(proposal_events.iter().copied(), EventType::Download),
                    views,
                ),
                id,
            }
        })
        .collect();
    proposals.sort_by(|a, b| b.conversion_rate.total_cmp(&a.conversion_rate));
    proposals.truncate(limit);
    proposals
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementMetrics {
    pub views_over_time: Vec<TimeBucket>,
    pub views_trend: TrendAnalysis,
    pub scroll_heatmap: Vec<ScrollHeatmapEntry>,
    pub click_through_rates: BTreeMap<String, f64>,
    pub section_engagement: Vec<SectionEngagement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionMetrics {
    pub funnel_steps: Vec<FunnelStep>,
    pub drop_off_points: Vec<DropOffPoint>,
    pub signature_flow: Vec<SignatureStage>,
    pub conversion_paths: Vec<ConversionPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_days_to_signature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BehavioralMetrics {
    pub avg_session_duration: f64,
    pub bounce_rate: f64,
    pub return_visitor_rate: f64,
    pub device_breakdown: BTreeMap<String, f64>,
    pub time_of_day_patterns: BTreeMap<u32, f64>,
    pub day_of_week_patterns: BTreeMap<String, f64>,
    pub geographic_distribution: BTreeMap<String, f64>,
    pub visitor_patterns: VisitorPatterns,
    /// Desktop vs. mobile session durations; present when both have two sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_duration_test: Option<SignificanceResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsMetrics {
    pub engagement: EngagementMetrics,
    pub conversion: ConversionMetrics,
    pub behavioral: BehavioralMetrics,
    pub benchmarks: Vec<BenchmarkComparison>,
}

/// Every engagement, conversion and behavioral metric over `events`.
pub fn calculate_metrics(events: &[&Event], benchmarks: &Benchmarks) -> AnalyticsMetrics {
    let sections = section_stats(events);
    let views_over_time = aggregate_by_time(events, Granularity::Day);
    let daily_views: Vec<f64> = views_over_time.iter().map(|b| b.views as f64).collect();

    let avg_session_duration = average_time_on_page(events);
    let bounce = bounce_rate(events);
    let return_visitors = return_visitor_rate(events);
    let conversion = conversion_rate(events);
    let depth = scroll_depth(events);

    let benchmarks = vec![
        compare_to_benchmark("bounceRate", bounce, benchmarks.bounce_rate),
        compare_to_benchmark("conversionRate", conversion, benchmarks.conversion_rate),
        compare_to_benchmark(
            "avgTimeOnPage",
            avg_session_duration,
            benchmarks.avg_time_on_page,
        ),
        compare_to_benchmark("scrollDepth", depth, benchmarks.scroll_depth),
        compare_to_benchmark(
            "returnVisitorRate",
            return_visitors,
            benchmarks.return_visitor_rate,
        ),
    ];

    AnalyticsMetrics {
        engagement: EngagementMetrics {
            views_trend: analyze_trend("views", &daily_views),
            views_over_time,
            scroll_heatmap: scroll_heatmap(&sections),
            click_through_rates: click_through_rates(events),
            section_engagement: section_engagement(&sections),
        },
        conversion: ConversionMetrics {
            funnel_steps: funnel_metrics(events),
            drop_off_points: drop_off_points(&sections),
            signature_flow: signature_flow(events),
            conversion_paths: conversion_paths(events),
            avg_days_to_signature: average_days_to_signature(events),
        },
        behavioral: BehavioralMetrics {
            avg_session_duration,
            bounce_rate: bounce,
            return_visitor_rate: return_visitors,
            device_breakdown: device_breakdown(events),
            time_of_day_patterns: time_of_day_patterns(events),
            day_of_week_patterns: day_of_week_patterns(events),
            geographic_distribution: geographic_distribution(events),
            visitor_patterns: visitor_patterns(events),
            device_duration_test: device_duration_test(events),
        },
        benchmarks,
    }
}

/// Compare desktop and mobile session durations. A session takes the device of its
/// first event that reports one.
fn device_duration_test(events: &[&Event]) -> Option<SignificanceResult> {
    let mut desktop = Vec::new();
    let mut mobile = Vec::new();
    for session in group_events(events, GroupKey::Session).values() {
        let device = session.iter().find_map(|e| e.device_type);
        match device {
            Some(DeviceType::Desktop) => desktop.push(session_duration(session)),
            Some(DeviceType::Mobile) => mobile.push(session_duration(session)),
            _ => {}
        }
    }
    (desktop.len() >= 2 && mobile.len() >= 2).then(|| significance_test(&desktop, &mobile))
}

/// Integer percentages describing how trustworthy a cleaned event set is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataQuality {
    pub completeness: u32,
    pub accuracy: u32,
    pub timeliness: u32,
}

/// Score `events` for completeness (required fields present), accuracy (valid
/// timestamp, no bot signature) and timeliness (seen in the last 30 days).
pub fn assess_data_quality(events: &[&Event], now: DateTime<Utc>) -> DataQuality {
    if events.is_empty() {
        return DataQuality::default();
    }
    let total = events.len();
    let complete = events
        .iter()
        .filter(|e| !e.session_id.trim().is_empty())
        .count();
    let accurate = events
        .iter()
        .filter(|e| {
            is_valid_timestamp(e.timestamp, now) && !e.user_agent().is_some_and(is_bot_user_agent)
        })
        .count();
    let cutoff = now - Duration::days(TIMELINESS_WINDOW_DAYS);
    let timely = events.iter().filter(|e| e.timestamp >= cutoff).count();

    DataQuality {
        completeness: rounded_percentage(complete, total),
        accuracy: rounded_percentage(accurate, total),
        timeliness: rounded_percentage(timely, total),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rounded_percentage(part: usize, whole: usize) -> u32 {
    percentage(part, whole).round() as u32
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::Map;

    fn arb_event() -> impl Strategy<Value = Event> {
        (0usize..6, 0i64..86_400, 0usize..8, proptest::option::of(-50.0f64..200.0)).prop_map(
            |(kind, offset, session, depth)| Event {
                event_type: [
                    EventType::View,
                    EventType::Scroll,
                    EventType::Click,
                    EventType::Download,
                    EventType::Signature,
                    EventType::Exit,
                ][kind],
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::seconds(offset),
                session_id: format!("s{session}"),
                visitor_id: None,
                proposal_id: None,
                user_id: None,
                section: None,
                scroll_depth: depth,
                time_on_page: None,
                device_type: None,
                browser_type: None,
                location: None,
                metadata: Map::new(),
            },
        )
    }

    proptest! {
        #[test]
        fn rates_stay_in_range(events in proptest::collection::vec(arb_event(), 0..60)) {
            let refs: Vec<&Event> = events.iter().collect();
            let metrics = calculate_metrics(&refs, &Benchmarks::default());
            prop_assert!((0.0..=100.0).contains(&metrics.behavioral.bounce_rate));
            prop_assert!((0.0..=100.0).contains(&summarize(&refs).avg_scroll_depth));

            let view_step = &metrics.conversion.funnel_steps[0];
            let expected = if view_step.count > 0 { 100.0 } else { 0.0 };
            prop_assert!((view_step.rate - expected).abs() < f64::EPSILON);
        }

        #[test]
        fn metrics_are_finite(events in proptest::collection::vec(arb_event(), 0..60)) {
            let refs: Vec<&Event> = events.iter().collect();
            let json = serde_json::to_string(&calculate_metrics(&refs, &Benchmarks::default()))
                .unwrap();
            // serde_json writes non-finite floats as null
            prop_assert!(!json.contains("null"));
        }
    }
}
