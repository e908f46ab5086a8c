use crate::ingest::event::{Event, EventType};
use crate::query::breakdowns::scroll_depth;
use crate::query::filter::{group_events, GroupKey};
use crate::query::{count_of, mean, percentage};
use serde::Serialize;
use std::collections::BTreeSet;

/// Sessions shorter than this many seconds count as bounces.
pub const BOUNCE_THRESHOLD_SECS: f64 = 30.0;

/// Seconds between the earliest and the latest event. 0 for fewer than two events.
pub fn session_duration(events: &[&Event]) -> f64 {
    let first = events.iter().map(|e| e.timestamp).min();
    let last = events.iter().map(|e| e.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    }
}

/// Durations of every session in `events`, in session-id order.
pub fn session_durations(events: &[&Event]) -> Vec<f64> {
    group_events(events, GroupKey::Session)
        .values()
        .map(|session| session_duration(session))
        .collect()
}

/// Mean session duration in seconds.
pub fn average_time_on_page(events: &[&Event]) -> f64 {
    mean(&session_durations(events))
}

/// Percentage of sessions that lasted under 30 seconds or hold a single event.
pub fn bounce_rate(events: &[&Event]) -> f64 {
    let sessions = group_events(events, GroupKey::Session);
    let bounced = sessions
        .values()
        .filter(|session| session.len() == 1 || session_duration(session) < BOUNCE_THRESHOLD_SECS)
        .count();
    percentage(bounced, sessions.len())
}

/// Percentage of visitors whose events span more than one calendar day (UTC).
pub fn return_visitor_rate(events: &[&Event]) -> f64 {
    let visitors = group_events(events, GroupKey::User);
    let returning = visitors
        .values()
        .filter(|visitor| distinct_days(visitor.iter().copied()) > 1)
        .count();
    percentage(returning, visitors.len())
}

fn distinct_days<'a>(events: impl Iterator<Item = &'a Event>) -> usize {
    events
        .map(|e| e.timestamp.date_naive())
        .collect::<BTreeSet<_>>()
        .len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

/// Reading behavior detected for one visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorPattern {
    /// More than two scroll events, each at least as deep as the previous one.
    pub sequential_reader: bool,
    /// More than five scroll events without ever passing half the document.
    pub scanner: bool,
    /// Views on more than one calendar day.
    pub return_visitor: bool,
    pub engagement: EngagementLevel,
}

/// Classify the events of a single visitor.
pub fn detect_behavior_pattern(events: &[&Event]) -> BehaviorPattern {
    let mut scrolls: Vec<&Event> = events
        .iter()
        .copied()
        .filter(|e| e.is(EventType::Scroll))
        .collect();
    scrolls.sort_by_key(|e| e.timestamp);

    let duration = session_duration(events);
    let depth = scroll_depth(events);
    let clicks = count_of(events.iter().copied(), EventType::Click);

    let sequential_reader = scrolls.len() > 2
        && scrolls.windows(2).all(|pair| {
            pair[1].scroll_depth.unwrap_or(0.0) >= pair[0].scroll_depth.unwrap_or(0.0)
        });
    let scanner = scrolls.len() > 5 && depth < 50.0;
    let return_visitor = distinct_days(events.iter().copied().filter(|e| e.is(EventType::View))) > 1;

    let engagement = if duration > 300.0 && depth > 70.0 && clicks > 2 {
        EngagementLevel::High
    } else if duration > 120.0 && depth > 40.0 {
        EngagementLevel::Medium
    } else {
        EngagementLevel::Low
    };

    BehaviorPattern {
        sequential_reader,
        scanner,
        return_visitor,
        engagement,
    }
}

/// Visitor counts per detected behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorPatterns {
    pub visitors: usize,
    pub sequential_readers: usize,
    pub scanners: usize,
    pub return_visitors: usize,
    pub high_engagement: usize,
    pub medium_engagement: usize,
    pub low_engagement: usize,
}

/// Run [`detect_behavior_pattern`] for every visitor and tally the results.
pub fn visitor_patterns(events: &[&Event]) -> VisitorPatterns {
    group_events(events, GroupKey::User)
        .values()
        .map(|visitor| detect_behavior_pattern(visitor))
        .fold(VisitorPatterns::default(), |mut acc, pattern| {
            acc.visitors += 1;
            acc.sequential_readers += usize::from(pattern.sequential_reader);
            acc.scanners += usize::from(pattern.scanner);
            acc.return_visitors += usize::from(pattern.return_visitor);
            match pattern.engagement {
                EngagementLevel::High => acc.high_engagement += 1,
                EngagementLevel::Medium => acc.medium_engagement += 1,
                EngagementLevel::Low => acc.low_engagement += 1,
            }
            acc
        })
}
