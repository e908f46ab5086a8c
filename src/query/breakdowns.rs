use crate::ingest::event::{Event, EventType};
use crate::query::filter::{group_events, GroupKey};
use crate::query::sessions::average_time_on_page;
use crate::query::{count_of, percentage};
use chrono::{Datelike, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;

/// Weekday names, Sunday first.
pub const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Deepest scroll position reached by any scroll event, capped at 100. 0 if none.
///
/// Scroll events without a positive, finite depth are ignored.
pub fn scroll_depth(events: &[&Event]) -> f64 {
    events
        .iter()
        .filter(|e| e.is(EventType::Scroll))
        .filter_map(|e| e.scroll_depth)
        .filter(|d| d.is_finite() && *d > 0.0)
        .fold(0.0_f64, f64::max)
        .min(100.0)
}

/// Per-section rollup shared by the content metrics and rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionStats {
    pub section: String,
    pub events: usize,
    pub views: usize,
    pub exits: usize,
    pub clicks: usize,
    pub avg_time_spent: f64,
    pub avg_depth: f64,
}

impl SectionStats {
    /// Exits per view, as a percentage.
    pub fn drop_off_rate(&self) -> f64 {
        percentage(self.exits, self.views)
    }

    /// Clicks per view, as a percentage.
    pub fn interaction_rate(&self) -> f64 {
        percentage(self.clicks, self.views)
    }
}

/// Section rollups in section-name order. Events without a section fall under
/// `"unknown"`.
pub fn section_stats(events: &[&Event]) -> Vec<SectionStats> {
    group_events(events, GroupKey::Section)
        .into_iter()
        .map(|(section, section_events)| SectionStats {
            events: section_events.len(),
            views: count_of(section_events.iter().copied(), EventType::View),
            exits: count_of(section_events.iter().copied(), EventType::Exit),
            clicks: count_of(section_events.iter().copied(), EventType::Click),
            avg_time_spent: average_time_on_page(&section_events),
            avg_depth: scroll_depth(&section_events),
            section,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollHeatmapEntry {
    pub section: String,
    pub avg_depth: f64,
    pub visits: usize,
}

pub fn scroll_heatmap(stats: &[SectionStats]) -> Vec<ScrollHeatmapEntry> {
    stats
        .iter()
        .map(|s| ScrollHeatmapEntry {
            section: s.section.clone(),
            avg_depth: s.avg_depth,
            visits: s.views,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEngagement {
    pub section: String,
    pub avg_time_spent: f64,
    pub skip_rate: f64,
    pub interaction_rate: f64,
}

pub fn section_engagement(stats: &[SectionStats]) -> Vec<SectionEngagement> {
    stats
        .iter()
        .map(|s| SectionEngagement {
            section: s.section.clone(),
            avg_time_spent: s.avg_time_spent,
            skip_rate: s.drop_off_rate(),
            interaction_rate: s.interaction_rate(),
        })
        .collect()
}

/// Clicks in each section as a percentage of all views.
pub fn click_through_rates(events: &[&Event]) -> BTreeMap<String, f64> {
    let total_views = count_of(events.iter().copied(), EventType::View);
    let clicks: Vec<&Event> = events
        .iter()
        .copied()
        .filter(|e| e.is(EventType::Click))
        .collect();
    group_events(&clicks, GroupKey::Section)
        .into_iter()
        .map(|(section, section_clicks)| (section, percentage(section_clicks.len(), total_views)))
        .collect()
}

/// Event counts per UTC hour of day.
pub fn hour_counts(events: &[&Event]) -> [usize; 24] {
    let mut counts = [0usize; 24];
    for event in events {
        counts[event.timestamp.hour() as usize] += 1;
    }
    counts
}

/// Event counts per UTC weekday, Sunday first.
pub fn weekday_counts(events: &[&Event]) -> [usize; 7] {
    let mut counts = [0usize; 7];
    for event in events {
        counts[event.timestamp.weekday().num_days_from_sunday() as usize] += 1;
    }
    counts
}

/// Share of events per hour of day. All 24 hours are present.
pub fn time_of_day_patterns(events: &[&Event]) -> BTreeMap<u32, f64> {
    let total = events.len();
    (0u32..)
        .zip(hour_counts(events))
        .map(|(hour, count)| (hour, percentage(count, total)))
        .collect()
}

/// Share of events per weekday name. All seven days are present.
pub fn day_of_week_patterns(events: &[&Event]) -> BTreeMap<String, f64> {
    let total = events.len();
    WEEKDAYS
        .iter()
        .zip(weekday_counts(events))
        .map(|(day, count)| ((*day).to_string(), percentage(count, total)))
        .collect()
}

/// Share of events per device type, `"unknown"` when absent.
pub fn device_breakdown(events: &[&Event]) -> BTreeMap<String, f64> {
    share_by(events, |e| {
        e.device_type.map_or("unknown", |d| d.as_str()).to_string()
    })
}

/// Share of events per country, `"unknown"` when absent.
pub fn geographic_distribution(events: &[&Event]) -> BTreeMap<String, f64> {
    share_by(events, |e| e.country().unwrap_or("unknown").to_string())
}

fn share_by(events: &[&Event], key: impl Fn(&Event) -> String) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in events {
        *counts.entry(key(event)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(k, count)| (k, percentage(count, events.len())))
        .collect()
}
