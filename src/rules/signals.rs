use crate::ingest::event::{DeviceType, Event, EventType};
use crate::query::breakdowns::{hour_counts, scroll_depth, section_stats, weekday_counts, SectionStats};
use crate::query::funnel::average_days_to_signature;
use crate::query::metrics::conversion_rate;
use crate::query::sessions::{average_time_on_page, bounce_rate, return_visitor_rate};
use crate::query::{count_of, percentage};

/// Scroll depth of desktop and mobile readers, present only when both groups have
/// events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceGap {
    pub desktop_scroll_depth: f64,
    pub mobile_scroll_depth: f64,
    pub events: usize,
}

impl DeviceGap {
    pub fn scroll_gap(&self) -> f64 {
        self.desktop_scroll_depth - self.mobile_scroll_depth
    }
}

/// Metrics the rule tables read, computed once per event set.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub events: usize,
    pub views: usize,
    pub clicks: usize,
    pub downloads: usize,
    pub signatures: usize,
    pub scroll_depth: f64,
    pub avg_time_on_page: f64,
    pub bounce_rate: f64,
    pub return_visitor_rate: f64,
    pub conversion_rate: f64,
    /// Signatures per download, as a percentage.
    pub download_to_signature_rate: f64,
    /// Clicks per view, as a percentage.
    pub click_through_rate: f64,
    pub device_gap: Option<DeviceGap>,
    pub sections: Vec<SectionStats>,
    pub hour_counts: [usize; 24],
    pub weekday_counts: [usize; 7],
    pub days_to_signature: Option<f64>,
}

impl Signals {
    pub fn from_events(events: &[&Event]) -> Self {
        let views = count_of(events.iter().copied(), EventType::View);
        let clicks = count_of(events.iter().copied(), EventType::Click);
        let downloads = count_of(events.iter().copied(), EventType::Download);
        let signatures = count_of(events.iter().copied(), EventType::Signature);

        Self {
            events: events.len(),
            views,
            clicks,
            downloads,
            signatures,
            scroll_depth: scroll_depth(events),
            avg_time_on_page: average_time_on_page(events),
            bounce_rate: bounce_rate(events),
            return_visitor_rate: return_visitor_rate(events),
            conversion_rate: conversion_rate(events),
            download_to_signature_rate: percentage(signatures, downloads),
            click_through_rate: percentage(clicks, views),
            device_gap: device_gap(events),
            sections: section_stats(events),
            hour_counts: hour_counts(events),
            weekday_counts: weekday_counts(events),
            days_to_signature: average_days_to_signature(events),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.events == 0
    }
}

fn device_gap(events: &[&Event]) -> Option<DeviceGap> {
    let desktop = on_device(events, DeviceType::Desktop);
    let mobile = on_device(events, DeviceType::Mobile);
    if desktop.is_empty() || mobile.is_empty() {
        return None;
    }
    Some(DeviceGap {
        desktop_scroll_depth: scroll_depth(&desktop),
        mobile_scroll_depth: scroll_depth(&mobile),
        events: desktop.len() + mobile.len(),
    })
}

fn on_device<'a>(events: &[&'a Event], device: DeviceType) -> Vec<&'a Event> {
    events
        .iter()
        .copied()
        .filter(|e| e.device_type == Some(device))
        .collect()
}

/// Position and count of the largest bucket. The earliest bucket wins ties.
pub fn peak<const N: usize>(counts: &[usize; N]) -> (usize, usize) {
    counts
        .iter()
        .enumerate()
        .fold((0, 0), |best, (i, &count)| if count > best.1 { (i, count) } else { best })
}

/// Indices of the `n` largest buckets, largest first, earlier buckets winning ties.
pub fn top_buckets<const N: usize>(counts: &[usize; N], n: usize) -> Vec<(usize, usize)> {
    let mut ranked: Vec<(usize, usize)> = counts.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Map;

    fn event(event_type: EventType, device: Option<DeviceType>, depth: Option<f64>) -> Event {
        Event {
            event_type,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::seconds(1),
            session_id: "s1".to_string(),
            visitor_id: None,
            proposal_id: None,
            user_id: None,
            section: None,
            scroll_depth: depth,
            time_on_page: None,
            device_type: device,
            browser_type: None,
            location: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_counts_and_rates() {
        let events = [
            event(EventType::View, None, None),
            event(EventType::View, None, None),
            event(EventType::Click, None, None),
            event(EventType::Download, None, None),
            event(EventType::Download, None, None),
            event(EventType::Signature, None, None),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let signals = Signals::from_events(&refs);
        assert_eq!(signals.events, 6);
        assert!((signals.conversion_rate - 50.0).abs() < f64::EPSILON);
        assert!((signals.download_to_signature_rate - 50.0).abs() < f64::EPSILON);
        assert!((signals.click_through_rate - 50.0).abs() < f64::EPSILON);
        assert!(signals.device_gap.is_none());
        assert_eq!(signals.hour_counts[9], 6);
    }

    #[test]
    fn test_device_gap() {
        let events = [
            event(EventType::Scroll, Some(DeviceType::Desktop), Some(90.0)),
            event(EventType::Scroll, Some(DeviceType::Mobile), Some(40.0)),
            event(EventType::View, Some(DeviceType::Tablet), None),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let gap = Signals::from_events(&refs).device_gap.unwrap();
        assert!((gap.scroll_gap() - 50.0).abs() < f64::EPSILON);
        assert_eq!(gap.events, 2);
    }

    #[test]
    fn test_empty_signals() {
        let signals = Signals::from_events(&[]);
        assert!(signals.is_empty());
        assert!(signals.sections.is_empty());
        assert!(signals.days_to_signature.is_none());
    }

    #[test]
    fn test_peak_and_top_buckets() {
        let counts = [0, 4, 2, 4, 1];
        assert_eq!(peak(&counts), (1, 4));
        assert_eq!(top_buckets(&counts, 3), vec![(1, 4), (3, 4), (2, 2)]);
        assert_eq!(peak(&[0usize; 3]), (0, 0));
    }
}
