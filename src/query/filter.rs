use crate::ingest::event::{DeviceType, Event, EventType};
use crate::query::sessions::session_duration;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive timestamp range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Conjunction of optional event predicates. Empty lists and `None` fields match
/// every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub proposal_ids: Vec<String>,
    pub user_ids: Vec<String>,
    pub date_range: Option<DateRange>,
    pub event_types: Vec<EventType>,
    pub device_types: Vec<DeviceType>,
    /// Drop every event of a session shorter than this many seconds.
    pub min_session_duration: Option<f64>,
}

impl EventFilter {
    pub fn is_empty(&self) -> bool {
        self.proposal_ids.is_empty()
            && self.user_ids.is_empty()
            && self.date_range.is_none()
            && self.event_types.is_empty()
            && self.device_types.is_empty()
            && self.min_session_duration.is_none()
    }

    fn matches(&self, event: &Event) -> bool {
        if !self.proposal_ids.is_empty()
            && !event
                .proposal_id
                .as_ref()
                .is_some_and(|id| self.proposal_ids.contains(id))
        {
            return false;
        }
        if !self.user_ids.is_empty()
            && !event
                .user_id
                .as_ref()
                .is_some_and(|id| self.user_ids.contains(id))
        {
            return false;
        }
        if let Some(range) = self.date_range {
            if !range.contains(event.timestamp) {
                return false;
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.device_types.is_empty()
            && !event
                .device_type
                .is_some_and(|d| self.device_types.contains(&d))
        {
            return false;
        }
        true
    }
}

/// Keep only the events matching every predicate of `filter`.
///
/// The session-duration bound is evaluated after the per-event predicates, over the
/// sessions that survive them.
pub fn filter_events(events: Vec<Event>, filter: &EventFilter) -> Vec<Event> {
    if filter.is_empty() {
        return events;
    }
    let mut kept: Vec<Event> = events.into_iter().filter(|e| filter.matches(e)).collect();

    if let Some(min_duration) = filter.min_session_duration {
        let refs: Vec<&Event> = kept.iter().collect();
        let short_sessions: Vec<String> = group_events(&refs, GroupKey::Session)
            .into_iter()
            .filter(|(_, session)| session_duration(session) < min_duration)
            .map(|(id, _)| id)
            .collect();
        kept.retain(|e| short_sessions.binary_search(&e.session_id).is_err());
    }
    kept
}

/// Grouping strategy for [`group_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    Hour,
    Day,
    Week,
    Month,
    Proposal,
    User,
    Section,
    Session,
}

impl GroupKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "proposal" => Some(Self::Proposal),
            "user" => Some(Self::User),
            "section" => Some(Self::Section),
            "session" => Some(Self::Session),
            _ => None,
        }
    }

    /// Bucket key of `event` under this strategy.
    pub fn key_for(self, event: &Event) -> String {
        let ts = event.timestamp;
        match self {
            Self::Hour => ts.format("%Y-%m-%dT%H").to_string(),
            Self::Day => ts.format("%Y-%m-%d").to_string(),
            Self::Week => format!("{}-W{}", ts.year(), ts.iso_week().week()),
            Self::Month => ts.format("%Y-%m").to_string(),
            Self::Proposal => event
                .proposal_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            Self::User => event.person_key().to_string(),
            Self::Section => event
                .section
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            Self::Session => event.session_id.clone(),
        }
    }
}

/// Bucket events by key. Within a bucket, events keep their input order.
pub fn group_events<'a>(events: &[&'a Event], key: GroupKey) -> BTreeMap<String, Vec<&'a Event>> {
    let mut groups: BTreeMap<String, Vec<&'a Event>> = BTreeMap::new();
    for &event in events {
        groups.entry(key.key_for(event)).or_default().push(event);
    }
    groups
}
