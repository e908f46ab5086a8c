use crate::ingest::event::{Event, EventType};
use crate::query::count_of;
use crate::query::filter::{group_events, GroupKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single time bucket with view and visitor counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBucket {
    pub date: String,
    pub views: usize,
    pub unique_visitors: usize,
}

/// Time granularity for bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    const fn group_key(self) -> GroupKey {
        match self {
            Self::Hour => GroupKey::Hour,
            Self::Day => GroupKey::Day,
            Self::Week => GroupKey::Week,
            Self::Month => GroupKey::Month,
        }
    }
}

/// Views and unique visitors per time bucket, ordered by bucket key.
///
/// Unique visitors are keyed by visitor id, falling back to session id. Buckets are
/// only emitted for periods that have events.
pub fn aggregate_by_time(events: &[&Event], granularity: Granularity) -> Vec<TimeBucket> {
    group_events(events, granularity.group_key())
        .into_iter()
        .map(|(date, bucket)| TimeBucket {
            views: count_of(bucket.iter().copied(), EventType::View),
            unique_visitors: bucket
                .iter()
                .map(|e| e.visitor_or_session())
                .collect::<BTreeSet<_>>()
                .len(),
            date,
        })
        .collect()
}
