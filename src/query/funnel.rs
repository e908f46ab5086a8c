use crate::ingest::event::{Event, EventType};
use crate::query::breakdowns::SectionStats;
use crate::query::filter::{group_events, GroupKey};
use crate::query::sessions::{average_time_on_page, session_duration};
use crate::query::{count_of, mean, percentage};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Funnel steps in the order a recipient is expected to reach them.
pub const FUNNEL_STEPS: [EventType; 5] = [
    EventType::View,
    EventType::Scroll,
    EventType::Click,
    EventType::Download,
    EventType::Signature,
];

/// Maximum number of conversion paths reported.
pub const MAX_CONVERSION_PATHS: usize = 10;

/// Sections whose exit rate does not exceed this are not reported as drop-off points.
const DROP_OFF_REPORT_RATE: f64 = 20.0;

/// Sessions that reached a funnel step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStep {
    pub step: EventType,
    pub count: usize,
    /// Sessions reaching this step as a percentage of sessions with a view.
    pub rate: f64,
}

/// Distinct sessions per funnel step, relative to sessions with a view.
///
/// The view step is always 100 when any view exists and 0 otherwise. Later steps
/// are straight incidence rates and may exceed 100 when sessions skip the view.
pub fn funnel_metrics(events: &[&Event]) -> Vec<FunnelStep> {
    let mut sessions: BTreeMap<EventType, BTreeSet<&str>> = BTreeMap::new();
    for event in events {
        if FUNNEL_STEPS.contains(&event.event_type) {
            sessions
                .entry(event.event_type)
                .or_default()
                .insert(event.session_id.as_str());
        }
    }

    let view_sessions = sessions.get(&EventType::View).map_or(0, BTreeSet::len);
    FUNNEL_STEPS
        .iter()
        .map(|&step| {
            let count = sessions.get(&step).map_or(0, BTreeSet::len);
            FunnelStep {
                step,
                count,
                rate: percentage(count, view_sessions),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropOffPoint {
    pub section: String,
    pub rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sections whose exit rate exceeds 20%, with a guess at why readers leave.
pub fn drop_off_points(stats: &[SectionStats]) -> Vec<DropOffPoint> {
    stats
        .iter()
        .filter(|s| s.drop_off_rate() > DROP_OFF_REPORT_RATE)
        .map(|s| {
            let rate = s.drop_off_rate();
            let reason = if s.avg_time_spent < 15.0 {
                Some("Quick exit - content may be irrelevant or confusing")
            } else if s.avg_time_spent > 120.0 && rate > 30.0 {
                Some("Long engagement but high exit - content may be overwhelming")
            } else {
                None
            };
            DropOffPoint {
                section: s.section.clone(),
                rate,
                reason: reason.map(str::to_string),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStage {
    pub stage: String,
    pub completion: f64,
    pub avg_time: f64,
}

/// Three-stage view → review → sign flow.
pub fn signature_flow(events: &[&Event]) -> Vec<SignatureStage> {
    let views = count_of(events.iter().copied(), EventType::View);
    let downloads = count_of(events.iter().copied(), EventType::Download);
    let signatures = count_of(events.iter().copied(), EventType::Signature);

    vec![
        SignatureStage {
            stage: "Initial View".to_string(),
            completion: 100.0,
            avg_time: 0.0,
        },
        SignatureStage {
            stage: "Document Review".to_string(),
            completion: percentage(downloads, views),
            avg_time: average_time_on_page(events),
        },
        SignatureStage {
            stage: "Signature Completion".to_string(),
            completion: percentage(signatures, views),
            avg_time: 0.0,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPath {
    pub path: Vec<EventType>,
    pub count: usize,
    pub avg_time: f64,
    pub conversion_rate: f64,
}

/// Most frequent per-session event sequences, up to [`MAX_CONVERSION_PATHS`].
///
/// Paths with equal counts keep their lexicographic order.
pub fn conversion_paths(events: &[&Event]) -> Vec<ConversionPath> {
    #[derive(Default)]
    struct PathTally {
        count: usize,
        total_time: f64,
        conversions: usize,
    }

    let mut tallies: BTreeMap<Vec<EventType>, PathTally> = BTreeMap::new();
    for session in group_events(events, GroupKey::Session).into_values() {
        let mut ordered = session.clone();
        ordered.sort_by_key(|e| e.timestamp);
        let path: Vec<EventType> = ordered.iter().map(|e| e.event_type).collect();
        let converted = path.contains(&EventType::Signature);

        let tally = tallies.entry(path).or_default();
        tally.count += 1;
        tally.total_time += session_duration(&session);
        tally.conversions += usize::from(converted);
    }

    let mut paths: Vec<ConversionPath> = tallies
        .into_iter()
        .map(|(path, tally)| ConversionPath {
            path,
            count: tally.count,
            avg_time: tally.total_time / tally.count as f64,
            conversion_rate: percentage(tally.conversions, tally.count),
        })
        .collect();
    paths.sort_by(|a, b| b.count.cmp(&a.count));
    paths.truncate(MAX_CONVERSION_PATHS);
    paths
}

/// Mean days between a signature and the earliest view that led to it.
///
/// A view leads to a signature when it happened no later than the signature and
/// shares its session, or both carry the same proposal id. Signatures with no such
/// view are skipped. `None` when nothing could be matched.
pub fn average_days_to_signature(events: &[&Event]) -> Option<f64> {
    let views: Vec<&Event> = events
        .iter()
        .copied()
        .filter(|e| e.is(EventType::View))
        .collect();

    let gaps: Vec<f64> = events
        .iter()
        .filter(|e| e.is(EventType::Signature))
        .filter_map(|signature| {
            views
                .iter()
                .filter(|view| view.timestamp <= signature.timestamp)
                .filter(|view| {
                    view.session_id == signature.session_id
                        || (view.proposal_id.is_some() && view.proposal_id == signature.proposal_id)
                })
                .map(|view| view.timestamp)
                .min()
                .map(|first_view| {
                    (signature.timestamp - first_view).num_seconds() as f64 / 86_400.0
                })
        })
        .collect();

    if gaps.is_empty() {
        None
    } else {
        Some(mean(&gaps))
    }
}
