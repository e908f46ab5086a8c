//! Request orchestration: clean, filter, dispatch, assemble.

use crate::config::EngineConfig;
use crate::ingest::cleaner::{clean_events, CleaningOptions};
use crate::ingest::event::{
    deserialize_opt_events, parse_timestamp, DeviceType, Event, EventType, RawEvent,
};
use crate::query::filter::{filter_events, DateRange, EventFilter};
use crate::query::metrics::{
    assess_data_quality, calculate_metrics, summarize, AnalyticsMetrics, AnalyticsSummary,
    DataQuality,
};
use crate::rules::insights::{generate_insights, Insight};
use crate::rules::recommendations::{generate_recommendations, Recommendation};
use crate::rules::{RuleContext, Signals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid timeframe {field}: {value:?}")]
    InvalidTimeframe { field: &'static str, value: String },

    #[error("timeframe start {start} is after end {end}")]
    InvertedTimeframe {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("unknown event type filter: {0:?}")]
    UnknownEventType(String),

    #[error("unknown device type filter: {0:?}")]
    UnknownDeviceType(String),

    #[error("analytics task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Which parts of the analytics a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Event,
    Summary,
    Insight,
    Optimization,
    Full,
}

impl RequestType {
    /// Unknown or absent types fall back to [`RequestType::Full`].
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("event") => Self::Event,
            Some("summary") => Self::Summary,
            Some("insight") => Self::Insight,
            Some("optimization") => Self::Optimization,
            _ => Self::Full,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Summary => "summary",
            Self::Insight => "insight",
            Self::Optimization => "optimization",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: RequestData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub proposal_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_events")]
    pub events: Option<Vec<RawEvent>>,
    pub timeframe: Option<Timeframe>,
    pub filters: Option<RequestFilters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Timeframe {
    pub start: String,
    pub end: String,
}

impl Timeframe {
    fn to_range(&self) -> Result<DateRange, EngineError> {
        let parse = |field: &'static str, value: &str| {
            parse_timestamp(value).ok_or_else(|| EngineError::InvalidTimeframe {
                field,
                value: value.to_string(),
            })
        };
        let start = parse("start", &self.start)?;
        let end = parse("end", &self.end)?;
        if start > end {
            return Err(EngineError::InvertedTimeframe { start, end });
        }
        Ok(DateRange { start, end })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestFilters {
    pub proposal_ids: Vec<String>,
    pub user_ids: Vec<String>,
    pub date_range: Option<Timeframe>,
    pub event_types: Vec<String>,
    pub device_types: Vec<String>,
    pub min_session_duration: Option<f64>,
}

impl RequestFilters {
    fn to_filter(&self) -> Result<EventFilter, EngineError> {
        let event_types = self
            .event_types
            .iter()
            .map(|t| EventType::parse(t).ok_or_else(|| EngineError::UnknownEventType(t.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let device_types = self
            .device_types
            .iter()
            .map(|d| DeviceType::parse(d).ok_or_else(|| EngineError::UnknownDeviceType(d.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventFilter {
            proposal_ids: self.proposal_ids.clone(),
            user_ids: self.user_ids.clone(),
            date_range: self.date_range.as_ref().map(Timeframe::to_range).transpose()?,
            event_types,
            device_types,
            min_session_duration: self.min_session_duration,
        })
    }
}

impl RequestData {
    /// The explicit `filters` block, then the top-level proposal, user and
    /// timeframe restrictions. Both are applied, in that order.
    fn filters(&self) -> Result<[EventFilter; 2], EngineError> {
        let explicit = self
            .filters
            .as_ref()
            .map(RequestFilters::to_filter)
            .transpose()?
            .unwrap_or_default();
        let scope = EventFilter {
            proposal_ids: self.proposal_id.iter().cloned().collect(),
            user_ids: self.user_id.iter().cloned().collect(),
            date_range: self.timeframe.as_ref().map(Timeframe::to_range).transpose()?,
            ..EventFilter::default()
        };
        Ok([explicit, scope])
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Analytics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AnalyticsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<Insight>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<Recommendation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AnalyticsMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub success: bool,
    pub analytics: Analytics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds spent on the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<DataQuality>,
}

impl AnalyticsResponse {
    pub const fn success(analytics: Analytics, processing_time: u64, quality: DataQuality) -> Self {
        Self {
            success: true,
            analytics,
            error: None,
            processing_time: Some(processing_time),
            data_quality: Some(quality),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            analytics: Analytics::default(),
            error: Some(error.into()),
            processing_time: None,
            data_quality: None,
        }
    }
}

/// Stateless analytics pipeline over an immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct AnalyticsEngine {
    config: Arc<EngineConfig>,
}

impl AnalyticsEngine {
    pub const fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub async fn process_analytics(&self, request: AnalyticsRequest) -> AnalyticsResponse {
        self.process_analytics_at(request, Utc::now()).await
    }

    /// Run a request as of `now`. Never fails: every error, including a panic in a
    /// worker task, becomes a `success: false` response.
    pub async fn process_analytics_at(
        &self,
        request: AnalyticsRequest,
        now: DateTime<Utc>,
    ) -> AnalyticsResponse {
        let started = Instant::now();
        let kind = RequestType::parse(request.kind.as_deref());
        let received = request.data.events.as_ref().map_or(0, Vec::len);

        match self.run(kind, request.data, now).await {
            Ok((analytics, quality, analyzed)) => {
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(
                    kind = kind.as_str(),
                    received,
                    analyzed,
                    elapsed_ms = elapsed,
                    "Processed analytics request"
                );
                AnalyticsResponse::success(analytics, elapsed, quality)
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), received, error = %e, "Analytics request failed");
                AnalyticsResponse::failure(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        kind: RequestType,
        data: RequestData,
        now: DateTime<Utc>,
    ) -> Result<(Analytics, DataQuality, usize), EngineError> {
        let filters = data.filters()?;
        let raw = data.events.unwrap_or_default();
        let cleaned = clean_events(&raw, CleaningOptions::from(&*self.config), now);
        let events = filters
            .iter()
            .fold(cleaned, |events, filter| filter_events(events, filter));
        let analyzed = events.len();
        let events = Arc::new(events);

        let config = Arc::clone(&self.config);
        let quality = blocking(&events, move |events| assess_data_quality(events, now)).await?;

        let analytics = match kind {
            RequestType::Event => Analytics {
                metrics: Some(
                    blocking(&events, move |events| calculate_metrics(events, &config.benchmarks))
                        .await?,
                ),
                ..Analytics::default()
            },
            RequestType::Summary => Analytics {
                summary: Some(blocking(&events, summarize).await?),
                ..Analytics::default()
            },
            RequestType::Insight => Analytics {
                insights: Some(blocking(&events, move |events| insights_for(events, &config)).await?),
                ..Analytics::default()
            },
            RequestType::Optimization => {
                let (insights, recommendations) = blocking(&events, move |events| {
                    let signals = Signals::from_events(events);
                    let ctx = rule_context(&signals, &config);
                    (generate_insights(&ctx), generate_recommendations(&ctx))
                })
                .await?;
                Analytics {
                    insights: Some(insights),
                    recommendations: Some(recommendations),
                    ..Analytics::default()
                }
            }
            RequestType::Full => {
                // Both rule tables read the same signals.
                let signals = Arc::new(blocking(&events, Signals::from_events).await?);
                let insight_signals = Arc::clone(&signals);
                let insight_config = Arc::clone(&config);
                let recommendation_config = Arc::clone(&config);
                let (summary, insights, recommendations, metrics) = tokio::try_join!(
                    blocking(&events, summarize),
                    blocking(&events, move |_| {
                        generate_insights(&rule_context(&insight_signals, &insight_config))
                    }),
                    blocking(&events, move |_| {
                        generate_recommendations(&rule_context(&signals, &recommendation_config))
                    }),
                    blocking(&events, move |events| calculate_metrics(events, &config.benchmarks)),
                )?;
                Analytics {
                    summary: Some(summary),
                    insights: Some(insights),
                    recommendations: Some(recommendations),
                    metrics: Some(metrics),
                }
            }
        };
        Ok((analytics, quality, analyzed))
    }
}

/// Run `f` over the shared events on the blocking pool. A panic inside `f` comes
/// back as [`EngineError::Task`].
async fn blocking<T, F>(events: &Arc<Vec<Event>>, f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&[&Event]) -> T + Send + 'static,
{
    let events = Arc::clone(events);
    let result = tokio::task::spawn_blocking(move || {
        let refs: Vec<&Event> = events.iter().collect();
        f(&refs)
    })
    .await?;
    Ok(result)
}

fn rule_context<'a>(signals: &'a Signals, config: &'a EngineConfig) -> RuleContext<'a> {
    RuleContext {
        signals,
        thresholds: &config.rules,
        benchmarks: &config.benchmarks,
    }
}

fn insights_for(events: &[&Event], config: &EngineConfig) -> Vec<Insight> {
    let signals = Signals::from_events(events);
    generate_insights(&rule_context(&signals, config))
}
