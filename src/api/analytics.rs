use crate::alert::{evaluate_raw_alerts, AnalyticsAlert};
use crate::api::errors::ApiError;
use crate::config::EngineConfig;
use crate::engine::{AnalyticsRequest, AnalyticsResponse, RequestData, Timeframe};
use crate::ingest::event::{deserialize_events, RawEvent};
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Largest batch accepted by `POST /api/events`.
pub const MAX_BATCH_EVENTS: usize = 1000;

/// POST /api/analytics: Run an analytics request over the events in its body.
///
/// Always answers 200; failures, including a body that does not parse, are
/// reported inside the response.
pub async fn process_analytics(
    State(state): State<Arc<AppState>>,
    request: Result<Json<AnalyticsRequest>, JsonRejection>,
) -> Json<AnalyticsResponse> {
    match request {
        Ok(Json(request)) => Json(state.run_analytics(request).await),
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected analytics request body");
            Json(state.reject_analytics(format!(
                "Invalid analytics request: {}",
                rejection.body_text()
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventBatch {
    #[serde(deserialize_with = "deserialize_events")]
    pub events: Vec<RawEvent>,
}

/// POST /api/events: Append raw events to the in-memory window.
pub async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<EventBatch>,
) -> Result<Response, ApiError> {
    if !state.engine_config().tracking_enabled {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    if batch.events.is_empty() {
        return Err(ApiError::BadRequest("Event batch is empty".to_string()));
    }
    if batch.events.len() > MAX_BATCH_EVENTS {
        return Err(ApiError::PayloadTooLarge(format!(
            "Batch of {} events exceeds the limit of {MAX_BATCH_EVENTS}",
            batch.events.len()
        )));
    }

    let accepted = batch.events.len();
    let evicted = state.window.push_batch(batch.events);
    state
        .events_received_total
        .fetch_add(accepted as u64, Ordering::Relaxed);
    if evicted > 0 {
        tracing::debug!(evicted, "Event window full, oldest events evicted");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": accepted, "evicted": evicted })),
    )
        .into_response())
}

/// Query parameters for `GET /api/events/analytics`.
#[derive(Debug, Default, Deserialize)]
pub struct WindowAnalyticsParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub proposal_id: Option<String>,
    pub user_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl WindowAnalyticsParams {
    fn into_request(self, events: Vec<RawEvent>) -> Result<AnalyticsRequest, ApiError> {
        let timeframe = match (self.start, self.end) {
            (Some(start), Some(end)) => Some(Timeframe { start, end }),
            (None, None) => None,
            _ => {
                return Err(ApiError::BadRequest(
                    "start and end must be given together".to_string(),
                ))
            }
        };
        Ok(AnalyticsRequest {
            kind: self.kind,
            data: RequestData {
                proposal_id: self.proposal_id,
                user_id: self.user_id,
                events: Some(events),
                timeframe,
                filters: None,
            },
        })
    }
}

/// GET /api/events/analytics: Run an analytics request over the event window.
pub async fn window_analytics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowAnalyticsParams>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let request = params.into_request(state.window.snapshot())?;
    Ok(Json(state.run_analytics(request).await))
}

/// GET /api/alerts: Evaluate alert thresholds over the event window now.
pub async fn current_alerts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AnalyticsAlert>>, ApiError> {
    let config = state.engine_config();
    let state2 = Arc::clone(&state);
    let alerts = tokio::task::spawn_blocking(move || {
        evaluate_raw_alerts(&state2.window.snapshot(), &config, Utc::now())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Alert task panicked: {e}")))?;
    Ok(Json(alerts))
}

/// GET /api/alerts/latest: The last batch delivered by the alert monitor.
pub async fn latest_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<AnalyticsAlert>> {
    Json(state.latest_alerts.lock().clone())
}

/// GET /api/config: Current engine configuration.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<EngineConfig> {
    Json(EngineConfig::clone(&state.engine_config()))
}

/// PUT /api/config: Replace the engine configuration.
///
/// Requests already running keep the configuration they started with.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<EngineConfig>,
) -> Result<Json<EngineConfig>, ApiError> {
    config.validate().map_err(ApiError::BadRequest)?;
    *state.config.write() = Arc::new(config.clone());
    tracing::info!(
        tracking_enabled = config.tracking_enabled,
        anonymize_data = config.anonymize_data,
        retention_days = config.retention_days,
        "Engine configuration replaced"
    );
    Ok(Json(config))
}
