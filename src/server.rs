use crate::alert::AnalyticsAlert;
use crate::api::analytics;
use crate::config::{Config, EngineConfig, SharedEngineConfig};
use crate::engine::{AnalyticsEngine, AnalyticsRequest, AnalyticsResponse};
use crate::ingest::window::EventWindow;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Body limit for event batches and analytics requests (8 MB).
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state behind every handler.
pub struct AppState {
    pub config: SharedEngineConfig,
    pub window: Arc<EventWindow>,
    pub dashboard_origin: Option<String>,
    /// Most recent batch delivered by the alert monitor.
    pub latest_alerts: Mutex<Vec<AnalyticsAlert>>,
    pub events_received_total: AtomicU64,
    pub analytics_requests_total: AtomicU64,
    pub analytics_failures_total: AtomicU64,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            config: Arc::new(RwLock::new(Arc::new(config.engine.clone()))),
            window: Arc::new(EventWindow::new(config.window_capacity)),
            dashboard_origin: config.dashboard_origin.clone(),
            latest_alerts: Mutex::new(Vec::new()),
            events_received_total: AtomicU64::new(0),
            analytics_requests_total: AtomicU64::new(0),
            analytics_failures_total: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current engine configuration.
    pub fn engine_config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config.read())
    }

    pub async fn run_analytics(&self, request: AnalyticsRequest) -> AnalyticsResponse {
        let engine = AnalyticsEngine::new(self.engine_config());
        let response = engine.process_analytics(request).await;
        self.analytics_requests_total.fetch_add(1, Ordering::Relaxed);
        if !response.success {
            self.analytics_failures_total.fetch_add(1, Ordering::Relaxed);
        }
        response
    }

    /// Count and answer a request that never reached the engine.
    pub fn reject_analytics(&self, error: impl Into<String>) -> AnalyticsResponse {
        self.analytics_requests_total.fetch_add(1, Ordering::Relaxed);
        self.analytics_failures_total.fetch_add(1, Ordering::Relaxed);
        AnalyticsResponse::failure(error)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Permissive CORS for ingestion (tracking emitter runs on any origin)
    let ingestion_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let dashboard_cors = build_dashboard_cors(state.dashboard_origin.as_deref());

    let ingestion_routes = Router::new()
        .route("/events", post(analytics::ingest_events))
        .layer(ingestion_cors);

    let dashboard_routes = Router::new()
        .route("/analytics", post(analytics::process_analytics))
        .route("/events/analytics", get(analytics::window_analytics))
        .route("/alerts", get(analytics::current_alerts))
        .route("/alerts/latest", get(analytics::latest_alerts))
        .route(
            "/config",
            get(analytics::get_config).put(analytics::put_config),
        )
        .layer(dashboard_cors);

    let api_routes = Router::new()
        .merge(ingestion_routes)
        .merge(dashboard_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api", api_routes)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(30),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

/// Build CORS layer for dashboard routes based on configured origin.
fn build_dashboard_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    dashboard_origin.map_or_else(
        || {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        },
        |origin| {
            let allowed_origin = origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("*"));
            CorsLayer::new()
                .allow_origin(allowed_origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT])
                .allow_headers([header::CONTENT_TYPE])
        },
    )
}

/// GET /health: Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed: Detailed health check with engine state.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    let config = state.engine_config();

    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "window_events": state.window.len(),
        "window_capacity": state.window.capacity(),
        "tracking_enabled": config.tracking_enabled,
        "anonymize_data": config.anonymize_data,
        "real_time_processing": config.enable_real_time_processing,
        "latest_alerts": state.latest_alerts.lock().len(),
    }))
}

/// GET /metrics: Prometheus-compatible metrics endpoint.
async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    use std::fmt::Write;

    let window_events = state.window.len();
    let window_capacity = state.window.capacity();
    let tracking_enabled = u8::from(state.engine_config().tracking_enabled);
    let latest_alerts = state.latest_alerts.lock().len();
    let events_received = state.events_received_total.load(Ordering::Relaxed);
    let requests = state.analytics_requests_total.load(Ordering::Relaxed);
    let failures = state.analytics_failures_total.load(Ordering::Relaxed);

    let mut out = String::with_capacity(1024);
    let _ = writeln!(
        out,
        "# HELP lens_window_events Number of raw events in the in-memory window"
    );
    let _ = writeln!(out, "# TYPE lens_window_events gauge");
    let _ = writeln!(out, "lens_window_events {window_events}");
    let _ = writeln!(
        out,
        "# HELP lens_window_capacity Maximum number of events the window holds"
    );
    let _ = writeln!(out, "# TYPE lens_window_capacity gauge");
    let _ = writeln!(out, "lens_window_capacity {window_capacity}");
    let _ = writeln!(
        out,
        "# HELP lens_tracking_enabled Whether event tracking is enabled"
    );
    let _ = writeln!(out, "# TYPE lens_tracking_enabled gauge");
    let _ = writeln!(out, "lens_tracking_enabled {tracking_enabled}");
    let _ = writeln!(
        out,
        "# HELP lens_latest_alerts Alerts in the most recent monitor batch"
    );
    let _ = writeln!(out, "# TYPE lens_latest_alerts gauge");
    let _ = writeln!(out, "lens_latest_alerts {latest_alerts}");
    let _ = writeln!(
        out,
        "# HELP lens_events_received_total Total events accepted since startup"
    );
    let _ = writeln!(out, "# TYPE lens_events_received_total counter");
    let _ = writeln!(out, "lens_events_received_total {events_received}");
    let _ = writeln!(
        out,
        "# HELP lens_analytics_requests_total Total analytics requests processed"
    );
    let _ = writeln!(out, "# TYPE lens_analytics_requests_total counter");
    let _ = writeln!(out, "lens_analytics_requests_total {requests}");
    let _ = writeln!(
        out,
        "# HELP lens_analytics_failures_total Analytics requests answered with success=false"
    );
    let _ = writeln!(out, "# TYPE lens_analytics_failures_total counter");
    let _ = writeln!(out, "lens_analytics_failures_total {failures}");

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], out)
}
