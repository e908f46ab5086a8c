use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of raw events kept in the in-memory window.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Dashboard origin for CORS restrictions on analytics routes.
    /// If not set, any origin is allowed.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Analytics engine configuration. Immutable once built; swap the whole value to
/// reconfigure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub tracking_enabled: bool,
    #[serde(default)]
    pub anonymize_data: bool,
    /// Days of events kept in the window. 0 = unlimited.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
    /// Drop events whose User-Agent looks automated.
    #[serde(default = "default_true")]
    pub exclude_internal_traffic: bool,
    /// Run the periodic alert monitor.
    #[serde(default)]
    pub enable_real_time_processing: bool,
    #[serde(default = "default_alert_poll_interval_secs")]
    pub alert_poll_interval_secs: u64,
    #[serde(default)]
    pub benchmarks: Benchmarks,
    #[serde(default)]
    pub rules: RuleThresholds,
}

/// Live engine configuration. Readers clone the inner `Arc`, writers replace it.
pub type SharedEngineConfig = Arc<RwLock<Arc<EngineConfig>>>;

/// Metric levels that raise an alert when crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Alert when bounce rate (%) rises above this.
    pub bounce_rate: f64,
    /// Alert when conversion rate (%) falls below this.
    pub conversion_rate: f64,
    /// Alert when average time on page (seconds) falls below this.
    pub avg_time_on_page: f64,
    /// Alert when scroll depth (%) falls below this.
    pub scroll_depth: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            bounce_rate: 60.0,
            conversion_rate: 1.0,
            avg_time_on_page: 60.0,
            scroll_depth: 30.0,
        }
    }
}

/// Industry reference values used for relative comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Benchmarks {
    pub bounce_rate: f64,
    pub conversion_rate: f64,
    pub avg_time_on_page: f64,
    pub scroll_depth: f64,
    pub return_visitor_rate: f64,
    pub mobile_conversion_rate: f64,
}

impl Default for Benchmarks {
    fn default() -> Self {
        Self {
            bounce_rate: 40.0,
            conversion_rate: 2.5,
            avg_time_on_page: 180.0,
            scroll_depth: 65.0,
            return_visitor_rate: 30.0,
            mobile_conversion_rate: 1.8,
        }
    }
}

/// Thresholds of the insight and recommendation rule tables.
///
/// The defaults are the heuristics the rule set was tuned with. Percentages are on a
/// 0-100 scale and times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub strong_engagement_scroll_depth: f64,
    pub strong_engagement_time_on_page: f64,
    pub weak_engagement_scroll_depth: f64,
    pub weak_engagement_bounce_rate: f64,
    pub mobile_scroll_gap: f64,
    pub conversion_above_benchmark: f64,
    pub conversion_below_benchmark: f64,
    pub download_to_signature_ratio: f64,
    pub download_to_signature_rate: f64,
    pub section_drop_off_rate: f64,
    pub section_min_views: usize,
    pub section_engaged_time: f64,
    pub peak_hour_factor: f64,
    pub peak_day_factor: f64,
    pub opening_hook_scroll_depth: f64,
    pub restructure_bounce_rate: f64,
    pub section_low_engagement_time: f64,
    pub section_min_events: usize,
    pub responsive_scroll_gap: f64,
    pub call_to_action_ctr: f64,
    pub follow_up_days_to_signature: f64,
    pub nurture_download_ratio: f64,
    pub nurture_return_visitor_rate: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            strong_engagement_scroll_depth: 70.0,
            strong_engagement_time_on_page: 240.0,
            weak_engagement_scroll_depth: 30.0,
            weak_engagement_bounce_rate: 60.0,
            mobile_scroll_gap: 20.0,
            conversion_above_benchmark: 1.5,
            conversion_below_benchmark: 0.5,
            download_to_signature_ratio: 2.0,
            download_to_signature_rate: 30.0,
            section_drop_off_rate: 40.0,
            section_min_views: 5,
            section_engaged_time: 60.0,
            peak_hour_factor: 1.5,
            peak_day_factor: 1.3,
            opening_hook_scroll_depth: 50.0,
            restructure_bounce_rate: 50.0,
            section_low_engagement_time: 30.0,
            section_min_events: 5,
            responsive_scroll_gap: 15.0,
            call_to_action_ctr: 10.0,
            follow_up_days_to_signature: 7.0,
            nurture_download_ratio: 1.5,
            nurture_return_visitor_rate: 30.0,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_window_capacity() -> usize {
    50_000
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_retention_days() -> u32 {
    365
}

const fn default_alert_poll_interval_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            window_capacity: default_window_capacity(),
            dashboard_origin: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            anonymize_data: false,
            retention_days: default_retention_days(),
            alert_thresholds: AlertThresholds::default(),
            exclude_internal_traffic: true,
            enable_real_time_processing: false,
            alert_poll_interval_secs: default_alert_poll_interval_secs(),
            benchmarks: Benchmarks::default(),
            rules: RuleThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.alert_poll_interval_secs == 0 {
            return Err("alert_poll_interval_secs must be at least 1".to_string());
        }
        let t = &self.alert_thresholds;
        let thresholds = [
            ("alert_thresholds.bounce_rate", t.bounce_rate),
            ("alert_thresholds.conversion_rate", t.conversion_rate),
            ("alert_thresholds.avg_time_on_page", t.avg_time_on_page),
            ("alert_thresholds.scroll_depth", t.scroll_depth),
        ];
        let b = &self.benchmarks;
        let benchmarks = [
            ("benchmarks.bounce_rate", b.bounce_rate),
            ("benchmarks.conversion_rate", b.conversion_rate),
            ("benchmarks.avg_time_on_page", b.avg_time_on_page),
            ("benchmarks.scroll_depth", b.scroll_depth),
            ("benchmarks.return_visitor_rate", b.return_visitor_rate),
            ("benchmarks.mobile_conversion_rate", b.mobile_conversion_rate),
        ];
        let r = &self.rules;
        let rules = [
            ("rules.strong_engagement_scroll_depth", r.strong_engagement_scroll_depth),
            ("rules.strong_engagement_time_on_page", r.strong_engagement_time_on_page),
            ("rules.weak_engagement_scroll_depth", r.weak_engagement_scroll_depth),
            ("rules.weak_engagement_bounce_rate", r.weak_engagement_bounce_rate),
            ("rules.mobile_scroll_gap", r.mobile_scroll_gap),
            ("rules.conversion_above_benchmark", r.conversion_above_benchmark),
            ("rules.conversion_below_benchmark", r.conversion_below_benchmark),
            ("rules.download_to_signature_ratio", r.download_to_signature_ratio),
            ("rules.download_to_signature_rate", r.download_to_signature_rate),
            ("rules.section_drop_off_rate", r.section_drop_off_rate),
            ("rules.section_engaged_time", r.section_engaged_time),
            ("rules.peak_hour_factor", r.peak_hour_factor),
            ("rules.peak_day_factor", r.peak_day_factor),
            ("rules.opening_hook_scroll_depth", r.opening_hook_scroll_depth),
            ("rules.restructure_bounce_rate", r.restructure_bounce_rate),
            ("rules.section_low_engagement_time", r.section_low_engagement_time),
            ("rules.responsive_scroll_gap", r.responsive_scroll_gap),
            ("rules.call_to_action_ctr", r.call_to_action_ctr),
            ("rules.follow_up_days_to_signature", r.follow_up_days_to_signature),
            ("rules.nurture_download_ratio", r.nurture_download_ratio),
            ("rules.nurture_return_visitor_rate", r.nurture_return_visitor_rate),
        ];
        for (name, value) in thresholds.into_iter().chain(benchmarks).chain(rules) {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `LENS_HOST` → host
    /// - `LENS_PORT` → port
    /// - `LENS_WINDOW_CAPACITY` → window_capacity
    /// - `LENS_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `LENS_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    /// - `LENS_TRACKING_ENABLED` → engine.tracking_enabled
    /// - `LENS_ANONYMIZE` → engine.anonymize_data
    /// - `LENS_RETENTION_DAYS` → engine.retention_days
    /// - `LENS_EXCLUDE_INTERNAL` → engine.exclude_internal_traffic
    /// - `LENS_REALTIME` → engine.enable_real_time_processing
    /// - `LENS_ALERT_INTERVAL` → engine.alert_poll_interval_secs
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("LENS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("LENS_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(val) = std::env::var("LENS_WINDOW_CAPACITY") {
            if let Ok(c) = val.parse() {
                config.window_capacity = c;
            }
        }
        if let Ok(origin) = std::env::var("LENS_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        if let Ok(val) = std::env::var("LENS_SHUTDOWN_TIMEOUT") {
            if let Ok(t) = val.parse() {
                config.shutdown_timeout_secs = t;
            }
        }
        if let Ok(val) = std::env::var("LENS_TRACKING_ENABLED") {
            config.engine.tracking_enabled = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("LENS_ANONYMIZE") {
            config.engine.anonymize_data = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("LENS_RETENTION_DAYS") {
            if let Ok(d) = val.parse() {
                config.engine.retention_days = d;
            }
        }
        if let Ok(val) = std::env::var("LENS_EXCLUDE_INTERNAL") {
            config.engine.exclude_internal_traffic = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("LENS_REALTIME") {
            config.engine.enable_real_time_processing = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("LENS_ALERT_INTERVAL") {
            if let Ok(i) = val.parse() {
                config.engine.alert_poll_interval_secs = i;
            }
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "0" && val.to_lowercase() != "false"
}
