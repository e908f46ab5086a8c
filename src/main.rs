use chrono::Utc;
use proposal_lens::alert::monitor::{AlertMonitor, Subscription};
use proposal_lens::config::Config;
use proposal_lens::server::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;

/// How often events older than the retention period are pruned from the window.
const RETENTION_SWEEP_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));

    tracing::info!(
        host = %config.host,
        port = config.port,
        window_capacity = config.window_capacity,
        tracking_enabled = config.engine.tracking_enabled,
        real_time = config.engine.enable_real_time_processing,
        "Starting Proposal Lens"
    );

    let state = Arc::new(AppState::new(&config));

    // Set up periodic retention sweep
    let retention_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RETENTION_SWEEP_SECS));
        loop {
            interval.tick().await;
            let retention_days = retention_state.engine_config().retention_days;
            if retention_days == 0 {
                continue;
            }
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
            let pruned = retention_state.window.prune_before(cutoff);
            if pruned > 0 {
                tracing::info!(pruned, retention_days, "Pruned expired events");
            }
        }
    });

    let monitor = config
        .engine
        .enable_real_time_processing
        .then(|| start_alert_monitor(&state, config.engine.alert_poll_interval_secs));

    let app = server::build_router(Arc::clone(&state));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            monitor,
            Duration::from_secs(config.shutdown_timeout_secs),
        ))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "proposal_lens=info,tower_http=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LENS_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start the alert monitor and a task that records each delivered batch on the
/// shared state.
fn start_alert_monitor(state: &Arc<AppState>, interval_secs: u64) -> (Subscription, JoinHandle<()>) {
    let monitor = AlertMonitor::new(Arc::clone(&state.window), Arc::clone(&state.config));
    let (subscription, mut rx) = monitor.subscribe(Duration::from_secs(interval_secs.max(1)));

    let delivery_state = Arc::clone(state);
    let delivery = tokio::spawn(async move {
        while let Some(alerts) = rx.recv().await {
            *delivery_state.latest_alerts.lock() = alerts;
        }
    });
    (subscription, delivery)
}

async fn shutdown_signal(monitor: Option<(Subscription, JoinHandle<()>)>, timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down");

    // Stopping the monitor closes its channel, which ends the delivery task.
    if let Some((subscription, delivery)) = monitor {
        subscription.unsubscribe();
        if tokio::time::timeout(timeout, delivery).await.is_err() {
            tracing::warn!("Alert delivery did not stop within the shutdown timeout");
        }
    }
}
