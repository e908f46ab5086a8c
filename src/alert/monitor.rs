use crate::alert::{evaluate_raw_alerts, AnalyticsAlert};
use crate::config::SharedEngineConfig;
use crate::ingest::event::RawEvent;
use crate::ingest::window::EventWindow;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Alert batches buffered before the monitor waits on its consumer.
const CHANNEL_CAPACITY: usize = 16;

/// Anything the monitor can read a current batch of raw events from.
pub trait EventSource: Send + Sync + 'static {
    fn events(&self) -> Vec<RawEvent>;
}

impl EventSource for EventWindow {
    fn events(&self) -> Vec<RawEvent> {
        self.snapshot()
    }
}

/// Periodically evaluates alerts over an event source.
pub struct AlertMonitor<S: EventSource> {
    source: Arc<S>,
    config: SharedEngineConfig,
}

impl<S: EventSource> AlertMonitor<S> {
    pub const fn new(source: Arc<S>, config: SharedEngineConfig) -> Self {
        Self { source, config }
    }

    /// Start polling every `period`. Each non-empty batch of alerts is logged and
    /// sent on the returned channel.
    ///
    /// The configuration is re-read on every tick. Polling stops when the
    /// [`Subscription`] is dropped or the receiver goes away.
    pub fn subscribe(&self, period: Duration) -> (Subscription, mpsc::Receiver<Vec<AnalyticsAlert>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let source = Arc::clone(&self.source);
        let config = Arc::clone(&self.config);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;

                let snapshot = Arc::clone(&config.read());
                let alerts = evaluate_raw_alerts(&source.events(), &snapshot, Utc::now());
                if alerts.is_empty() {
                    continue;
                }
                for alert in &alerts {
                    tracing::warn!(
                        title = %alert.title,
                        metric = %alert.metric,
                        value = alert.current_value,
                        proposal = alert.proposal_id.as_deref().unwrap_or("-"),
                        "Alert triggered"
                    );
                }
                if tx.send(alerts).await.is_err() {
                    tracing::debug!("Alert receiver dropped, stopping monitor");
                    break;
                }
            }
        });

        tracing::info!(period_secs = period.as_secs(), "Alert monitor started");
        (Subscription { handle }, rx)
    }
}

/// Handle to a running monitor. Dropping it stops the poller.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
