use crate::ingest::event::{parse_timestamp, RawEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded in-memory window of recently received raw events.
///
/// Stands in for the persistence store: the analytics engine never owns events, it
/// only reads a snapshot of this window per request. The oldest events are evicted
/// once `capacity` is reached.
pub struct EventWindow {
    events: Mutex<VecDeque<RawEvent>>,
    capacity: usize,
}

impl EventWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Append a batch, evicting the oldest events beyond capacity.
    ///
    /// Returns the number of evicted events.
    pub fn push_batch(&self, batch: Vec<RawEvent>) -> usize {
        let mut events = self.events.lock();
        events.extend(batch);
        let overflow = events.len().saturating_sub(self.capacity);
        events.drain(..overflow);
        overflow
    }

    /// Drop events whose timestamp is older than `cutoff`. Events with an
    /// unparseable timestamp are dropped as well; the cleaner would discard them anyway.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| parse_timestamp(&e.timestamp).is_some_and(|ts| ts >= cutoff));
        before - events.len()
    }

    /// Copy of the current window contents, oldest first.
    pub fn snapshot(&self) -> Vec<RawEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
