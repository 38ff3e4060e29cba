//! Bounded in-memory record of emitted peak events.
//!
//! Keeps the most recent N events so callers can inspect what fired
//! without wiring up a sink. Oldest entries are discarded first.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::event::PeakEvent;

pub const DEFAULT_CAPACITY: usize = 256;

pub struct EventHistory {
    inner: Mutex<VecDeque<PeakEvent>>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when full.
    pub fn record(&self, event: PeakEvent) {
        let mut events = self.inner.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, newest last, at most `limit`.
    pub fn query_recent(&self, limit: usize) -> Vec<PeakEvent> {
        let events = self.inner.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Events for a single source, newest last, at most `limit`.
    pub fn query_source(&self, source_id: &str, limit: usize) -> Vec<PeakEvent> {
        let events = self.inner.lock();
        let mut matched: Vec<PeakEvent> = events
            .iter()
            .rev()
            .filter(|e| e.source_id == source_id)
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
