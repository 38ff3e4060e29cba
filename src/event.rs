//! Peak events and the sink seam they are delivered through.
//!
//! The sink is injected at construction and owns all side effects (action
//! emission, logging, metrics). Delivery is a synchronous call on the
//! detector loop; integrators who cannot afford to block use
//! [`ChannelSink`], a bounded drop-oldest hand-off queue.

use crossbeam_channel as cb;
use serde::Serialize;
use tracing::{info, warn};

/// Immutable notification of one detected impulse.
#[derive(Debug, Clone, Serialize)]
pub struct PeakEvent {
    pub source_id: String,
    /// Envelope value at the moment of firing.
    pub amplitude: f64,
    /// Adaptive noise floor at the moment of firing.
    pub baseline: f64,
    /// Threshold the envelope crossed.
    pub threshold: f64,
    /// `(amplitude - baseline) / std` of the envelope.
    pub snr: f64,
    /// Envelope rise over the last sample.
    pub slope: f64,
    /// Unix epoch milliseconds at emission.
    pub timestamp_ms: i64,
}

/// Sink for detected events. Called synchronously from the detector loop,
/// so implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_peak(&self, event: &PeakEvent);
}

/// Any `Fn(&PeakEvent)` closure is a sink.
impl<F> EventSink for F
where
    F: Fn(&PeakEvent) + Send + Sync,
{
    fn on_peak(&self, event: &PeakEvent) {
        self(event)
    }
}

/// Sink that logs each event at info level. Useful default for demos and
/// as a template for real integrations.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_peak(&self, event: &PeakEvent) {
        info!(
            source_id = %event.source_id,
            amplitude = event.amplitude,
            baseline = event.baseline,
            snr = event.snr,
            "peak_detected"
        );
    }
}

/// Bounded hand-off queue between the detector loop and a consumer thread.
/// When the queue is full the oldest event is dropped so the producer side
/// never blocks; a stalled consumer costs history, not detection latency.
pub struct ChannelSink {
    tx: cb::Sender<PeakEvent>,
    rx: cb::Receiver<PeakEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = cb::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Receiver handle for the consumer side.
    pub fn receiver(&self) -> cb::Receiver<PeakEvent> {
        self.rx.clone()
    }

    /// Events currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl EventSink for ChannelSink {
    fn on_peak(&self, event: &PeakEvent) {
        let mut pending = event.clone();
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(cb::TrySendError::Full(ev)) => {
                    // Drop-oldest: evict one and retry with the new event.
                    if self.rx.try_recv().is_ok() {
                        warn!(source_id = %ev.source_id, "event queue full, dropped oldest");
                    }
                    pending = ev;
                }
                Err(cb::TrySendError::Disconnected(ev)) => {
                    warn!(source_id = %ev.source_id, "event consumer gone, dropping event");
                    return;
                }
            }
        }
    }
}

/// Current time as unix epoch milliseconds.
pub(crate) fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, amplitude: f64) -> PeakEvent {
        PeakEvent {
            source_id: id.to_string(),
            amplitude,
            baseline: 0.01,
            threshold: 0.05,
            snr: 12.0,
            slope: 0.4,
            timestamp_ms: now_unix_ms(),
        }
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let sink = ChannelSink::new(8);
        sink.on_peak(&event("a", 1.0));
        sink.on_peak(&event("a", 2.0));
        let rx = sink.receiver();
        assert_eq!(rx.recv().unwrap().amplitude, 1.0);
        assert_eq!(rx.recv().unwrap().amplitude, 2.0);
    }

    #[test]
    fn channel_sink_drops_oldest_when_full() {
        let sink = ChannelSink::new(2);
        sink.on_peak(&event("a", 1.0));
        sink.on_peak(&event("a", 2.0));
        sink.on_peak(&event("a", 3.0));
        let rx = sink.receiver();
        assert_eq!(rx.recv().unwrap().amplitude, 2.0);
        assert_eq!(rx.recv().unwrap().amplitude, 3.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closure_is_a_sink() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = AtomicUsize::new(0);
        let sink = |_: &PeakEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        sink.on_peak(&event("b", 1.0));
        sink.on_peak(&event("b", 2.0));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn event_serializes() {
        let json = serde_json::to_value(event("dev-1", 0.8)).unwrap();
        assert_eq!(json["source_id"], "dev-1");
        assert!(json["snr"].as_f64().unwrap() > 0.0);
    }
}
