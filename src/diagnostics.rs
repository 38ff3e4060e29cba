//! Read-only runtime diagnostics: ingest counters, per-tick latency
//! percentiles, and the per-source sample-rate drift estimate. Nothing in
//! here feeds back into detection; it exists for operators and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// EMA smoothing for inter-arrival intervals. Light enough to settle in a
/// few dozen samples, heavy enough to ignore single delayed packets.
const RATE_ALPHA: f64 = 0.1;

/// Fixed-capacity ring of latency samples for percentile queries.
struct LatencyRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl LatencyRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let cap = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % cap;
        if self.count < cap {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Per-source EMA of the observed inter-arrival time. Purely diagnostic:
/// the filter design always uses the configured rate.
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    ema_interval_s: Option<f64>,
}

impl RateTracker {
    /// Fold in one observed inter-arrival gap in seconds.
    pub fn observe(&mut self, dt_s: f64) {
        if !dt_s.is_finite() || dt_s <= 0.0 {
            return;
        }
        self.ema_interval_s = Some(match self.ema_interval_s {
            None => dt_s,
            Some(ema) => ema + RATE_ALPHA * (dt_s - ema),
        });
    }

    /// Estimated delivery rate in Hz, once at least one gap has been seen.
    pub fn observed_hz(&self) -> Option<f64> {
        self.ema_interval_s.map(|s| 1.0 / s)
    }
}

/// Point-in-time diagnostics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub samples_seen: u64,
    pub samples_dropped: u64,
    pub events_emitted: u64,
    pub device_resets: u64,
    pub tick_p50_us: f64,
    pub tick_p95_us: f64,
    pub tick_p99_us: f64,
    /// Observed delivery rate per source, Hz.
    pub observed_hz: HashMap<String, f64>,
}

/// Shared diagnostics registry. All writers are the detector loop; readers
/// may snapshot from any thread.
pub struct Diagnostics {
    samples_seen: AtomicU64,
    samples_dropped: AtomicU64,
    events_emitted: AtomicU64,
    device_resets: AtomicU64,
    tick_latency: Mutex<LatencyRing>,
    rates: Mutex<HashMap<String, RateTracker>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            samples_seen: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            device_resets: AtomicU64::new(0),
            tick_latency: Mutex::new(LatencyRing::new(1024)),
            rates: Mutex::new(HashMap::new()),
        }
    }

    pub fn note_sample(&self) {
        self.samples_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_event(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_device_reset(&self) {
        self.device_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_us(&self, value_us: f64) {
        self.tick_latency.lock().push(value_us);
    }

    /// Record one inter-arrival gap for a source.
    pub fn observe_arrival(&self, source_id: &str, dt_s: f64) {
        let mut rates = self.rates.lock();
        rates.entry(source_id.to_string()).or_default().observe(dt_s);
    }

    /// Drift estimate for one source, if any gaps were observed.
    pub fn observed_hz(&self, source_id: &str) -> Option<f64> {
        self.rates.lock().get(source_id).and_then(RateTracker::observed_hz)
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let latency = self.tick_latency.lock();
        let observed_hz = self
            .rates
            .lock()
            .iter()
            .filter_map(|(id, r)| r.observed_hz().map(|hz| (id.clone(), hz)))
            .collect();
        DiagnosticsSnapshot {
            samples_seen: self.samples_seen.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            device_resets: self.device_resets.load(Ordering::Relaxed),
            tick_p50_us: latency.percentile(50.0),
            tick_p95_us: latency.percentile(95.0),
            tick_p99_us: latency.percentile(99.0),
            observed_hz,
        }
    }

    /// Snapshot as JSON, for export surfaces.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
