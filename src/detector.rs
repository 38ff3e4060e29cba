//! Async detection loop: pulls raw samples off an unbounded queue, routes
//! them to per-source device state, and emits peak events through the
//! configured sink.
//!
//! Producers hold a cheap [`SampleFeed`] clone and never block. The loop
//! itself runs on one task; all per-source state is owned by it, so no
//! locking sits on the sample path apart from the tuning snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{clamp_sensitivity, DetectorConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{DetectorError, SampleError};
use crate::event::{now_unix_ms, EventSink, PeakEvent};
use crate::history::EventHistory;
use crate::registry::DeviceRegistry;

/// One raw sample as delivered by a producer.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub source_id: String,
    pub value: f64,
    /// Local arrival time, used for the rate-drift diagnostic.
    pub arrival: Instant,
}

/// Producer handle. Cloneable, non-blocking, safe to use from any task.
#[derive(Clone)]
pub struct SampleFeed {
    tx: mpsc::UnboundedSender<RawSample>,
}

impl SampleFeed {
    /// Queue one sample. Returns false once the detector has shut down.
    pub fn push(&self, source_id: impl Into<String>, value: f64) -> bool {
        self.push_sample(RawSample {
            source_id: source_id.into(),
            value,
            arrival: Instant::now(),
        })
    }

    pub fn push_sample(&self, sample: RawSample) -> bool {
        self.tx.send(sample).is_ok()
    }
}

/// Runtime-adjustable knobs, shared between the loop and tuning handles.
#[derive(Debug, Clone, Copy)]
struct Tuning {
    sensitivity: f64,
    k_threshold: f64,
    refractory_samples: u64,
}

/// Adjusts detection knobs while the loop is running. Changes apply from
/// the next sample onward; per-device state is untouched.
#[derive(Clone)]
pub struct TuningHandle {
    inner: Arc<RwLock<Tuning>>,
    sample_rate: f64,
}

impl TuningHandle {
    /// Set sensitivity, clamped to the supported range.
    pub fn set_sensitivity(&self, sensitivity: f64) {
        let clamped = clamp_sensitivity(sensitivity);
        info!(sensitivity = clamped, "sensitivity updated");
        self.inner.write().sensitivity = clamped;
    }

    pub fn set_k_threshold(&self, k_threshold: f64) {
        let k = if k_threshold.is_finite() && k_threshold > 0.0 {
            k_threshold
        } else {
            return;
        };
        info!(k_threshold = k, "threshold multiplier updated");
        self.inner.write().k_threshold = k;
    }

    pub fn set_refractory_ms(&self, refractory_ms: f64) {
        if !refractory_ms.is_finite() || refractory_ms < 0.0 {
            return;
        }
        let samples = (refractory_ms / 1000.0 * self.sample_rate).round() as u64;
        info!(refractory_ms, refractory_samples = samples, "refractory updated");
        self.inner.write().refractory_samples = samples;
    }

    pub fn sensitivity(&self) -> f64 {
        self.inner.read().sensitivity
    }

    pub fn k_threshold(&self) -> f64 {
        self.inner.read().k_threshold
    }

    pub fn refractory_samples(&self) -> u64 {
        self.inner.read().refractory_samples
    }
}

/// What one processed sample produced, mainly for tests and tracing.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub source_id: String,
    pub filtered: f64,
    pub envelope: f64,
    pub event: Option<PeakEvent>,
}

/// The detection engine. Owns all per-source state; driven by [`tick`] or
/// the [`run`] loop.
///
/// [`tick`]: Detector::tick
/// [`run`]: Detector::run
pub struct Detector {
    rx: mpsc::UnboundedReceiver<RawSample>,
    registry: DeviceRegistry,
    tuning: Arc<RwLock<Tuning>>,
    sink: Arc<dyn EventSink>,
    diagnostics: Arc<Diagnostics>,
    history: Arc<EventHistory>,
    last_arrival: HashMap<String, Instant>,
}

impl Detector {
    /// Build a detector and its producer handle.
    pub fn new(
        config: DetectorConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<(Self, SampleFeed), DetectorError> {
        let tuning = Tuning {
            sensitivity: config.sensitivity,
            k_threshold: config.k_threshold,
            refractory_samples: config.refractory_samples,
        };
        let registry = DeviceRegistry::new(config)?;
        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            sample_rate = registry.config().sample_rate,
            hp_freq = registry.config().hp_freq,
            lp_freq = registry.config().lp_freq,
            "detector ready"
        );
        Ok((
            Self {
                rx,
                registry,
                tuning: Arc::new(RwLock::new(tuning)),
                sink,
                diagnostics: Arc::new(Diagnostics::new()),
                history: Arc::new(EventHistory::default()),
                last_arrival: HashMap::new(),
            },
            SampleFeed { tx },
        ))
    }

    pub fn tuning_handle(&self) -> TuningHandle {
        TuningHandle {
            inner: self.tuning.clone(),
            sample_rate: self.registry.config().sample_rate,
        }
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    pub fn history(&self) -> Arc<EventHistory> {
        self.history.clone()
    }

    /// Clear one source's detection state. Returns false for unknown ids.
    pub fn reset_source(&mut self, source_id: &str) -> bool {
        self.registry.reset(source_id)
    }

    pub fn reset_all(&mut self) {
        self.registry.reset_all();
    }

    /// Snapshot of per-source state, tuning, and diagnostics as JSON.
    pub fn stats_json(&self) -> serde_json::Value {
        let tuning = *self.tuning.read();
        let sources: serde_json::Map<String, serde_json::Value> = self
            .registry
            .iter()
            .map(|(id, state)| {
                (
                    id.to_string(),
                    serde_json::json!({
                        "samples": state.samples_processed(),
                        "envelope": state.last_envelope(),
                        "peak_envelope": state.peak_envelope(),
                        "baseline": state.baseline(),
                        "events": state.events_fired(),
                        "observed_hz": self.diagnostics.observed_hz(id),
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "sources": sources,
            "tuning": {
                "sensitivity": tuning.sensitivity,
                "k_threshold": tuning.k_threshold,
                "refractory_samples": tuning.refractory_samples,
            },
            "diagnostics": self.diagnostics.to_json(),
        })
    }

    /// Process the next valid sample. Invalid samples are dropped with a
    /// warning and do not surface here. Returns `ProducerClosed` once all
    /// feed handles are gone and the queue is drained.
    pub async fn tick(&mut self) -> Result<TickOutput, DetectorError> {
        loop {
            let sample = self.rx.recv().await.ok_or(DetectorError::ProducerClosed)?;
            let started = Instant::now();
            self.diagnostics.note_sample();

            if let Err(err) = validate(&sample) {
                warn!(source_id = %sample.source_id, %err, "dropping sample");
                self.diagnostics.note_dropped();
                continue;
            }

            if let Some(prev) = self
                .last_arrival
                .insert(sample.source_id.clone(), sample.arrival)
            {
                let dt = sample.arrival.duration_since(prev).as_secs_f64();
                self.diagnostics.observe_arrival(&sample.source_id, dt);
            }

            let (k_eff, refractory) = {
                let t = self.tuning.read();
                (t.k_threshold / t.sensitivity, t.refractory_samples)
            };

            let out = self
                .registry
                .get_or_create(&sample.source_id)
                .process(sample.value, k_eff, refractory);

            if out.state_reset {
                warn!(source_id = %sample.source_id, "non-finite filter state, device reset");
                self.diagnostics.note_device_reset();
            }

            let event = out.firing.map(|firing| PeakEvent {
                source_id: sample.source_id.clone(),
                amplitude: out.envelope,
                baseline: firing.baseline,
                threshold: firing.threshold,
                snr: firing.snr,
                slope: firing.slope,
                timestamp_ms: now_unix_ms(),
            });

            if let Some(event) = &event {
                debug!(
                    source_id = %event.source_id,
                    amplitude = event.amplitude,
                    snr = event.snr,
                    "peak detected"
                );
                self.sink.on_peak(event);
                self.history.record(event.clone());
                self.diagnostics.note_event();
            }

            self.diagnostics
                .record_tick_us(started.elapsed().as_secs_f64() * 1e6);

            return Ok(TickOutput {
                source_id: sample.source_id,
                filtered: out.filtered,
                envelope: out.envelope,
                event,
            });
        }
    }

    /// Drive the loop until cancellation or until all producers are gone.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DetectorError> {
        info!("detector loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("detector loop cancelled");
                    return Ok(());
                }
                tick = self.tick() => {
                    match tick {
                        Ok(_) => {}
                        Err(DetectorError::ProducerClosed) => {
                            info!("all sample feeds closed");
                            return Err(DetectorError::ProducerClosed);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }
}

fn validate(sample: &RawSample) -> Result<(), SampleError> {
    if sample.source_id.is_empty() {
        return Err(SampleError::MissingSource);
    }
    if !sample.value.is_finite() {
        return Err(SampleError::NonFiniteValue(sample.value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture_sink() -> (Arc<dyn EventSink>, Arc<Mutex<Vec<PeakEvent>>>) {
        let store: Arc<Mutex<Vec<PeakEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let writer = store.clone();
        let sink: Arc<dyn EventSink> = Arc::new(move |event: &PeakEvent| {
            writer.lock().push(event.clone());
        });
        (sink, store)
    }

    fn detector_50hz() -> (Detector, SampleFeed, Arc<Mutex<Vec<PeakEvent>>>) {
        let config = DetectorConfig::for_sample_rate(50.0).unwrap();
        let (sink, store) = capture_sink();
        let (detector, feed) = Detector::new(config, sink).unwrap();
        (detector, feed, store)
    }

    async fn drain(detector: &mut Detector) -> Vec<TickOutput> {
        let mut outputs = Vec::new();
        loop {
            match detector.tick().await {
                Ok(tick) => outputs.push(tick),
                Err(DetectorError::ProducerClosed) => break,
                Err(err) => panic!("unexpected detector error: {err}"),
            }
        }
        outputs
    }

    #[tokio::test]
    async fn single_impulse_emits_single_event() {
        let (mut detector, feed, events) = detector_50hz();
        for i in 0..400 {
            let value = if i == 200 { 5.0 } else { 0.0 };
            assert!(feed.push("knock", value));
        }
        drop(feed);

        let outputs = drain(&mut detector).await;
        assert_eq!(outputs.len(), 400);

        let fired: Vec<usize> = outputs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.event.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired.len(), 1, "fired at {fired:?}");
        assert!((200..=205).contains(&fired[0]), "fired at {}", fired[0]);

        let emitted = events.lock();
        assert_eq!(emitted.len(), 1);
        let event = &emitted[0];
        assert_eq!(event.source_id, "knock");
        assert!(event.amplitude > 10.0 * event.baseline.max(1e-6));
        assert!(event.snr > 3.0);
        assert!(event.slope > 0.0);

        assert_eq!(detector.diagnostics().events_emitted(), 1);
        assert_eq!(detector.history().len(), 1);
    }

    #[tokio::test]
    async fn sources_detect_independently() {
        let (mut detector, feed, events) = detector_50hz();
        for i in 0..400 {
            let a = if i == 150 { 5.0 } else { 0.0 };
            let b = if i == 300 { 5.0 } else { 0.0 };
            feed.push("dev-a", a);
            feed.push("dev-b", b);
        }
        drop(feed);

        drain(&mut detector).await;

        let emitted = events.lock();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].source_id, "dev-a");
        assert_eq!(emitted[1].source_id, "dev-b");
    }

    #[tokio::test]
    async fn close_pair_of_knocks_emits_one_event() {
        let (mut detector, feed, events) = detector_50hz();
        // Second impulse lands well inside the refractory window.
        for i in 0..400 {
            let value = if i == 200 || i == 205 { 5.0 } else { 0.0 };
            feed.push("knock", value);
        }
        drop(feed);

        drain(&mut detector).await;
        assert_eq!(events.lock().len(), 1);
    }

    #[tokio::test]
    async fn spaced_knocks_emit_two_events() {
        let (mut detector, feed, events) = detector_50hz();
        // 100 samples apart: refractory has elapsed and the baseline has
        // mostly recovered from the first impulse.
        for i in 0..450 {
            let value = if i == 200 || i == 300 { 5.0 } else { 0.0 };
            feed.push("knock", value);
        }
        drop(feed);

        drain(&mut detector).await;
        assert_eq!(events.lock().len(), 2);
    }

    #[tokio::test]
    async fn quiescent_input_stays_silent() {
        let (mut detector, feed, events) = detector_50hz();
        for _ in 0..300 {
            feed.push("quiet", 0.0);
        }
        drop(feed);

        let outputs = drain(&mut detector).await;
        assert!(events.lock().is_empty());
        assert!(outputs.iter().all(|o| o.event.is_none()));
        assert!(outputs.last().unwrap().envelope.abs() < 1e-9);
    }

    #[tokio::test]
    async fn steady_in_band_sine_produces_no_events() {
        let (mut detector, feed, events) = detector_50hz();
        // Tone whose period matches the RMS window exactly, so the steady
        // envelope is flat and the adaptive baseline absorbs it.
        for i in 0..600 {
            let value = 0.3 * (std::f64::consts::TAU * i as f64 / 6.0).sin();
            feed.push("hum", value);
        }
        drop(feed);

        drain(&mut detector).await;
        let emitted = events.lock();
        assert!(emitted.is_empty(), "events: {emitted:?}");
    }

    #[tokio::test]
    async fn invalid_samples_are_dropped_not_fatal() {
        let (mut detector, feed, events) = detector_50hz();
        feed.push("dev", f64::NAN);
        feed.push("", 1.0);
        feed.push("dev", f64::INFINITY);
        feed.push("dev", 0.0);
        drop(feed);

        let outputs = drain(&mut detector).await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].source_id, "dev");
        assert_eq!(detector.diagnostics().samples_dropped(), 3);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn lower_sensitivity_suppresses_marginal_knock() {
        // A small knock that fires at default sensitivity must stay below
        // threshold once sensitivity is clamped to its minimum (which
        // raises the effective multiplier tenfold).
        let run_with = |sensitivity: Option<f64>| async move {
            let (mut detector, feed, events) = detector_50hz();
            if let Some(s) = sensitivity {
                detector.tuning_handle().set_sensitivity(s);
            }
            for i in 0..400 {
                let value = if i == 300 { 0.3 } else { 0.0 };
                feed.push("dev", value);
            }
            drop(feed);
            drain(&mut detector).await;
            let emitted = events.lock().len();
            emitted
        };

        assert_eq!(run_with(None).await, 1);
        assert_eq!(run_with(Some(0.0001)).await, 0);
    }

    #[tokio::test]
    async fn tuning_handle_clamps_and_converts() {
        let (detector, _feed, _) = detector_50hz();
        let tuning = detector.tuning_handle();

        tuning.set_sensitivity(1000.0);
        assert!((tuning.sensitivity() - 10.0).abs() < 1e-12);

        tuning.set_refractory_ms(500.0);
        assert_eq!(tuning.refractory_samples(), 25);

        tuning.set_k_threshold(-3.0); // rejected
        assert!(tuning.k_threshold() > 0.0);
    }

    #[tokio::test]
    async fn reset_source_forgets_learned_floor() {
        let (mut detector, feed, _) = detector_50hz();
        for _ in 0..100 {
            feed.push("dev", 0.5);
        }
        drop(feed);
        drain(&mut detector).await;

        assert!(detector.reset_source("dev"));
        assert!(!detector.reset_source("never-seen"));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let config = DetectorConfig::for_sample_rate(100.0).unwrap();
        let (sink, _) = capture_sink();
        let (detector, feed) = Detector::new(config, sink).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(detector.run(cancel.clone()));
        feed.push("dev", 0.0);
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stats_json_reports_sources_and_counts() {
        let (mut detector, feed, _) = detector_50hz();
        for i in 0..300 {
            let value = if i == 200 { 5.0 } else { 0.0 };
            feed.push("knock", value);
        }
        drop(feed);
        drain(&mut detector).await;

        let stats = detector.stats_json();
        assert_eq!(stats["sources"]["knock"]["samples"], 300);
        assert_eq!(stats["sources"]["knock"]["events"], 1);
        assert!(stats["sources"]["knock"]["peak_envelope"].as_f64().unwrap() > 0.5);
        assert_eq!(stats["diagnostics"]["samples_seen"], 300);
        assert_eq!(stats["diagnostics"]["events_emitted"], 1);
        assert_eq!(stats["tuning"]["sensitivity"], 1.0);
    }
}
