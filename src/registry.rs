//! Per-source detection state and the registry that owns it.
//!
//! Every source id gets its own filter cascade, envelope buffer, baseline
//! estimator, and trigger, created lazily on first sample. Sources never
//! share state, so a noisy or broken device cannot disturb the others.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::dsp::{
    design_sections, BaselineEstimator, BiquadCascade, EdgeTrigger, EnvelopeBuffer, Firing,
    SosCoeffs,
};
use crate::error::ConfigError;

/// Result of pushing one sample through a device's chain.
#[derive(Debug, Clone)]
pub struct DeviceOutput {
    /// Band-passed sample.
    pub filtered: f64,
    /// Windowed RMS envelope after this sample.
    pub envelope: f64,
    /// Trigger firing, if the rising edge fired on this sample.
    pub firing: Option<Firing>,
    /// True when non-finite filter state forced a reset of this device.
    pub state_reset: bool,
}

/// Detection chain for one source.
pub struct DeviceState {
    filter: BiquadCascade,
    envelope: EnvelopeBuffer,
    baseline: BaselineEstimator,
    trigger: EdgeTrigger,
    samples_processed: u64,
    last_envelope: f64,
    peak_envelope: f64,
    events_fired: u64,
}

impl DeviceState {
    fn new(template: &[SosCoeffs], config: &DetectorConfig) -> Self {
        Self {
            filter: BiquadCascade::from_template(template),
            envelope: EnvelopeBuffer::new(config.rms_window_size),
            baseline: BaselineEstimator::new(config.alpha_baseline, config.rms_window_size as u64),
            trigger: EdgeTrigger::new(config.refractory_samples),
            samples_processed: 0,
            last_envelope: 0.0,
            peak_envelope: 0.0,
            events_fired: 0,
        }
    }

    /// Run one sample through filter -> envelope -> baseline -> trigger.
    ///
    /// If filter or envelope state turns non-finite, both are reset and
    /// the sample is swallowed before it can reach the baseline or the
    /// sink. A sample large enough to overflow `x*x` passes validation
    /// and leaves the filter finite, so the envelope output is checked
    /// too. The baseline keeps its learned floor unless it was poisoned
    /// itself.
    pub fn process(&mut self, value: f64, k_eff: f64, refractory_samples: u64) -> DeviceOutput {
        self.samples_processed += 1;

        let filtered = self.filter.process(value);
        if !filtered.is_finite() || !self.filter.is_finite() {
            return self.contain_non_finite();
        }

        let env = self.envelope.update(filtered);
        if !env.is_finite() || !self.envelope.is_finite() || !self.baseline.is_finite() {
            return self.contain_non_finite();
        }

        self.last_envelope = env;
        if env > self.peak_envelope {
            self.peak_envelope = env;
        }
        // Threshold comes from the baseline state *before* this sample, so
        // an impulse is compared against the quiet floor it rose out of.
        // During warm-up that floor tracks the envelope one-to-one, which
        // is what keeps the window-fill transient from firing; the trigger
        // itself runs every tick so its envelope history stays current.
        let baseline = self.baseline.baseline();
        let std = self.baseline.std_floored();
        self.baseline.update(env);

        let firing = self.trigger.update(env, baseline, std, k_eff, refractory_samples);
        if firing.is_some() {
            self.events_fired += 1;
        }

        DeviceOutput {
            filtered,
            envelope: env,
            firing,
            state_reset: false,
        }
    }

    fn contain_non_finite(&mut self) -> DeviceOutput {
        self.filter.reset();
        self.envelope.reset();
        if !self.baseline.is_finite() {
            self.baseline.reset();
        }
        DeviceOutput {
            filtered: 0.0,
            envelope: 0.0,
            firing: None,
            state_reset: true,
        }
    }

    pub fn baseline(&self) -> f64 {
        self.baseline.baseline()
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }

    pub fn last_envelope(&self) -> f64 {
        self.last_envelope
    }

    pub fn peak_envelope(&self) -> f64 {
        self.peak_envelope
    }

    pub fn events_fired(&self) -> u64 {
        self.events_fired
    }

    /// Clear all per-device state back to the just-created condition.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.envelope.reset();
        self.baseline.reset();
        self.trigger.reset();
        self.samples_processed = 0;
        self.last_envelope = 0.0;
        self.peak_envelope = 0.0;
        self.events_fired = 0;
    }
}

/// Owns all per-source state, keyed by source id. Devices are created on
/// first sample and never evicted.
pub struct DeviceRegistry {
    template: Vec<SosCoeffs>,
    config: DetectorConfig,
    devices: HashMap<String, DeviceState>,
}

impl DeviceRegistry {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        let template = design_sections(&config)?;
        Ok(Self {
            template,
            config,
            devices: HashMap::new(),
        })
    }

    pub fn get_or_create(&mut self, source_id: &str) -> &mut DeviceState {
        if !self.devices.contains_key(source_id) {
            debug!(source_id, sections = self.template.len(), "new source registered");
            self.devices.insert(
                source_id.to_string(),
                DeviceState::new(&self.template, &self.config),
            );
        }
        self.devices.get_mut(source_id).unwrap()
    }

    pub fn get(&self, source_id: &str) -> Option<&DeviceState> {
        self.devices.get(source_id)
    }

    /// Reset one source's state. Returns false for unknown ids.
    pub fn reset(&mut self, source_id: &str) -> bool {
        match self.devices.get_mut(source_id) {
            Some(device) => {
                warn!(source_id, "device state reset");
                device.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&mut self) {
        for device in self.devices.values_mut() {
            device.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceState)> {
        self.devices.iter().map(|(id, state)| (id.as_str(), state))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
