//! Detector configuration: preset table keyed by sample rate, sensitivity
//! clamping, and the values derived once at construction (EMA coefficient,
//! window and refractory sizes).

use serde::Serialize;

use crate::error::ConfigError;

/// Sensitivity is clamped to this range; it scales `k_threshold` inversely.
pub const SENSITIVITY_MIN: f64 = 0.1;
pub const SENSITIVITY_MAX: f64 = 10.0;

/// Floor applied to variance before taking a square root.
pub const VARIANCE_EPS: f64 = 1e-6;

/// One row of the preset table. Cutoffs and timing constants are tuned per
/// sample-rate bucket; arbitrary rates snap to the nearest bucket.
#[derive(Debug, Clone, Copy)]
struct Preset {
    sample_rate: f64,
    hp_freq: f64,
    lp_freq: f64,
    rms_window_ms: f64,
    tau_baseline: f64,
    k_threshold: f64,
    refractory_ms: f64,
}

/// Fixed preset buckets. Low-rate buckets widen the RMS window and the
/// refractory period because each sample carries more wall-clock time.
const PRESETS: [Preset; 5] = [
    Preset { sample_rate: 20.0, hp_freq: 2.0, lp_freq: 8.0, rms_window_ms: 250.0, tau_baseline: 2.0, k_threshold: 4.0, refractory_ms: 400.0 },
    Preset { sample_rate: 50.0, hp_freq: 3.0, lp_freq: 20.0, rms_window_ms: 120.0, tau_baseline: 1.5, k_threshold: 4.0, refractory_ms: 300.0 },
    Preset { sample_rate: 100.0, hp_freq: 5.0, lp_freq: 40.0, rms_window_ms: 80.0, tau_baseline: 1.0, k_threshold: 4.5, refractory_ms: 250.0 },
    Preset { sample_rate: 200.0, hp_freq: 8.0, lp_freq: 80.0, rms_window_ms: 60.0, tau_baseline: 1.0, k_threshold: 5.0, refractory_ms: 200.0 },
    Preset { sample_rate: 1000.0, hp_freq: 20.0, lp_freq: 400.0, rms_window_ms: 40.0, tau_baseline: 0.8, k_threshold: 5.0, refractory_ms: 150.0 },
];

/// Detector configuration. Built from the preset nearest to the requested
/// sample rate; all derived values are fixed once here. Runtime tuning is
/// limited to the setters on [`crate::detector::TuningHandle`].
#[derive(Debug, Clone, Serialize)]
pub struct DetectorConfig {
    /// Sample rate the producer actually delivers, in Hz.
    pub sample_rate: f64,
    /// Highpass cutoff in Hz.
    pub hp_freq: f64,
    /// Lowpass cutoff in Hz. May sit at or above Nyquist, in which case the
    /// filter designer degrades to highpass-only.
    pub lp_freq: f64,
    /// RMS envelope window in milliseconds.
    pub rms_window_ms: f64,
    /// Baseline EMA time constant in seconds.
    pub tau_baseline: f64,
    /// Threshold multiplier over the envelope's standard deviation.
    pub k_threshold: f64,
    /// Minimum spacing between fires in milliseconds.
    pub refractory_ms: f64,
    /// Clamped to [0.1, 10.0]; divides `k_threshold` at trigger time.
    pub sensitivity: f64,

    // Derived at construction, never recomputed.
    /// `1 - exp(-dt / tau_baseline)` for the per-sample EMA step.
    pub alpha_baseline: f64,
    /// Envelope window capacity in samples (>= 1).
    pub rms_window_size: usize,
    /// Refractory period in samples.
    pub refractory_samples: u64,
}

impl DetectorConfig {
    /// Build a configuration for the given sample rate, snapping to the
    /// nearest preset bucket by absolute difference (ties resolve to the
    /// lower bucket). Fails fast on an unusable rate or cutoff layout.
    pub fn for_sample_rate(sample_rate: f64) -> Result<Self, ConfigError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        let preset = nearest_preset(sample_rate);
        Self::from_parts(sample_rate, preset, 1.0)
    }

    /// Same as [`for_sample_rate`](Self::for_sample_rate) with an explicit
    /// initial sensitivity (clamped).
    pub fn with_sensitivity(sample_rate: f64, sensitivity: f64) -> Result<Self, ConfigError> {
        let mut cfg = Self::for_sample_rate(sample_rate)?;
        cfg.sensitivity = clamp_sensitivity(sensitivity);
        Ok(cfg)
    }

    fn from_parts(sample_rate: f64, preset: &Preset, sensitivity: f64) -> Result<Self, ConfigError> {
        if !preset.hp_freq.is_finite() || preset.hp_freq <= 0.0 {
            return Err(ConfigError::InvalidCutoff { name: "hp_freq", value: preset.hp_freq });
        }
        if !preset.lp_freq.is_finite() || preset.lp_freq <= 0.0 {
            return Err(ConfigError::InvalidCutoff { name: "lp_freq", value: preset.lp_freq });
        }
        let nyquist = sample_rate / 2.0;
        if preset.hp_freq >= nyquist {
            return Err(ConfigError::InvalidCutoff { name: "hp_freq", value: preset.hp_freq });
        }
        // Only an ordering violation below Nyquist is an error; lp at or
        // above Nyquist selects the highpass-only fallback downstream.
        if preset.lp_freq < nyquist && preset.hp_freq >= preset.lp_freq {
            return Err(ConfigError::CutoffOrder { hp_freq: preset.hp_freq, lp_freq: preset.lp_freq });
        }

        let dt = 1.0 / sample_rate;
        let alpha_baseline = 1.0 - (-dt / preset.tau_baseline).exp();
        let rms_window_size = ((preset.rms_window_ms / 1000.0) * sample_rate).round() as usize;
        let rms_window_size = rms_window_size.max(1);
        let refractory_samples = ((preset.refractory_ms / 1000.0) * sample_rate).round() as u64;
        if refractory_samples == 0 {
            return Err(ConfigError::EmptyWindow { name: "refractory_ms" });
        }

        Ok(Self {
            sample_rate,
            hp_freq: preset.hp_freq,
            lp_freq: preset.lp_freq,
            rms_window_ms: preset.rms_window_ms,
            tau_baseline: preset.tau_baseline,
            k_threshold: preset.k_threshold,
            refractory_ms: preset.refractory_ms,
            sensitivity: clamp_sensitivity(sensitivity),
            alpha_baseline,
            rms_window_size,
            refractory_samples,
        })
    }

    /// Nyquist frequency for the configured rate.
    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }
}

/// Nearest bucket by absolute sample-rate difference. Strict `<` keeps the
/// lower bucket on exact midpoints.
fn nearest_preset(sample_rate: f64) -> &'static Preset {
    let mut best = &PRESETS[0];
    let mut best_dist = (sample_rate - best.sample_rate).abs();
    for preset in &PRESETS[1..] {
        let dist = (sample_rate - preset.sample_rate).abs();
        if dist < best_dist {
            best = preset;
            best_dist = dist;
        }
    }
    best
}

/// Clamp sensitivity into its documented range.
pub fn clamp_sensitivity(s: f64) -> f64 {
    if s.is_nan() {
        return 1.0;
    }
    s.clamp(SENSITIVITY_MIN, SENSITIVITY_MAX)
}
