//! Butterworth filter design and the biquad cascade it runs on.
//!
//! The designer produces an ordered sequence of second-order sections: a
//! 2nd-order highpass at `hp_freq` cascaded with a 2nd-order lowpass at
//! `lp_freq`, which together approximate a Butterworth bandpass. When the
//! lowpass cutoff sits at or above Nyquist the lowpass section is omitted
//! and the design degrades to highpass-only.
//!
//! Analog prototype poles for a 2nd-order Butterworth sit at
//! `s = -sin(pi/4) +/- j*cos(pi/4)`, mapped to the z-plane via bilinear
//! transform with a prewarped cutoff `wc = tan(pi * fc / fs)`.

use std::f64::consts::{FRAC_PI_4, PI};

use crate::config::DetectorConfig;
use crate::error::ConfigError;

/// Normalized second-order-section coefficients (a0 = 1). Immutable after
/// design; shared as a read-only template and cloned per device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SosCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// One second-order IIR stage with its own delay state, Direct-Form-II
/// Transposed. State is owned exclusively by one device's chain.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: SosCoeffs,
    s1: f64,
    s2: f64,
}

impl Biquad {
    pub fn new(coeffs: SosCoeffs) -> Self {
        Self { coeffs, s1: 0.0, s2: 0.0 }
    }

    /// DF2T recurrence:
    /// `out = b0*x + s1; s1' = b1*x - a1*out + s2; s2' = b2*x - a2*out`.
    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let out = c.b0 * x + self.s1;
        self.s1 = c.b1 * x - c.a1 * out + self.s2;
        self.s2 = c.b2 * x - c.a2 * out;
        out
    }

    /// Zero the delay state without touching coefficients.
    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }

    /// True if the delay state has gone NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.s1.is_finite() && self.s2.is_finite()
    }
}

/// An ordered chain of biquad sections; output of one feeds the next.
#[derive(Debug, Clone)]
pub struct BiquadCascade {
    sections: Vec<Biquad>,
}

impl BiquadCascade {
    /// Instantiate a cascade from a coefficient template with zeroed state.
    pub fn from_template(template: &[SosCoeffs]) -> Self {
        Self {
            sections: template.iter().map(|&c| Biquad::new(c)).collect(),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let mut y = x;
        for section in &mut self.sections {
            y = section.process(y);
        }
        y
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    pub fn is_finite(&self) -> bool {
        self.sections.iter().all(Biquad::is_finite)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Design the section template for a configuration. Runs once at
/// construction; invalid cutoff layouts were already rejected by the
/// config, but the designer re-checks what it depends on.
pub fn design_sections(config: &DetectorConfig) -> Result<Vec<SosCoeffs>, ConfigError> {
    design(config.hp_freq, config.lp_freq, config.sample_rate)
}

/// Design a bandpass (highpass + lowpass sections) between `hp_freq` and
/// `lp_freq`, or highpass-only when `lp_freq` is at or above Nyquist.
pub fn design(hp_freq: f64, lp_freq: f64, sample_rate: f64) -> Result<Vec<SosCoeffs>, ConfigError> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(ConfigError::InvalidSampleRate(sample_rate));
    }
    let nyquist = sample_rate / 2.0;
    if !hp_freq.is_finite() || hp_freq <= 0.0 || hp_freq >= nyquist {
        return Err(ConfigError::InvalidCutoff { name: "hp_freq", value: hp_freq });
    }
    if !lp_freq.is_finite() || lp_freq <= 0.0 {
        return Err(ConfigError::InvalidCutoff { name: "lp_freq", value: lp_freq });
    }

    let mut sections = vec![highpass_section(hp_freq, sample_rate)];
    if lp_freq < nyquist {
        if hp_freq >= lp_freq {
            return Err(ConfigError::CutoffOrder { hp_freq, lp_freq });
        }
        sections.push(lowpass_section(lp_freq, sample_rate));
    }
    Ok(sections)
}

/// 2nd-order Butterworth highpass, bilinear transform with prewarp.
fn highpass_section(fc: f64, fs: f64) -> SosCoeffs {
    let wc = (PI * fc / fs).tan();
    let wc2 = wc * wc;
    let two_sin_theta = 2.0 * FRAC_PI_4.sin();
    let d = 1.0 + two_sin_theta * wc + wc2;
    SosCoeffs {
        b0: 1.0 / d,
        b1: -2.0 / d,
        b2: 1.0 / d,
        a1: 2.0 * (wc2 - 1.0) / d,
        a2: (1.0 - two_sin_theta * wc + wc2) / d,
    }
}

/// 2nd-order Butterworth lowpass, bilinear transform with prewarp.
fn lowpass_section(fc: f64, fs: f64) -> SosCoeffs {
    let wc = (PI * fc / fs).tan();
    let wc2 = wc * wc;
    let two_sin_theta = 2.0 * FRAC_PI_4.sin();
    let d = 1.0 + two_sin_theta * wc + wc2;
    SosCoeffs {
        b0: wc2 / d,
        b1: 2.0 * wc2 / d,
        b2: wc2 / d,
        a1: 2.0 * (wc2 - 1.0) / d,
        a2: (1.0 - two_sin_theta * wc + wc2) / d,
    }
}
