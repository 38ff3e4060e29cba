//! Error taxonomy: configuration errors fail fast at construction,
//! per-sample errors are dropped with a diagnostic, and only the loss of
//! the sample producer is fatal to the detector loop.

/// Errors raised while building a [`crate::config::DetectorConfig`] or the
/// filter prototype derived from it. These are never recoverable at
/// runtime: an unusable filter design must stop construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A cutoff frequency is zero, negative, or non-finite.
    InvalidCutoff { name: &'static str, value: f64 },
    /// Bandpass requested but `hp_freq >= lp_freq`.
    CutoffOrder { hp_freq: f64, lp_freq: f64 },
    /// Sample rate is zero, negative, or non-finite.
    InvalidSampleRate(f64),
    /// A window or refractory duration came out empty.
    EmptyWindow { name: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidCutoff { name, value } => {
                write!(f, "invalid cutoff {name}: {value} Hz")
            }
            ConfigError::CutoffOrder { hp_freq, lp_freq } => {
                write!(f, "highpass cutoff {hp_freq} Hz must be below lowpass cutoff {lp_freq} Hz")
            }
            ConfigError::InvalidSampleRate(sr) => write!(f, "invalid sample rate: {sr} Hz"),
            ConfigError::EmptyWindow { name } => write!(f, "{name} resolves to zero samples"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Per-sample ingestion errors. The offending sample is dropped and the
/// loop continues; these never cross device boundaries.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    /// The source identifier was empty.
    MissingSource,
    /// The sample value was NaN or infinite.
    NonFiniteValue(f64),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::MissingSource => write!(f, "sample has empty source id"),
            SampleError::NonFiniteValue(v) => write!(f, "sample value is not finite: {v}"),
        }
    }
}

impl std::error::Error for SampleError {}

/// Detector loop errors. `ProducerClosed` is the only condition that stops
/// detection for the whole process.
#[derive(Debug)]
pub enum DetectorError {
    /// The sample feed was dropped on the producer side; no further
    /// samples can ever arrive.
    ProducerClosed,
    /// Construction-time configuration failure.
    Config(ConfigError),
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::ProducerClosed => write!(f, "sample producer closed"),
            DetectorError::Config(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl std::error::Error for DetectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetectorError::Config(e) => Some(e),
            DetectorError::ProducerClosed => None,
        }
    }
}

impl From<ConfigError> for DetectorError {
    fn from(e: ConfigError) -> Self {
        DetectorError::Config(e)
    }
}
