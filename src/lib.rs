//! Tapsense: adaptive knock/tap detection for streaming accelerometer
//! samples.
//!
//! Raw samples from any number of sources flow through a band-pass filter,
//! a windowed RMS envelope, and an adaptive baseline; a rising-edge trigger
//! with a refractory period turns sharp envelope departures into
//! [`PeakEvent`]s. Each source gets fully independent state, created on its
//! first sample.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tapsense::{Detector, DetectorConfig, TracingSink};
//!
//! # async fn demo() -> Result<(), tapsense::DetectorError> {
//! let config = DetectorConfig::for_sample_rate(100.0)?;
//! let (detector, feed) = Detector::new(config, Arc::new(TracingSink))?;
//! let cancel = tokio_util::sync::CancellationToken::new();
//! tokio::spawn(detector.run(cancel.clone()));
//!
//! feed.push("bridge-sensor-3", 0.0123);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod dsp;
pub mod error;
pub mod event;
pub mod history;
pub mod registry;

pub use config::DetectorConfig;
pub use detector::{Detector, RawSample, SampleFeed, TickOutput, TuningHandle};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{ConfigError, DetectorError, SampleError};
pub use event::{ChannelSink, EventSink, PeakEvent, TracingSink};
pub use history::EventHistory;
pub use registry::{DeviceRegistry, DeviceState};

/// Install the default tracing subscriber. Call once at startup; embedding
/// applications that bring their own subscriber should skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapsense=debug".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
