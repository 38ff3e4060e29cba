//! Signal-processing cascade, per device:
//! biquad bandpass -> windowed RMS envelope -> EMA baseline/variance ->
//! rising-edge trigger. Each source id owns an independent instance of
//! every stage; nothing here is shared across devices.

pub mod baseline;
pub mod envelope;
pub mod filter;
pub mod trigger;

pub use baseline::BaselineEstimator;
pub use envelope::EnvelopeBuffer;
pub use filter::{design_sections, Biquad, BiquadCascade, SosCoeffs};
pub use trigger::{EdgeTrigger, Firing};
