//! Capture ingestion and delay estimation for ORDA instrument recordings
//!
//! The crate covers the path from a raw `.ISE`/`.SPU` byte stream to
//! delay-free complex waveforms:
//!
//! byte stream → [`frame::FrameReader`] → [`capture::CaptureStream`] →
//! [`capture::Capture`] → [`delay::DelayEstimator`] →
//! [`shift::roll_lerp`] with the negated estimate.
//!
//! Higher-level analysis (amplitude/phase response, grouping by channel or
//! center frequency) is a consumer concern and lives outside this crate.

pub mod capture;
pub mod delay;
pub mod frame;
pub mod shift;
pub mod tracing_init;

pub use capture::{Capture, CaptureStream, DecodeError, StateError};
pub use delay::{
    ConfigurationError, CorrelationPeakEstimator, DelayEstimator, EstimationError,
    PhaseSlopeEstimator,
};
pub use frame::{FormatError, Frame, FrameKind, FrameReader};
pub use shift::{roll, roll_lerp};
