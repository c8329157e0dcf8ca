//! Downstream delivery of confirmed detections.
//!
//! Records are newline-delimited JSON, one object per confirmed detection,
//! sent to a ground station over TCP or UDP.

mod transmitter;

pub use transmitter::{DetectionSink, Protocol, TransmitRecord, Transmitter};
