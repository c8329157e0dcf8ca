//! UAV Detection Fusion Kernel
//!
//! This crate turns raw per-frame detections from an onboard vision model into
//! stable, geolocated, de-duplicated object reports.
//!
//! # Architecture
//!
//! Data flows strictly downward through the pipeline:
//!
//! 1. **Track**: raw boxes are greedily matched to short-lived tracks and smoothed.
//! 2. **Project**: the smoothed box centre is projected to ground lat/lon from telemetry.
//! 3. **Aggregate**: projected events vote per class and location (K distinct frames of N).
//! 4. **Register**: confirmed objects are merged into long-lived identity records.
//! 5. **Notify**: each identity raises exactly one external notification.
//!
//! # Module Structure
//!
//! - `geometry`, `camera`: pure geodesy helpers and camera intrinsics
//! - `project`, `track`: reference and accelerated backends behind traits
//! - `aggregate`, `registry`, `notify`: voting, identity and notification state
//! - `transport`, `visualizer`: outbound side effects (ground station, map)
//! - `pipeline`: the orchestrator shared by the capture loop and the API
//! - Core types: BBox, TelemetrySample, RawDetection, DetectionEvent, GeoDetection

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod api;
pub mod backend;
pub mod camera;
pub mod config;
pub mod geometry;
pub mod notify;
pub mod pipeline;
pub mod project;
pub mod registry;
pub mod track;
pub mod transport;
pub mod visualizer;

pub use aggregate::{AggregatorParams, DetectionAggregator};
pub use backend::{select_backend, BackendKind};
pub use camera::CameraParams;
pub use config::FusionConfig;
pub use notify::{JsonNotificationWriter, NotificationSink, ObjectNotificationManager, ObjectObserver};
pub use pipeline::{DetectionBatch, DetectionPipeline, RawDetectionPayload};
pub use project::{build_projector, GeoProjector, NadirProjector};
pub use registry::{ObjectRegistry, TrackedObjectState};
pub use track::{build_smoother, BBoxSmoother, SmoothedDetection, TrackSmoother, TrackerParams};
pub use transport::{DetectionSink, TransmitRecord, Transmitter};
pub use visualizer::{ObjectMessage, VisualizerPublisher, VisualizerSink};

// -------------------- Boxes --------------------

/// Axis-aligned box in pixel space, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
///
/// Serialized as a `[x1, y1, x2, y2]` array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Area with negative extents clamped to zero.
    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Intersection over union. Zero when the boxes do not overlap.
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter_area = inter_w * inter_h;
        if inter_area <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter_area;
        if union > 0.0 {
            inter_area / union
        } else {
            0.0
        }
    }

    /// Euclidean distance between box centres, in pixels.
    pub fn center_distance(&self, other: &BBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Exponential moving average towards `observed`, weighting the observation by `alpha`.
    pub fn smoothed_towards(&self, observed: &BBox, alpha: f64) -> BBox {
        let mix = |prev: f64, obs: f64| alpha * obs + (1.0 - alpha) * prev;
        BBox {
            x1: mix(self.x1, observed.x1),
            y1: mix(self.y1, observed.y1),
            x2: mix(self.x2, observed.x2),
            y2: mix(self.y2, observed.y2),
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

// -------------------- Telemetry --------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldCoord {
    pub lat: f64,
    pub lon: f64,
}

/// Vehicle state captured alongside a frame. Immutable snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub lat: f64,
    pub lon: f64,
    /// Metres above the take-off reference.
    #[serde(alias = "alt_m")]
    pub alt: f64,
    #[serde(default, alias = "yaw_deg")]
    pub yaw: f64,
    #[serde(default, alias = "pitch_deg")]
    pub pitch: f64,
    #[serde(default, alias = "roll_deg")]
    pub roll: f64,
    /// Remaining battery, 0..=1.
    #[serde(default = "full_battery")]
    pub battery: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn full_battery() -> f64 {
    1.0
}

impl TelemetrySample {
    /// Level attitude, full battery, timestamped now.
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            lat,
            lon,
            alt,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            battery: 1.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_attitude(mut self, yaw: f64, pitch: f64, roll: f64) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self.roll = roll;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(anyhow!("telemetry lat {} outside [-90, 90]", self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(anyhow!("telemetry lon {} outside [-180, 180]", self.lon));
        }
        if !(self.alt >= 0.0) || !self.alt.is_finite() {
            return Err(anyhow!("telemetry alt {} must be a finite value >= 0", self.alt));
        }
        if !(0.0..=1.0).contains(&self.battery) {
            return Err(anyhow!("telemetry battery {} outside [0, 1]", self.battery));
        }
        if !(self.yaw.is_finite() && self.pitch.is_finite() && self.roll.is_finite()) {
            return Err(anyhow!("telemetry attitude must be finite"));
        }
        Ok(())
    }
}

// -------------------- Detections --------------------

/// One model output, with frame id and timestamp already resolved.
///
/// `track_id` is assigned by the smoother, never by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub track_id: Option<u64>,
}

/// A projected detection, consumed immediately by the aggregator.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    pub class_id: u32,
    pub confidence: f32,
    pub location: WorldCoord,
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub track_id: Option<u64>,
}

/// Confirmed object report: passed the K-of-N vote and the confidence gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub class_id: u32,
    pub confidence: f32,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub track_id: Option<u64>,
}

/// Seconds from `earlier` to `later`; negative if `later` precedes `earlier`.
pub(crate) fn elapsed_secs(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

// -------------------- Tests --------------------
