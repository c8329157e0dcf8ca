//! Batch orchestrator: smoother → projector → aggregator → registry/notify → fan-out.
//!
//! One pipeline instance is shared (behind an `Arc`) by the capture loop and
//! the API server. Each mutable stage sits behind its own mutex; the
//! aggregator lock is held only for the duration of `add_many`.

use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::DetectionAggregator;
use crate::config::FusionConfig;
use crate::notify::{
    JsonNotificationWriter, NotificationSink, ObjectNotificationManager, ObjectObserver, ObserverList,
};
use crate::project::{build_projector, GeoProjector};
use crate::registry::{ObjectRegistry, TrackedObjectState};
use crate::track::{build_smoother, TrackSmoother};
use crate::transport::{DetectionSink, TransmitRecord, Transmitter};
use crate::visualizer::{ObjectMessage, VisualizerPublisher, VisualizerSink, DEFAULT_QUEUE_DEPTH};
use crate::{BBox, DetectionEvent, GeoDetection, RawDetection, TelemetrySample};

// -------------------- Payloads --------------------

/// One model output as received on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetectionPayload {
    pub class_id: u32,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: BBox,
    /// Overrides the batch frame id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<String>,
    /// Overrides the batch capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One frame's detections plus the telemetry captured with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub frame_id: String,
    pub frame_width: u32,
    pub frame_height: u32,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
    pub telemetry: TelemetrySample,
    #[serde(default)]
    pub detections: Vec<RawDetectionPayload>,
}

impl DetectionBatch {
    /// Reject malformed input before it reaches the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(anyhow!(
                "frame size must be positive, got {}x{}",
                self.frame_width,
                self.frame_height
            ));
        }
        self.telemetry.validate()?;
        for (idx, det) in self.detections.iter().enumerate() {
            if !(0.0..=1.0).contains(&det.confidence) {
                return Err(anyhow!(
                    "detection {}: confidence {} outside [0, 1]",
                    idx,
                    det.confidence
                ));
            }
            let b = &det.bbox;
            if !b.is_finite() || b.x1 >= b.x2 || b.y1 >= b.y2 {
                return Err(anyhow!(
                    "detection {}: bbox [{}, {}, {}, {}] must be finite with x1<x2, y1<y2",
                    idx,
                    b.x1,
                    b.y1,
                    b.x2,
                    b.y2
                ));
            }
        }
        Ok(())
    }

    /// Detections with per-detection overrides resolved against the batch.
    pub fn raw_detections(&self) -> Vec<RawDetection> {
        self.detections
            .iter()
            .map(|d| RawDetection {
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: d.bbox,
                frame_id: d.frame_id.clone().unwrap_or_else(|| self.frame_id.clone()),
                timestamp: d.timestamp.unwrap_or(self.captured_at),
                track_id: None,
            })
            .collect()
    }
}

// -------------------- Pipeline --------------------

pub struct DetectionPipeline {
    smoother: Mutex<Box<dyn TrackSmoother>>,
    projector: Box<dyn GeoProjector>,
    aggregator: Mutex<DetectionAggregator>,
    notifications: Mutex<ObjectNotificationManager>,
    observers: ObserverList,
    transmitter: Mutex<Option<Box<dyn DetectionSink>>>,
    visualizer: Option<VisualizerPublisher>,
    uav_id: Option<String>,
    last_confirmed: Mutex<Option<GeoDetection>>,
}

impl DetectionPipeline {
    /// Core stages only: no transmitter, no visualizer.
    pub fn new(config: &FusionConfig) -> Self {
        let registry = ObjectRegistry::new(
            config.registry.match_radius_m,
            config.registry.max_age_seconds,
        );
        let writer = JsonNotificationWriter::new(&config.notifications_dir);
        let notifications =
            ObjectNotificationManager::new(registry, Box::new(writer), config.uav_id.clone());
        let observers = notifications.observers();
        Self {
            smoother: Mutex::new(build_smoother(config.use_accelerated_core, config.tracker)),
            projector: build_projector(config.use_accelerated_core, config.camera),
            aggregator: Mutex::new(DetectionAggregator::new(config.aggregator)),
            notifications: Mutex::new(notifications),
            observers,
            transmitter: Mutex::new(None),
            visualizer: None,
            uav_id: config.uav_id.clone(),
            last_confirmed: Mutex::new(None),
        }
    }

    /// Core stages plus the outbound sinks enabled in `config`.
    pub fn from_config(config: &FusionConfig) -> Result<Self> {
        let mut pipeline = Self::new(config);
        let gs = &config.ground_station;
        if gs.enabled {
            log::info!(
                "ground station transmitter -> {}:{} ({})",
                gs.host,
                gs.port,
                if gs.udp { "udp" } else { "tcp" }
            );
            pipeline = pipeline.with_transmitter(Box::new(Transmitter::new(
                &gs.host,
                gs.port,
                gs.udp,
                gs.timeout_seconds,
            )));
        }
        if config.visualizer.enabled {
            pipeline = pipeline.with_configured_visualizer(config)?;
        }
        Ok(pipeline)
    }

    #[cfg(feature = "visualizer-http")]
    fn with_configured_visualizer(self, config: &FusionConfig) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(2);
        let sink = crate::visualizer::HttpVisualizer::new(&config.visualizer.url, timeout);
        log::info!("visualizer publishing to {}", sink.endpoint());
        self.with_visualizer(Box::new(sink))
    }

    #[cfg(not(feature = "visualizer-http"))]
    fn with_configured_visualizer(self, config: &FusionConfig) -> Result<Self> {
        log::warn!(
            "visualizer_enabled set for {} but built without visualizer-http; skipping",
            config.visualizer.url
        );
        Ok(self)
    }

    pub fn with_transmitter(mut self, sink: Box<dyn DetectionSink>) -> Self {
        *self
            .transmitter
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
        self
    }

    pub fn with_visualizer(mut self, sink: Box<dyn VisualizerSink>) -> Result<Self> {
        self.visualizer = Some(VisualizerPublisher::spawn(sink, DEFAULT_QUEUE_DEPTH)?);
        Ok(self)
    }

    pub fn with_notification_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.notifications
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .set_sink(sink);
        self
    }

    /// Observers run after the registry lock is released and may call back
    /// into the pipeline.
    pub fn register_observer(&self, observer: Box<dyn ObjectObserver>) -> Result<()> {
        self.observers.register(observer)
    }

    pub fn projector_name(&self) -> &'static str {
        self.projector.name()
    }

    /// Run one batch through every stage.
    ///
    /// Returns the detections confirmed by this batch, with `object_id` filled
    /// in. Delivery failures are logged and never change the result.
    pub fn process_batch(&self, batch: &DetectionBatch) -> Result<Vec<GeoDetection>> {
        if batch.detections.is_empty() {
            return Ok(Vec::new());
        }

        let raw = batch.raw_detections();
        let smoothed = self
            .smoother
            .lock()
            .map_err(|_| anyhow!("smoother lock poisoned"))?
            .assign_and_smooth(&raw);

        let events: Vec<DetectionEvent> = smoothed
            .into_iter()
            .map(|s| DetectionEvent {
                class_id: s.detection.class_id,
                confidence: s.detection.confidence,
                location: self.projector.project(
                    &batch.telemetry,
                    &s.bbox,
                    batch.frame_width,
                    batch.frame_height,
                ),
                frame_id: s.detection.frame_id,
                timestamp: s.detection.timestamp,
                track_id: Some(s.track_id),
            })
            .collect();

        let mut confirmed = self
            .aggregator
            .lock()
            .map_err(|_| anyhow!("aggregator lock poisoned"))?
            .add_many(events);
        if confirmed.is_empty() {
            return Ok(confirmed);
        }

        let mut discovered = Vec::new();
        {
            let mut notifications = self
                .notifications
                .lock()
                .map_err(|_| anyhow!("notification manager lock poisoned"))?;
            for det in confirmed.iter_mut() {
                let update = notifications.record_confirmed_detection(det);
                det.object_id = Some(update.state.object_id.clone());
                if update.newly_notified {
                    discovered.push(update.state);
                }
            }
        }

        for det in &confirmed {
            self.publish_visualizer(det);
        }
        self.transmit(&confirmed)?;

        *self
            .last_confirmed
            .lock()
            .map_err(|_| anyhow!("last detection lock poisoned"))? = confirmed.last().cloned();

        for state in &discovered {
            if let Err(e) = self.observers.notify(state) {
                log::error!("observers skipped for {}: {:#}", state.object_id, e);
            }
        }
        Ok(confirmed)
    }

    fn publish_visualizer(&self, det: &GeoDetection) {
        let Some(publisher) = &self.visualizer else {
            return;
        };
        publisher.publish(ObjectMessage::confirmed(det, self.uav_id.as_deref()));
    }

    fn transmit(&self, detections: &[GeoDetection]) -> Result<()> {
        let mut guard = self
            .transmitter
            .lock()
            .map_err(|_| anyhow!("transmitter lock poisoned"))?;
        let Some(sink) = guard.as_mut() else {
            return Ok(());
        };
        for det in detections {
            match sink.send(&TransmitRecord::from(det)) {
                Ok(()) => log::info!(
                    "Sent to ground station: cls={} conf={:.2} lat={:.6} lon={:.6}",
                    det.class_id,
                    det.confidence,
                    det.lat,
                    det.lon
                ),
                Err(e) => log::error!(
                    "Failed to transmit detection cls={} conf={:.2} lat={:.6} lon={:.6}: {:#}",
                    det.class_id,
                    det.confidence,
                    det.lat,
                    det.lon,
                    e
                ),
            }
        }
        Ok(())
    }

    /// Registry snapshot.
    pub fn objects(&self) -> Result<Vec<TrackedObjectState>> {
        Ok(self
            .notifications
            .lock()
            .map_err(|_| anyhow!("notification manager lock poisoned"))?
            .registry()
            .objects())
    }

    /// Most recent confirmation from any batch.
    pub fn last_confirmed(&self) -> Result<Option<GeoDetection>> {
        Ok(self
            .last_confirmed
            .lock()
            .map_err(|_| anyhow!("last detection lock poisoned"))?
            .clone())
    }

    pub fn active_tracks(&self) -> Result<usize> {
        Ok(self
            .smoother
            .lock()
            .map_err(|_| anyhow!("smoother lock poisoned"))?
            .active_tracks())
    }

    pub fn cluster_count(&self) -> Result<usize> {
        Ok(self
            .aggregator
            .lock()
            .map_err(|_| anyhow!("aggregator lock poisoned"))?
            .cluster_count())
    }
}
