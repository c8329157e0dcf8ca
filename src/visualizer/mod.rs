//! Map/visualizer fan-out.
//!
//! Publishing never blocks the pipeline: messages go through a bounded queue
//! drained by a worker thread, and are dropped when the queue is full or the
//! worker has gone away.

mod http;

#[cfg(feature = "visualizer-http")]
pub use http::HttpVisualizer;

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::GeoDetection;

/// Queue depth used by [`VisualizerPublisher::spawn`] callers that have no preference.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub uav_id: Option<String>,
    pub object_id: Option<String>,
    pub class_id: u32,
    pub confidence: f32,
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub status: String,
}

impl ObjectMessage {
    pub fn confirmed(det: &GeoDetection, uav_id: Option<&str>) -> Self {
        Self {
            kind: "object".to_string(),
            uav_id: uav_id.map(str::to_string),
            object_id: det.object_id.clone(),
            class_id: det.class_id,
            confidence: det.confidence,
            lat: det.lat,
            lon: det.lon,
            alt: det.alt,
            status: "confirmed".to_string(),
        }
    }
}

/// Blocking delivery to a visualizer backend; runs on the publisher's worker.
pub trait VisualizerSink: Send {
    fn publish(&mut self, msg: &ObjectMessage) -> Result<()>;
}

pub struct VisualizerPublisher {
    tx: Option<SyncSender<ObjectMessage>>,
    join: Option<JoinHandle<()>>,
}

impl VisualizerPublisher {
    /// Start the worker thread draining into `sink`.
    pub fn spawn(mut sink: Box<dyn VisualizerSink>, queue_depth: usize) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<ObjectMessage>(queue_depth.max(1));
        let join = std::thread::Builder::new()
            .name("visualizer".to_string())
            .spawn(move || {
                for msg in rx {
                    if let Err(e) = sink.publish(&msg) {
                        log::warn!(
                            "visualizer publish failed for {:?}: {:#}",
                            msg.object_id,
                            e
                        );
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn visualizer worker: {}", e))?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
        })
    }

    /// Queue `msg` without blocking. Returns false when the message was skipped.
    pub fn publish(&self, msg: ObjectMessage) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                log::debug!("visualizer queue full; skipping {:?}", msg.object_id);
                false
            }
            Err(TrySendError::Disconnected(msg)) => {
                log::debug!("visualizer worker gone; skipping {:?}", msg.object_id);
                false
            }
        }
    }

    /// Close the queue and wait for queued messages to drain.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("visualizer worker panicked");
            }
        }
    }
}

impl Drop for VisualizerPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
