//! K-of-N temporal voting over geo-projected detection events.
//!
//! Events are grouped into clusters by class and proximity to the cluster's
//! most recent event. A cluster confirms an object once its buffer holds
//! `votes_required` distinct frames with a high enough mean confidence; the
//! buffer is then cleared so a persisting object must earn a fresh quorum
//! before it is reported again.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::geometry::haversine_m;
use crate::{elapsed_secs, DetectionEvent, GeoDetection};

/// Voting parameters. Out-of-range values are clamped by [`DetectionAggregator::new`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregatorParams {
    /// Events retained per cluster.
    pub window: usize,
    /// Distinct frames needed to confirm.
    pub votes_required: usize,
    pub min_confidence: f32,
    pub max_distance_m: f64,
    pub ttl_seconds: f64,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            window: 5,
            votes_required: 3,
            min_confidence: 0.6,
            max_distance_m: 25.0,
            ttl_seconds: 10.0,
        }
    }
}

impl AggregatorParams {
    fn clamped(self) -> Self {
        Self {
            window: self.window.max(1),
            votes_required: self.votes_required.max(1),
            min_confidence: self.min_confidence,
            max_distance_m: self.max_distance_m.max(1.0),
            ttl_seconds: self.ttl_seconds.max(1.0),
        }
    }
}

#[derive(Debug)]
struct Cluster {
    class_id: u32,
    events: VecDeque<DetectionEvent>,
    last_reported: Option<DateTime<Utc>>,
}

impl Cluster {
    fn new(class_id: u32) -> Self {
        Self {
            class_id,
            events: VecDeque::new(),
            last_reported: None,
        }
    }

    fn push(&mut self, event: DetectionEvent, window: usize) {
        self.events.push_back(event);
        while self.events.len() > window {
            self.events.pop_front();
        }
    }

    fn votes(&self) -> usize {
        self.events
            .iter()
            .map(|e| e.frame_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    fn avg_confidence(&self) -> f32 {
        if self.events.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.events.iter().map(|e| e.confidence as f64).sum();
        (sum / self.events.len() as f64) as f32
    }

    fn centroid(&self) -> (f64, f64) {
        let n = self.events.len().max(1) as f64;
        let lat = self.events.iter().map(|e| e.location.lat).sum::<f64>() / n;
        let lon = self.events.iter().map(|e| e.location.lon).sum::<f64>() / n;
        (lat, lon)
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl_seconds: f64) -> bool {
        match self.events.back() {
            Some(latest) => elapsed_secs(now, latest.timestamp) > ttl_seconds,
            None => self
                .last_reported
                .is_some_and(|reported| elapsed_secs(now, reported) > ttl_seconds),
        }
    }
}

/// Sliding-window majority vote filter.
///
/// Not internally synchronised; the pipeline holds it behind a mutex for the
/// duration of each [`add_many`](Self::add_many) call.
#[derive(Debug)]
pub struct DetectionAggregator {
    params: AggregatorParams,
    clusters: Vec<Cluster>,
}

impl DetectionAggregator {
    pub fn new(params: AggregatorParams) -> Self {
        Self {
            params: params.clamped(),
            clusters: Vec::new(),
        }
    }

    /// Effective (clamped) parameters.
    pub fn params(&self) -> &AggregatorParams {
        &self.params
    }

    /// Live clusters, including emptied ones waiting out their TTL.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Feed one event; returns a confirmation when it completes a quorum.
    pub fn add_event(&mut self, event: DetectionEvent) -> Option<GeoDetection> {
        let now = event.timestamp;
        self.cleanup(now);

        let idx = self.find_cluster(&event);
        let cluster = &mut self.clusters[idx];
        let class_id = event.class_id;
        let frame_id = event.frame_id.clone();
        let track_id = event.track_id;
        cluster.push(event, self.params.window);

        let mut confirmed = None;
        let votes = cluster.votes();
        let avg_confidence = cluster.avg_confidence();
        if votes >= self.params.votes_required && avg_confidence >= self.params.min_confidence {
            let (lat, lon) = cluster.centroid();
            log::debug!(
                "cluster class={} reached {} votes (avg conf {:.2}) at lat={:.6} lon={:.6}",
                class_id,
                votes,
                avg_confidence,
                lat,
                lon
            );
            confirmed = Some(GeoDetection {
                object_id: None,
                class_id,
                confidence: avg_confidence,
                lat,
                lon,
                alt: None,
                timestamp: now,
                frame_id: Some(frame_id),
                track_id,
            });
            cluster.last_reported = Some(now);
            cluster.events.clear();
        }

        self.cleanup(now);
        confirmed
    }

    /// Feed events in order, collecting every confirmation.
    pub fn add_many<I>(&mut self, events: I) -> Vec<GeoDetection>
    where
        I: IntoIterator<Item = DetectionEvent>,
    {
        events
            .into_iter()
            .filter_map(|event| self.add_event(event))
            .collect()
    }

    /// Closest non-empty same-class cluster within range, or a new one.
    fn find_cluster(&mut self, event: &DetectionEvent) -> usize {
        let mut closest: Option<(usize, f64)> = None;
        for (idx, cluster) in self.clusters.iter().enumerate() {
            if cluster.class_id != event.class_id {
                continue;
            }
            let Some(latest) = cluster.events.back() else {
                continue;
            };
            let dist = haversine_m(
                latest.location.lat,
                latest.location.lon,
                event.location.lat,
                event.location.lon,
            );
            if dist <= self.params.max_distance_m && closest.map_or(true, |(_, best)| dist < best) {
                closest = Some((idx, dist));
            }
        }
        match closest {
            Some((idx, _)) => idx,
            None => {
                self.clusters.push(Cluster::new(event.class_id));
                self.clusters.len() - 1
            }
        }
    }

    fn cleanup(&mut self, now: DateTime<Utc>) {
        let ttl = self.params.ttl_seconds;
        self.clusters.retain(|cluster| !cluster.is_expired(now, ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::offset_latlon;
    use crate::WorldCoord;
    use chrono::Duration;

    fn event(class_id: u32, conf: f32, lat: f64, lon: f64, frame: &str, ts: DateTime<Utc>) -> DetectionEvent {
        DetectionEvent {
            class_id,
            confidence: conf,
            location: WorldCoord { lat, lon },
            frame_id: frame.to_string(),
            timestamp: ts,
            track_id: Some(7),
        }
    }

    #[test]
    fn third_distinct_frame_confirms() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "f1", t0)).is_none());
        assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "f2", t0)).is_none());
        let confirmed = agg
            .add_event(event(0, 0.9, 55.0, 37.0, "f3", t0))
            .expect("third frame should confirm");
        assert!((confirmed.confidence - 0.9).abs() < 1e-6);
        assert_eq!(confirmed.frame_id.as_deref(), Some("f3"));
        assert_eq!(confirmed.track_id, Some(7));
        assert_eq!((confirmed.lat, confirmed.lon), (55.0, 37.0));
    }

    #[test]
    fn repeated_frame_id_does_not_add_votes() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        for _ in 0..4 {
            assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "same", t0)).is_none());
        }
    }

    #[test]
    fn low_average_confidence_blocks_confirmation() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        let out = agg.add_many((1..=3).map(|i| event(0, 0.5, 55.0, 37.0, &format!("f{i}"), t0)));
        assert!(out.is_empty());
    }

    #[test]
    fn buffer_resets_after_confirmation() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        let first = agg.add_many((1..=3).map(|i| event(0, 0.8, 55.0, 37.0, &format!("f{i}"), t0)));
        assert_eq!(first.len(), 1);
        assert!(agg.add_event(event(0, 0.8, 55.0, 37.0, "f4", t0)).is_none());
        assert!(agg.add_event(event(0, 0.8, 55.0, 37.0, "f5", t0)).is_none());
        assert!(agg.add_event(event(0, 0.8, 55.0, 37.0, "f6", t0)).is_some());
    }

    #[test]
    fn classes_vote_separately() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        agg.add_event(event(0, 0.9, 55.0, 37.0, "f1", t0));
        agg.add_event(event(1, 0.9, 55.0, 37.0, "f2", t0));
        assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "f3", t0)).is_none());
        assert_eq!(agg.cluster_count(), 2);
    }

    #[test]
    fn distant_events_start_new_cluster() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        let (far_lat, far_lon) = offset_latlon(55.0, 37.0, 100.0, 0.0);
        agg.add_event(event(0, 0.9, 55.0, 37.0, "f1", t0));
        agg.add_event(event(0, 0.9, far_lat, far_lon, "f2", t0));
        assert_eq!(agg.cluster_count(), 2);
        let (near_lat, near_lon) = offset_latlon(55.0, 37.0, 10.0, 0.0);
        agg.add_event(event(0, 0.9, near_lat, near_lon, "f3", t0));
        assert_eq!(agg.cluster_count(), 2);
    }

    #[test]
    fn ttl_gap_restarts_vote_count() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        agg.add_event(event(0, 0.9, 55.0, 37.0, "f1", t0));
        agg.add_event(event(0, 0.9, 55.0, 37.0, "f2", t0));
        let later = t0 + Duration::seconds(11);
        assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "f3", later)).is_none());
        assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "f4", later)).is_none());
        assert_eq!(agg.cluster_count(), 1);
        assert!(agg.add_event(event(0, 0.9, 55.0, 37.0, "f5", later)).is_some());
    }

    #[test]
    fn reported_cluster_expires_after_ttl() {
        let mut agg = DetectionAggregator::new(AggregatorParams::default());
        let t0 = Utc::now();
        agg.add_many((1..=3).map(|i| event(0, 0.9, 55.0, 37.0, &format!("f{i}"), t0)));
        assert_eq!(agg.cluster_count(), 1);
        agg.add_event(event(2, 0.9, 10.0, 10.0, "x", t0 + Duration::seconds(11)));
        assert_eq!(agg.cluster_count(), 1);
    }

    #[test]
    fn window_bounds_buffer() {
        let params = AggregatorParams {
            window: 2,
            ..AggregatorParams::default()
        };
        let mut agg = DetectionAggregator::new(params);
        let t0 = Utc::now();
        // With two slots the quorum of three can never be met.
        let out = agg.add_many((1..=6).map(|i| event(0, 0.9, 55.0, 37.0, &format!("f{i}"), t0)));
        assert!(out.is_empty());
    }

    #[test]
    fn parameters_are_clamped() {
        let agg = DetectionAggregator::new(AggregatorParams {
            window: 0,
            votes_required: 0,
            min_confidence: 0.0,
            max_distance_m: 0.1,
            ttl_seconds: 0.0,
        });
        assert_eq!(agg.params().window, 1);
        assert_eq!(agg.params().votes_required, 1);
        assert_eq!(agg.params().max_distance_m, 1.0);
        assert_eq!(agg.params().ttl_seconds, 1.0);
    }
}
