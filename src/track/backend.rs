use chrono::{DateTime, Utc};

use crate::{elapsed_secs, BBox, RawDetection};

/// Base score for a centre-only match; keeps every IoU match ranked above it.
const CENTER_ONLY_BASE_SCORE: f64 = 0.001;
const CENTER_ONLY_WEIGHT: f64 = 0.2;
/// Missed-frame limit for tracks that have not reached `min_hits` yet.
const TENTATIVE_MAX_MISSED: u32 = 2;

/// Tracking and smoothing parameters shared by every smoother variant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerParams {
    /// EMA weight of the new observation, 0..=1.
    pub alpha: f64,
    pub max_center_distance_px: f64,
    pub iou_threshold: f64,
    pub max_age_seconds: f64,
    pub min_hits: u32,
    pub max_missed: u32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            max_center_distance_px: 80.0,
            iou_threshold: 0.25,
            max_age_seconds: 2.0,
            min_hits: 2,
            max_missed: 10,
        }
    }
}

impl TrackerParams {
    /// `1 - distance / max_center_distance_px`, floored at zero.
    pub fn center_similarity(&self, a: &BBox, b: &BBox) -> f64 {
        if self.max_center_distance_px <= 0.0 {
            return 0.0;
        }
        let dist = a.center_distance(b);
        if dist > self.max_center_distance_px {
            return 0.0;
        }
        (1.0 - dist / self.max_center_distance_px).max(0.0)
    }

    /// Candidate score for pairing `detection` with a track at `track`.
    ///
    /// `None` when the pair is not a candidate at all.
    pub fn match_score(&self, detection: &BBox, track: &BBox) -> Option<f64> {
        let iou = detection.iou(track);
        if iou >= self.iou_threshold {
            return Some(iou);
        }
        let center_sim = self.center_similarity(detection, track);
        if center_sim <= 0.0 {
            return None;
        }
        Some(CENTER_ONLY_BASE_SCORE + CENTER_ONLY_WEIGHT * center_sim)
    }

    /// Consecutive misses tolerated before eviction.
    pub fn missed_limit(&self, hits: u32) -> u32 {
        if hits >= self.min_hits {
            self.max_missed
        } else {
            TENTATIVE_MAX_MISSED.min(self.max_missed)
        }
    }

    pub fn is_stale(&self, track: &TrackState, now: DateTime<Utc>) -> bool {
        elapsed_secs(now, track.last_seen) > self.max_age_seconds
            || track.missed > self.missed_limit(track.hits)
    }
}

/// Smoother-internal state of one short-lived track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackState {
    pub bbox: BBox,
    pub class_id: u32,
    pub score: f32,
    /// Successful matches, including the detection that created the track.
    pub hits: u32,
    /// Consecutive calls without a match.
    pub missed: u32,
    pub last_seen: DateTime<Utc>,
}

impl TrackState {
    pub(crate) fn spawn(det: &RawDetection) -> Self {
        Self {
            bbox: det.bbox,
            class_id: det.class_id,
            score: det.confidence,
            hits: 1,
            missed: 0,
            last_seen: det.timestamp,
        }
    }

    /// Fold a matched detection into the track; returns the smoothed box.
    pub(crate) fn absorb(&mut self, det: &RawDetection, alpha: f64) -> BBox {
        self.bbox = self.bbox.smoothed_towards(&det.bbox, alpha);
        self.score = det.confidence;
        self.hits = self.hits.saturating_add(1);
        self.missed = 0;
        self.last_seen = det.timestamp;
        self.bbox
    }
}

/// One input detection with its smoothed box and (possibly new) track id.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedDetection {
    /// The input detection with `track_id` filled in.
    pub detection: RawDetection,
    pub bbox: BBox,
    pub track_id: u64,
}

impl SmoothedDetection {
    pub(crate) fn new(det: &RawDetection, bbox: BBox, track_id: u64) -> Self {
        let mut detection = det.clone();
        detection.track_id = Some(track_id);
        Self {
            detection,
            bbox,
            track_id,
        }
    }
}

/// Short-term tracker: greedy IoU / centre-distance matching plus EMA smoothing.
///
/// Not safe to share between camera streams; each stream owns one instance and
/// calls it serially.
pub trait TrackSmoother: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Match `detections` to tracks and smooth their boxes.
    ///
    /// Returns exactly one entry per input, in input order. An empty input still
    /// prunes stale tracks against the current time.
    fn assign_and_smooth(&mut self, detections: &[RawDetection]) -> Vec<SmoothedDetection>;

    /// Evict tracks that are stale at `now`.
    fn prune(&mut self, now: DateTime<Utc>);

    /// Number of live tracks.
    fn active_tracks(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_match_outranks_center_match() {
        let p = TrackerParams::default();
        let track = BBox::new(100.0, 100.0, 140.0, 140.0);
        let overlapping = BBox::new(105.0, 100.0, 145.0, 140.0);
        let nearby = BBox::new(150.0, 100.0, 190.0, 140.0);
        let iou_score = p.match_score(&overlapping, &track).unwrap();
        let center_score = p.match_score(&nearby, &track).unwrap();
        assert!(iou_score >= p.iou_threshold);
        assert!(center_score < 0.21);
        assert!(iou_score > center_score);
    }

    #[test]
    fn far_boxes_are_not_candidates() {
        let p = TrackerParams::default();
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(300.0, 300.0, 310.0, 310.0);
        assert_eq!(p.match_score(&a, &b), None);
    }

    #[test]
    fn tentative_tracks_get_relaxed_miss_limit() {
        let p = TrackerParams::default();
        assert_eq!(p.missed_limit(1), 2);
        assert_eq!(p.missed_limit(2), 10);
        let tight = TrackerParams {
            max_missed: 1,
            ..p
        };
        assert_eq!(tight.missed_limit(1), 1);
    }

    #[test]
    fn zero_center_distance_disables_center_matching() {
        let p = TrackerParams {
            max_center_distance_px: 0.0,
            ..TrackerParams::default()
        };
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(p.center_similarity(&a, &a), 0.0);
    }
}
