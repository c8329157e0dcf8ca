use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::track::backend::{SmoothedDetection, TrackSmoother, TrackState, TrackerParams};
use crate::RawDetection;

/// Reference smoother.
///
/// Tracks live in an id-ordered map. Every same-class (track, detection) pair
/// is scored, the candidates are sorted by descending score (stable, so ties
/// keep discovery order) and assigned greedily.
#[derive(Debug)]
pub struct BBoxSmoother {
    params: TrackerParams,
    tracks: BTreeMap<u64, TrackState>,
    next_track_id: u64,
}

impl BBoxSmoother {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            tracks: BTreeMap::new(),
            next_track_id: 0,
        }
    }

    pub fn track(&self, track_id: u64) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    fn candidates(&self, detections: &[RawDetection]) -> Vec<(f64, u64, usize)> {
        let mut candidates = Vec::new();
        for (&track_id, track) in &self.tracks {
            for (det_idx, det) in detections.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                if let Some(score) = self.params.match_score(&det.bbox, &track.bbox) {
                    candidates.push((score, track_id, det_idx));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates
    }
}

impl TrackSmoother for BBoxSmoother {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn assign_and_smooth(&mut self, detections: &[RawDetection]) -> Vec<SmoothedDetection> {
        if detections.is_empty() {
            self.prune(Utc::now());
            return Vec::new();
        }
        let now = detections
            .iter()
            .map(|d| d.timestamp)
            .max()
            .unwrap_or_else(Utc::now);
        self.prune(now);

        let mut assigned: Vec<Option<SmoothedDetection>> = vec![None; detections.len()];
        let mut used_tracks: HashSet<u64> = HashSet::new();

        for (_, track_id, det_idx) in self.candidates(detections) {
            if used_tracks.contains(&track_id) || assigned[det_idx].is_some() {
                continue;
            }
            let det = &detections[det_idx];
            let Some(track) = self.tracks.get_mut(&track_id) else {
                continue;
            };
            let bbox = track.absorb(det, self.params.alpha);
            assigned[det_idx] = Some(SmoothedDetection::new(det, bbox, track_id));
            used_tracks.insert(track_id);
        }

        for (det_idx, det) in detections.iter().enumerate() {
            if assigned[det_idx].is_some() {
                continue;
            }
            let track_id = self.next_track_id;
            self.next_track_id += 1;
            self.tracks.insert(track_id, TrackState::spawn(det));
            assigned[det_idx] = Some(SmoothedDetection::new(det, det.bbox, track_id));
            used_tracks.insert(track_id);
        }

        for (track_id, track) in self.tracks.iter_mut() {
            if !used_tracks.contains(track_id) {
                track.missed = track.missed.saturating_add(1);
            }
        }
        self.prune(now);

        assigned.into_iter().flatten().collect()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let params = self.params;
        self.tracks.retain(|track_id, track| {
            let stale = params.is_stale(track, now);
            if stale {
                log::debug!(
                    "evicting track {} (hits={}, missed={})",
                    track_id,
                    track.hits,
                    track.missed
                );
            }
            !stale
        });
    }

    fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BBox;
    use chrono::Duration;

    fn det(class_id: u32, bbox: BBox, ts: DateTime<Utc>) -> RawDetection {
        RawDetection {
            class_id,
            confidence: 0.8,
            bbox,
            frame_id: "f".to_string(),
            timestamp: ts,
            track_id: None,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn output_preserves_input_order_and_length() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        let dets = vec![
            det(0, BBox::new(0.0, 0.0, 10.0, 10.0), t0),
            det(1, BBox::new(100.0, 100.0, 120.0, 120.0), t0),
            det(0, BBox::new(400.0, 400.0, 420.0, 420.0), t0),
        ];
        let out = s.assign_and_smooth(&dets);
        assert_eq!(out.len(), 3);
        for (o, d) in out.iter().zip(&dets) {
            assert_eq!(o.detection.class_id, d.class_id);
            assert_eq!(o.detection.track_id, Some(o.track_id));
        }
        let ids: Vec<u64> = out.iter().map(|o| o.track_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn overlapping_box_keeps_track_and_is_smoothed() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        let first = s.assign_and_smooth(&[det(0, BBox::new(100.0, 100.0, 140.0, 140.0), t0)]);
        let second = s.assign_and_smooth(&[det(
            0,
            BBox::new(104.0, 100.0, 144.0, 140.0),
            t0 + Duration::milliseconds(100),
        )]);
        assert_eq!(first[0].track_id, second[0].track_id);
        assert_eq!(second[0].bbox, BBox::new(102.0, 100.0, 142.0, 140.0));
        assert_eq!(s.track(second[0].track_id).map(|t| t.hits), Some(2));
    }

    #[test]
    fn center_similarity_bridges_low_overlap() {
        // 30 px shift of a 20 px box: no overlap, centre distance 30 < 80.
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        let a = s.assign_and_smooth(&[det(0, BBox::new(100.0, 100.0, 120.0, 120.0), t0)]);
        let b = s.assign_and_smooth(&[det(
            0,
            BBox::new(130.0, 100.0, 150.0, 120.0),
            t0 + Duration::milliseconds(50),
        )]);
        assert_eq!(a[0].track_id, b[0].track_id);
    }

    #[test]
    fn different_classes_never_share_a_track() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        let a = s.assign_and_smooth(&[det(0, BBox::new(0.0, 0.0, 10.0, 10.0), t0)]);
        let b = s.assign_and_smooth(&[det(1, BBox::new(0.0, 0.0, 10.0, 10.0), t0)]);
        assert_ne!(a[0].track_id, b[0].track_id);
        assert_eq!(b[0].bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn track_ids_are_never_reused() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        let a = s.assign_and_smooth(&[det(0, BBox::new(0.0, 0.0, 10.0, 10.0), t0)]);
        // Far in the future: the first track ages out before matching.
        let b = s.assign_and_smooth(&[det(
            0,
            BBox::new(0.0, 0.0, 10.0, 10.0),
            t0 + Duration::seconds(10),
        )]);
        assert_eq!(a[0].track_id, 0);
        assert_eq!(b[0].track_id, 1);
        assert_eq!(s.active_tracks(), 1);
    }

    #[test]
    fn tentative_track_evicted_after_three_misses() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        s.assign_and_smooth(&[det(0, BBox::new(0.0, 0.0, 10.0, 10.0), t0)]);
        let elsewhere = BBox::new(500.0, 500.0, 510.0, 510.0);
        for i in 1..=2 {
            s.assign_and_smooth(&[det(1, elsewhere, t0 + Duration::milliseconds(10 * i))]);
            assert!(s.track(0).is_some(), "evicted after {i} misses");
        }
        s.assign_and_smooth(&[det(1, elsewhere, t0 + Duration::milliseconds(30))]);
        assert!(s.track(0).is_none());
    }

    #[test]
    fn confirmed_track_survives_up_to_max_missed() {
        let params = TrackerParams {
            max_age_seconds: 100.0,
            ..TrackerParams::default()
        };
        let mut s = BBoxSmoother::new(params);
        let t0 = base_time();
        let b = BBox::new(0.0, 0.0, 10.0, 10.0);
        s.assign_and_smooth(&[det(0, b, t0)]);
        s.assign_and_smooth(&[det(0, b, t0 + Duration::milliseconds(10))]);
        let elsewhere = BBox::new(500.0, 500.0, 510.0, 510.0);
        for i in 0..10 {
            s.assign_and_smooth(&[det(1, elsewhere, t0 + Duration::milliseconds(20 + i))]);
        }
        assert_eq!(s.track(0).map(|t| t.missed), Some(10));
        s.assign_and_smooth(&[det(1, elsewhere, t0 + Duration::milliseconds(40))]);
        assert!(s.track(0).is_none());
    }

    #[test]
    fn empty_input_prunes_against_wall_clock() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let old = Utc::now() - Duration::seconds(30);
        s.assign_and_smooth(&[det(0, BBox::new(0.0, 0.0, 10.0, 10.0), old)]);
        assert_eq!(s.active_tracks(), 1);
        assert!(s.assign_and_smooth(&[]).is_empty());
        assert_eq!(s.active_tracks(), 0);
    }

    #[test]
    fn best_overlap_wins_contested_track() {
        let mut s = BBoxSmoother::new(TrackerParams::default());
        let t0 = base_time();
        s.assign_and_smooth(&[det(0, BBox::new(100.0, 100.0, 140.0, 140.0), t0)]);
        let t1 = t0 + Duration::milliseconds(10);
        let out = s.assign_and_smooth(&[
            det(0, BBox::new(110.0, 100.0, 150.0, 140.0), t1),
            det(0, BBox::new(101.0, 100.0, 141.0, 140.0), t1),
        ]);
        assert_eq!(out[1].track_id, 0);
        assert_eq!(out[0].track_id, 1);
    }
}
