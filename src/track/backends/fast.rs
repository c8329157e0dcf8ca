#![cfg(feature = "accelerated")]

use chrono::{DateTime, Utc};

use crate::track::backend::{SmoothedDetection, TrackSmoother, TrackState, TrackerParams};
use crate::{BBox, RawDetection};

struct Slot {
    id: u64,
    state: TrackState,
    matched: bool,
}

/// Accelerated smoother with the same matching semantics as [`super::BBoxSmoother`].
///
/// Tracks are kept in a flat vector ordered by id, so candidate discovery order
/// matches the reference implementation. Pairs whose boxes are disjoint and whose
/// centres are out of range are rejected before any IoU work, and used flags are
/// plain vectors instead of hash sets.
pub struct FastBBoxSmoother {
    params: TrackerParams,
    slots: Vec<Slot>,
    next_track_id: u64,
    candidates: Vec<(f64, usize, usize)>,
}

fn overlaps(a: &BBox, b: &BBox) -> bool {
    a.x2.min(b.x2) > a.x1.max(b.x1) && a.y2.min(b.y2) > a.y1.max(b.y1)
}

impl FastBBoxSmoother {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            slots: Vec::new(),
            next_track_id: 0,
            candidates: Vec::new(),
        }
    }

    pub fn track(&self, track_id: u64) -> Option<&TrackState> {
        self.slots
            .binary_search_by_key(&track_id, |s| s.id)
            .ok()
            .map(|idx| &self.slots[idx].state)
    }

    fn collect_candidates(&mut self, detections: &[RawDetection]) {
        self.candidates.clear();
        let max_dist = self.params.max_center_distance_px;
        let iou_gate = self.params.iou_threshold > 0.0;
        for (slot_idx, slot) in self.slots.iter().enumerate() {
            let track = &slot.state;
            for (det_idx, det) in detections.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                if iou_gate
                    && !overlaps(&det.bbox, &track.bbox)
                    && !(det.bbox.center_distance(&track.bbox) < max_dist)
                {
                    continue;
                }
                if let Some(score) = self.params.match_score(&det.bbox, &track.bbox) {
                    self.candidates.push((score, slot_idx, det_idx));
                }
            }
        }
        // Unstable sort with an explicit discovery-order tie-break.
        self.candidates.sort_unstable_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
    }
}

impl TrackSmoother for FastBBoxSmoother {
    fn name(&self) -> &'static str {
        "fast"
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

        self.collect_candidates(detections);
        let mut assigned: Vec<Option<SmoothedDetection>> = vec![None; detections.len()];
        for slot in &mut self.slots {
            slot.matched = false;
        }

        let alpha = self.params.alpha;
        for &(_, slot_idx, det_idx) in &self.candidates {
            let slot = &mut self.slots[slot_idx];
            if slot.matched || assigned[det_idx].is_some() {
                continue;
            }
            let det = &detections[det_idx];
            let bbox = slot.state.absorb(det, alpha);
            slot.matched = true;
            assigned[det_idx] = Some(SmoothedDetection::new(det, bbox, slot.id));
        }

        for slot in &mut self.slots {
            if !slot.matched {
                slot.state.missed = slot.state.missed.saturating_add(1);
            }
        }

        for (det_idx, det) in detections.iter().enumerate() {
            if assigned[det_idx].is_some() {
                continue;
            }
            let id = self.next_track_id;
            self.next_track_id += 1;
            self.slots.push(Slot {
                id,
                state: TrackState::spawn(det),
                matched: true,
            });
            assigned[det_idx] = Some(SmoothedDetection::new(det, det.bbox, id));
        }
        self.prune(now);

        assigned.into_iter().flatten().collect()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let params = self.params;
        self.slots.retain(|slot| !params.is_stale(&slot.state, now));
    }

    fn active_tracks(&self) -> usize {
        self.slots.len()
    }
}
