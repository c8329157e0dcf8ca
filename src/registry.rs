//! Long-lived identity records for confirmed objects.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::haversine_m;
use crate::{elapsed_secs, GeoDetection};

/// Radius for the spatial fallback match, metres.
pub const DEFAULT_MATCH_RADIUS_M: f64 = 15.0;

/// One physical object across its whole observation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedObjectState {
    /// `obj_NNNNNN`, allocated sequentially.
    pub object_id: String,
    pub track_id: Option<u64>,
    pub class_id: u32,
    /// Highest confidence seen so far.
    pub confidence: f32,
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Frame ids of every confirmation, oldest first.
    pub frames: Vec<String>,
    pub uav_id: Option<String>,
    pub notified: bool,
}

#[derive(Debug)]
pub struct ObjectRegistry {
    objects: BTreeMap<String, TrackedObjectState>,
    by_track: HashMap<(u64, u32), String>,
    next_object: u64,
    match_radius_m: f64,
    max_age_seconds: Option<f64>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_RADIUS_M, None)
    }
}

impl ObjectRegistry {
    /// `max_age_seconds` enables idle eviction; `None` keeps every object.
    pub fn new(match_radius_m: f64, max_age_seconds: Option<f64>) -> Self {
        Self {
            objects: BTreeMap::new(),
            by_track: HashMap::new(),
            next_object: 0,
            match_radius_m,
            max_age_seconds,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, object_id: &str) -> Option<&TrackedObjectState> {
        self.objects.get(object_id)
    }

    pub fn find_by_track(&self, track_id: u64, class_id: u32) -> Option<&TrackedObjectState> {
        self.by_track
            .get(&(track_id, class_id))
            .and_then(|id| self.objects.get(id))
    }

    /// Snapshot of every object, ordered by object id.
    pub fn objects(&self) -> Vec<TrackedObjectState> {
        self.objects.values().cloned().collect()
    }

    pub(crate) fn mark_notified(&mut self, object_id: &str) {
        if let Some(state) = self.objects.get_mut(object_id) {
            state.notified = true;
        }
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("obj_{:06}", self.next_object);
        self.next_object += 1;
        id
    }

    fn find_spatial(&self, detection: &GeoDetection) -> Option<String> {
        let mut closest: Option<(&str, f64)> = None;
        for state in self.objects.values() {
            if state.class_id != detection.class_id {
                continue;
            }
            let dist = haversine_m(state.lat, state.lon, detection.lat, detection.lon);
            if dist < self.match_radius_m && closest.map_or(true, |(_, best)| dist < best) {
                closest = Some((state.object_id.as_str(), dist));
            }
        }
        closest.map(|(id, _)| id.to_string())
    }

    /// Merge a confirmation into its object, creating the object if needed.
    ///
    /// Matching order: exact `(track_id, class_id)`, then (only when no track id
    /// is given) the closest same-class object within the match radius, then a
    /// new object.
    pub fn create_or_update(
        &mut self,
        detection: &GeoDetection,
        uav_id: Option<&str>,
        track_id: Option<u64>,
    ) -> TrackedObjectState {
        if self.max_age_seconds.is_some() {
            self.evict_idle(detection.timestamp);
        }

        let existing = match track_id {
            Some(tid) => self.by_track.get(&(tid, detection.class_id)).cloned(),
            None => self.find_spatial(detection),
        };

        let found = match &existing {
            Some(id) => self.objects.get_mut(id),
            None => None,
        };
        if let Some(state) = found {
            state.last_seen = detection.timestamp;
            state.confidence = state.confidence.max(detection.confidence);
            state.lat = detection.lat;
            state.lon = detection.lon;
            state.alt = detection.alt;
            if let Some(frame) = &detection.frame_id {
                state.frames.push(frame.clone());
            }
            if track_id.is_some() {
                state.track_id = track_id;
            }
            if let Some(uav) = uav_id {
                state.uav_id = Some(uav.to_string());
            }
            let updated = state.clone();
            if let Some(tid) = track_id {
                self.by_track
                    .insert((tid, detection.class_id), updated.object_id.clone());
            }
            return updated;
        }

        let object_id = self.allocate_id();
        let state = TrackedObjectState {
            object_id: object_id.clone(),
            track_id,
            class_id: detection.class_id,
            confidence: detection.confidence,
            lat: detection.lat,
            lon: detection.lon,
            alt: detection.alt,
            first_seen: detection.timestamp,
            last_seen: detection.timestamp,
            frames: detection.frame_id.iter().cloned().collect(),
            uav_id: uav_id.map(str::to_string),
            notified: false,
        };
        if let Some(tid) = track_id {
            self.by_track
                .insert((tid, detection.class_id), object_id.clone());
        }
        self.objects.insert(object_id, state.clone());
        state
    }

    /// Drop objects idle for longer than the configured maximum age.
    ///
    /// Returns the number of evicted objects; always zero when eviction is off.
    pub fn evict_idle(&mut self, now: DateTime<Utc>) -> usize {
        let Some(max_age) = self.max_age_seconds else {
            return 0;
        };
        let before = self.objects.len();
        self.objects
            .retain(|_, state| elapsed_secs(now, state.last_seen) <= max_age);
        let objects = &self.objects;
        self.by_track.retain(|_, id| objects.contains_key(id));
        let evicted = before - self.objects.len();
        if evicted > 0 {
            log::info!("evicted {} idle objects from registry", evicted);
        }
        evicted
    }
}
