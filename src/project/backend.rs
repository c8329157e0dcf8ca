use crate::geometry::haversine_m;
use crate::{BBox, TelemetrySample, WorldCoord};

/// Altitude floor applied before any ground projection, metres.
pub const MIN_ALTITUDE_M: f64 = 1.0;

/// Image-to-ground projection.
///
/// Implementations agree on output semantics: the lat/lon of the ground
/// footprint of the bounding-box centre. They never return NaN or infinite
/// coordinates; on degenerate input they fall back to the vehicle position.
pub trait GeoProjector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Distance in metres between two WGS84 points.
    fn compute_distance(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        haversine_m(lat1, lon1, lat2, lon2)
    }

    /// Project a bounding-box centre from image space to ground `(lat, lon)`.
    fn project_bbox_to_ground(
        &self,
        telemetry: &TelemetrySample,
        bbox: &BBox,
        image_width: u32,
        image_height: u32,
    ) -> (f64, f64);

    fn project(
        &self,
        telemetry: &TelemetrySample,
        bbox: &BBox,
        image_width: u32,
        image_height: u32,
    ) -> WorldCoord {
        let (lat, lon) = self.project_bbox_to_ground(telemetry, bbox, image_width, image_height);
        WorldCoord { lat, lon }
    }
}

/// Replace a non-finite projection with the vehicle position.
pub(crate) fn finite_or_nadir(
    backend: &str,
    telemetry: &TelemetrySample,
    projected: (f64, f64),
) -> (f64, f64) {
    if projected.0.is_finite() && projected.1.is_finite() {
        return projected;
    }
    log::warn!(
        "{} projector produced non-finite coordinate at lat={:.6} lon={:.6} alt={:.1}; using vehicle position",
        backend,
        telemetry.lat,
        telemetry.lon,
        telemetry.alt
    );
    (telemetry.lat, telemetry.lon)
}
