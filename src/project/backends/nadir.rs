use crate::camera::CameraParams;
use crate::geometry::offset_latlon;
use crate::project::backend::{finite_or_nadir, GeoProjector, MIN_ALTITUDE_M};
use crate::{BBox, TelemetrySample};

/// Reference projector for a camera pointing straight down.
///
/// Pixel offsets from the image centre are converted to metres with the ground
/// sample distance at the current altitude. Attitude is ignored.
#[derive(Clone, Debug, Default)]
pub struct NadirProjector {
    camera: CameraParams,
}

impl NadirProjector {
    pub fn new(camera: CameraParams) -> Self {
        Self { camera }
    }
}

impl GeoProjector for NadirProjector {
    fn name(&self) -> &'static str {
        "nadir"
    }

    fn project_bbox_to_ground(
        &self,
        telemetry: &TelemetrySample,
        bbox: &BBox,
        image_width: u32,
        image_height: u32,
    ) -> (f64, f64) {
        let (cx, cy) = bbox.center();
        let dx_px = cx - image_width as f64 / 2.0;
        // Image rows grow downward, north grows upward.
        let dy_px = image_height as f64 / 2.0 - cy;

        let gsd_m = self.camera.gsd_cm_per_px(telemetry.alt.max(MIN_ALTITUDE_M)) / 100.0;
        let projected = offset_latlon(telemetry.lat, telemetry.lon, dx_px * gsd_m, dy_px * gsd_m);
        finite_or_nadir(self.name(), telemetry, projected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::haversine_m;

    fn telemetry() -> TelemetrySample {
        TelemetrySample::new(55.0, 37.0, 100.0)
    }

    #[test]
    fn image_centre_projects_to_vehicle_position() {
        let p = NadirProjector::default();
        let bbox = BBox::new(310.0, 230.0, 330.0, 250.0);
        let (lat, lon) = p.project_bbox_to_ground(&telemetry(), &bbox, 640, 480);
        assert_eq!((lat, lon), (55.0, 37.0));
    }

    #[test]
    fn rightward_offset_moves_east_only() {
        let p = NadirProjector::default();
        let bbox = BBox::new(410.0, 230.0, 430.0, 250.0);
        let (lat, lon) = p.project_bbox_to_ground(&telemetry(), &bbox, 640, 480);
        assert_eq!(lat, 55.0);
        assert!(lon > 37.0);
        // 100 px at ~1.37 cm/px
        let d = haversine_m(55.0, 37.0, lat, lon);
        assert!((d - 1.3706).abs() < 0.01, "distance {d}");
    }

    #[test]
    fn upward_offset_moves_north() {
        let p = NadirProjector::default();
        let bbox = BBox::new(310.0, 30.0, 330.0, 50.0);
        let (lat, lon) = p.project_bbox_to_ground(&telemetry(), &bbox, 640, 480);
        assert!(lat > 55.0);
        assert_eq!(lon, 37.0);
    }

    #[test]
    fn zero_altitude_is_clamped() {
        let p = NadirProjector::default();
        let bbox = BBox::new(600.0, 0.0, 640.0, 40.0);
        let mut t = telemetry();
        t.alt = 0.0;
        let at_zero = p.project_bbox_to_ground(&t, &bbox, 640, 480);
        t.alt = 1.0;
        let at_one = p.project_bbox_to_ground(&t, &bbox, 640, 480);
        assert_eq!(at_zero, at_one);
        assert!(at_zero.0.is_finite() && at_zero.1.is_finite());
    }

    #[test]
    fn pole_projection_stays_in_coordinate_range() {
        let p = NadirProjector::default();
        let bbox = BBox::new(600.0, 230.0, 640.0, 250.0);
        let t = TelemetrySample::new(90.0, 10.0, 100.0);
        let (lat, lon) = p.project_bbox_to_ground(&t, &bbox, 640, 480);
        assert!((-90.0..=90.0).contains(&lat), "lat {lat}");
        assert!((-180.0..180.0).contains(&lon), "lon {lon}");
    }

    #[test]
    fn compute_distance_matches_pixel_offset() {
        let p = NadirProjector::default();
        let t = telemetry();
        // 100 px right of the image centre.
        let bbox = BBox::new(410.0, 230.0, 430.0, 250.0);
        let (lat, lon) = p.project_bbox_to_ground(&t, &bbox, 640, 480);
        let expected = 100.0 * CameraParams::default().gsd_cm_per_px(100.0) / 100.0;
        let d = p.compute_distance(t.lat, t.lon, lat, lon);
        assert!((d - expected).abs() < 1e-3, "distance {d}, expected {expected}");
        assert_eq!(p.compute_distance(t.lat, t.lon, t.lat, t.lon), 0.0);
    }

    #[test]
    fn nan_box_falls_back_to_vehicle_position() {
        let p = NadirProjector::default();
        let bbox = BBox::new(f64::NAN, 0.0, 10.0, 10.0);
        let (lat, lon) = p.project_bbox_to_ground(&telemetry(), &bbox, 640, 480);
        assert_eq!((lat, lon), (55.0, 37.0));
    }
}
