#![cfg(feature = "accelerated")]

use crate::camera::CameraParams;
use crate::geometry::offset_latlon;
use crate::project::backend::{finite_or_nadir, GeoProjector, MIN_ALTITUDE_M};
use crate::{BBox, TelemetrySample};

/// Projector that accounts for the full camera pose.
///
/// A pinhole ray is cast through the bbox centre, rotated by roll, pitch and
/// yaw, and intersected with flat ground `alt` metres below the vehicle.
///
/// Conventions (body-fixed, downward-looking camera):
/// - level attitude: image up is the heading direction, image right is starboard
/// - positive roll swings the view to starboard
/// - positive pitch swings the view forward
/// - yaw is the heading, clockwise from north
///
/// At level attitude this agrees with [`super::NadirProjector`].
#[derive(Clone, Debug, Default)]
pub struct PoseProjector {
    camera: CameraParams,
}

/// Rays flatter than this never meet the ground.
const MIN_DOWN_COMPONENT: f64 = 1e-6;

impl PoseProjector {
    pub fn new(camera: CameraParams) -> Self {
        Self { camera }
    }

    /// Ray through pixel `(u, v)` expressed as (east, north, up).
    fn world_ray(&self, telemetry: &TelemetrySample, u: f64, v: f64, w: f64, h: f64) -> [f64; 3] {
        let mut f = self.camera.focal_length_px();
        if !(f > 0.0) {
            f = 1.0;
        }
        let x_cam = (u - w / 2.0) / f;
        let y_cam = (v - h / 2.0) / f;

        let (mut e, mut n, mut up) = (x_cam, -y_cam, -1.0);

        let (sr, cr) = telemetry.roll.to_radians().sin_cos();
        (e, up) = (e * cr - up * sr, e * sr + up * cr);

        let (sp, cp) = telemetry.pitch.to_radians().sin_cos();
        (n, up) = (n * cp - up * sp, n * sp + up * cp);

        let (sy, cy) = telemetry.yaw.to_radians().sin_cos();
        (e, n) = (e * cy + n * sy, -e * sy + n * cy);

        [e, n, up]
    }
}

impl GeoProjector for PoseProjector {
    fn name(&self) -> &'static str {
        "pose"
    }

    fn project_bbox_to_ground(
        &self,
        telemetry: &TelemetrySample,
        bbox: &BBox,
        image_width: u32,
        image_height: u32,
    ) -> (f64, f64) {
        let (u, v) = bbox.center();
        let [e, n, up] = self.world_ray(
            telemetry,
            u,
            v,
            image_width as f64,
            image_height as f64,
        );
        if !(up < -MIN_DOWN_COMPONENT) {
            log::debug!(
                "ray through ({:.1}, {:.1}) does not reach the ground; using vehicle position",
                u,
                v
            );
            return (telemetry.lat, telemetry.lon);
        }
        let t = telemetry.alt.max(MIN_ALTITUDE_M) / -up;
        let projected = offset_latlon(telemetry.lat, telemetry.lon, t * e, t * n);
        finite_or_nadir(self.name(), telemetry, projected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::backends::NadirProjector;

    fn boxes() -> Vec<BBox> {
        vec![
            BBox::new(310.0, 230.0, 330.0, 250.0),
            BBox::new(0.0, 0.0, 20.0, 20.0),
            BBox::new(600.0, 400.0, 640.0, 480.0),
            BBox::new(100.0, 300.0, 180.0, 420.0),
        ]
    }

    #[test]
    fn level_pose_agrees_with_nadir() {
        let pose = PoseProjector::default();
        let nadir = NadirProjector::default();
        let t = TelemetrySample::new(55.0, 37.0, 120.0);
        for b in boxes() {
            let a = pose.project_bbox_to_ground(&t, &b, 640, 480);
            let r = nadir.project_bbox_to_ground(&t, &b, 640, 480);
            assert!((a.0 - r.0).abs() < 1e-9 && (a.1 - r.1).abs() < 1e-9, "{b:?}");
        }
    }

    #[test]
    fn heading_east_turns_image_right_to_south() {
        let pose = PoseProjector::default();
        let t = TelemetrySample::new(55.0, 37.0, 100.0).with_attitude(90.0, 0.0, 0.0);
        let b = BBox::new(410.0, 230.0, 430.0, 250.0);
        let (lat, lon) = pose.project_bbox_to_ground(&t, &b, 640, 480);
        assert!(lat < 55.0);
        assert!((lon - 37.0).abs() < 1e-9);
    }

    #[test]
    fn positive_roll_shifts_footprint_east() {
        let pose = PoseProjector::default();
        let t = TelemetrySample::new(55.0, 37.0, 100.0).with_attitude(0.0, 0.0, 10.0);
        let b = BBox::new(310.0, 230.0, 330.0, 250.0);
        let (lat, lon) = pose.project_bbox_to_ground(&t, &b, 640, 480);
        assert!(lon > 37.0);
        assert!((lat - 55.0).abs() < 1e-9);
    }

    #[test]
    fn positive_pitch_shifts_footprint_north() {
        let pose = PoseProjector::default();
        let t = TelemetrySample::new(55.0, 37.0, 100.0).with_attitude(0.0, 15.0, 0.0);
        let b = BBox::new(310.0, 230.0, 330.0, 250.0);
        let (lat, _) = pose.project_bbox_to_ground(&t, &b, 640, 480);
        assert!(lat > 55.0);
    }

    #[test]
    fn pitched_footprint_distance_follows_tangent() {
        let pose = PoseProjector::default();
        let t = TelemetrySample::new(55.0, 37.0, 100.0).with_attitude(0.0, 15.0, 0.0);
        let b = BBox::new(310.0, 230.0, 330.0, 250.0);
        let (lat, lon) = pose.project_bbox_to_ground(&t, &b, 640, 480);
        let d = pose.compute_distance(t.lat, t.lon, lat, lon);
        let expected = 100.0 * 15f64.to_radians().tan();
        assert!((d - expected).abs() < 0.05, "distance {d}, expected {expected}");
    }

    #[test]
    fn horizon_ray_returns_vehicle_position() {
        let pose = PoseProjector::default();
        let t = TelemetrySample::new(55.0, 37.0, 100.0).with_attitude(0.0, 95.0, 0.0);
        let b = BBox::new(310.0, 230.0, 330.0, 250.0);
        assert_eq!(pose.project_bbox_to_ground(&t, &b, 640, 480), (55.0, 37.0));
    }
}
