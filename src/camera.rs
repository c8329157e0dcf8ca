/// Optical parameters of the payload camera.
///
/// Defaults describe a DJI Mini 4 Pro class sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraParams {
    pub sensor_width_mm: f64,
    pub focal_length_mm: f64,
    /// Long-side resolution of the sensor, pixels.
    pub resolution_px: u32,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            sensor_width_mm: 6.3,
            focal_length_mm: 5.7,
            resolution_px: 8_064,
        }
    }
}

impl CameraParams {
    /// Ground sample distance in cm/pixel at `altitude_m`.
    pub fn gsd_cm_per_px(&self, altitude_m: f64) -> f64 {
        100.0 * altitude_m * self.sensor_width_mm
            / (self.focal_length_mm * self.resolution_px as f64)
    }

    /// Focal length expressed in pixels of the long side.
    pub fn focal_length_px(&self) -> f64 {
        self.focal_length_mm * self.resolution_px as f64 / self.sensor_width_mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gsd_scales_linearly_with_altitude() {
        let cam = CameraParams::default();
        let g100 = cam.gsd_cm_per_px(100.0);
        assert!((g100 - 1.3706).abs() < 1e-3, "gsd {g100}");
        assert!((cam.gsd_cm_per_px(200.0) - 2.0 * g100).abs() < 1e-12);
    }

    #[test]
    fn focal_length_px_matches_gsd() {
        let cam = CameraParams::default();
        // One pixel at altitude h covers h / f_px metres.
        let per_px_m = 100.0 / cam.focal_length_px();
        assert!((per_px_m * 100.0 - cam.gsd_cm_per_px(100.0)).abs() < 1e-9);
    }
}
