//! Pure geodesy helpers shared by the projectors, the aggregator and the registry.

/// Mean Earth radius, metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres between two `(lat, lon)` points in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = phi2 - phi1;
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Shift a point by `dx_m` east and `dy_m` north (flat-earth approximation).
///
/// Returns the new `(lat, lon)` in degrees, latitude clamped to [-90, 90] and
/// longitude wrapped into [-180, 180).
pub fn offset_latlon(lat: f64, lon: f64, dx_m: f64, dy_m: f64) -> (f64, f64) {
    let d_lat = dy_m / EARTH_RADIUS_M;
    let d_lon = dx_m / (EARTH_RADIUS_M * lat.to_radians().cos());
    (
        (lat + d_lat.to_degrees()).clamp(-90.0, 90.0),
        wrap_lon(lon + d_lon.to_degrees()),
    )
}

/// Wrap a longitude in degrees into [-180, 180).
pub fn wrap_lon(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        return lon;
    }
    (lon + 180.0).rem_euclid(360.0) - 180.0
}
