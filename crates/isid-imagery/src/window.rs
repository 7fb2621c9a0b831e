//! Square query windows around a point.

use crate::BoundingBox;

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Radius used when none is configured.
pub const DEFAULT_RADIUS_M: f64 = 30.0;

/// Build the request window centered on `(lat, lon)` reaching `radius_m`
/// meters north, south, east and west.
///
/// Latitude offset is the arc length on a spherical Earth; longitude offset is
/// widened by `1 / cos(lat)` so the window stays square on the ground.
pub fn query_window(lat: f64, lon: f64, radius_m: f64) -> BoundingBox {
    let (dlat, dlon) = degree_offsets(lat, radius_m);
    BoundingBox::new(lat - dlat, lon - dlon, lat + dlat, lon + dlon)
}

/// Degrees of latitude and longitude spanned by `radius_m` at latitude `lat`.
pub fn degree_offsets(lat: f64, radius_m: f64) -> (f64, f64) {
    let dlat = (radius_m / EARTH_RADIUS_M).to_degrees();
    // Keep the divisor away from zero at the poles.
    let cos_lat = lat.to_radians().cos().abs().max(1e-6);
    (dlat, dlat / cos_lat)
}
