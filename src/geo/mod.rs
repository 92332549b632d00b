use crate::models::booking::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 coordinates, in meters.
///
/// Coordinates are not range-checked; callers own validation.
pub fn haversine_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * central_angle
}
