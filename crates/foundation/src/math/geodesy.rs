/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;

/// Meters spanned by one degree of latitude (spherical approximation).
pub const METERS_PER_DEG_LAT: f64 = WGS84_A * std::f64::consts::PI / 180.0;

/// Degrees of latitude covered by `north_m` meters.
pub fn meters_to_lat_deg(north_m: f64) -> f64 {
    north_m / METERS_PER_DEG_LAT
}

/// Degrees of longitude covered by `east_m` meters at `lat_deg`.
///
/// Near the poles the cosine collapses; it is floored so the result stays
/// finite.
pub fn meters_to_lng_deg(east_m: f64, lat_deg: f64) -> f64 {
    let cos_lat = lat_deg.to_radians().cos().abs().max(1e-6);
    east_m / (METERS_PER_DEG_LAT * cos_lat)
}
