//! Great-circle destination on a spherical Earth.

use super::{accepts, wrap_longitude, GeodesicProjector};
use crate::types::Coordinate;

/// Mean radius of Earth in meters (IUGG, GRS 80 derived constant).
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Spherical forward geodesic. Agrees with the ellipsoidal answer to well
/// under a metre at footprint-scale distances.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalProjector;

impl GeodesicProjector for SphericalProjector {
    fn project(&self, origin: Coordinate, bearing_deg: f64, distance_m: f64) -> Option<Coordinate> {
        if !accepts(origin, bearing_deg, distance_m) {
            return None;
        }
        if distance_m == 0.0 {
            return Some(origin);
        }

        let lat_rad = origin.latitude.to_radians();
        let lon_rad = origin.longitude.to_radians();
        let bearing_rad = bearing_deg.to_radians();
        let angular_dist = distance_m / MEAN_EARTH_RADIUS_M;

        let lat2 = (lat_rad.sin() * angular_dist.cos()
            + lat_rad.cos() * angular_dist.sin() * bearing_rad.cos())
        .asin();
        let lon2 = lon_rad
            + (bearing_rad.sin() * angular_dist.sin() * lat_rad.cos())
                .atan2(angular_dist.cos() - lat_rad.sin() * lat2.sin());

        let destination = Coordinate::new(lat2.to_degrees(), wrap_longitude(lon2.to_degrees()));
        destination.is_valid().then_some(destination)
    }

    fn name(&self) -> &'static str {
        "spherical"
    }
}
