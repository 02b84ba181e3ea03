//! Vincenty's direct solution on the WGS-84 ellipsoid.
//!
//! Vincenty, T. (1975). Direct and inverse solutions of geodesics on the
//! ellipsoid with application of nested equations. Survey Review 23(176).

use super::{accepts, wrap_longitude, GeodesicProjector};
use crate::types::Coordinate;

/// WGS-84 semi-major axis (m)
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS-84 semi-minor axis (m)
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// Convergence threshold on sigma (radians), ~0.006 mm on the ellipsoid.
const CONVERGENCE: f64 = 1e-12;
const MAX_ITERATIONS: usize = 200;

/// Ellipsoidal forward geodesic.
#[derive(Debug, Clone, Copy, Default)]
pub struct VincentyProjector;

impl GeodesicProjector for VincentyProjector {
    fn project(&self, origin: Coordinate, bearing_deg: f64, distance_m: f64) -> Option<Coordinate> {
        if !accepts(origin, bearing_deg, distance_m) {
            return None;
        }
        if distance_m == 0.0 {
            return Some(origin);
        }
        direct(origin, bearing_deg, distance_m)
    }

    fn name(&self) -> &'static str {
        "vincenty"
    }
}

#[allow(clippy::many_single_char_names, clippy::similar_names)]
fn direct(origin: Coordinate, bearing_deg: f64, s: f64) -> Option<Coordinate> {
    let f = WGS84_F;
    let alpha1 = bearing_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - f) * origin.latitude.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let first_sigma = s / (WGS84_B * a);
    let mut sigma = first_sigma;
    let mut cos_2sigma_m;
    let mut sin_sigma;
    let mut cos_sigma;
    let mut iterations = 0;
    loop {
        cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        sin_sigma = sigma.sin();
        cos_sigma = sigma.cos();
        let delta_sigma = b
            * sin_sigma
            * (cos_2sigma_m
                + b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                        - b / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
        let previous = sigma;
        sigma = first_sigma + delta_sigma;
        iterations += 1;
        if (sigma - previous).abs() <= CONVERGENCE {
            break;
        }
        if iterations >= MAX_ITERATIONS {
            return None;
        }
    }
    cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
    sin_sigma = sigma.sin();
    cos_sigma = sigma.cos();

    let x = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - f) * (sin_alpha * sin_alpha + x * x).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * f
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

    let destination = Coordinate::new(
        lat2.to_degrees(),
        wrap_longitude(origin.longitude + l.to_degrees()),
    );
    destination.is_valid().then_some(destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMONT: Coordinate = Coordinate::new(36.605_8, -97.488_8);

    #[test]
    fn test_zero_distance_is_identity() {
        for bearing in [0.0, 45.0, 180.0, 359.0] {
            assert_eq!(VincentyProjector.project(LAMONT, bearing, 0.0), Some(LAMONT));
        }
    }

    #[test]
    fn test_due_north_moves_latitude_only() {
        let dest = VincentyProjector.project(LAMONT, 0.0, 100.0).unwrap();
        // ~110.96 km per degree of latitude at 36.6°N
        assert!((dest.latitude - LAMONT.latitude - 100.0 / 110_960.0).abs() < 2e-6);
        assert!((dest.longitude - LAMONT.longitude).abs() < 1e-12);
    }

    #[test]
    fn test_due_east_moves_longitude_only() {
        let dest = VincentyProjector.project(LAMONT, 90.0, 100.0).unwrap();
        // ~89.5 km per degree of longitude at 36.6°N
        let expected = 100.0 / (111_412.8 * LAMONT.latitude.to_radians().cos());
        assert!((dest.longitude - LAMONT.longitude - expected).abs() < 2e-6);
        assert!((dest.latitude - LAMONT.latitude).abs() < 1e-6);
    }

    #[test]
    fn test_long_line_reference() {
        // Flinders Peak to Buninyong (Vincenty 1975 / Geoscience Australia example)
        let flinders = Coordinate::new(-37.951_033_416_7, 144.424_867_888_9);
        let dest = VincentyProjector
            .project(flinders, 306.868_158_333_3, 54_972.271)
            .unwrap();
        assert!((dest.latitude - -37.652_821_138_9).abs() < 1e-7);
        assert!((dest.longitude - 143.926_495_527_8).abs() < 1e-7);
    }

    #[test]
    fn test_rejects_out_of_range_bearing() {
        assert_eq!(VincentyProjector.project(LAMONT, 360.0, 100.0), None);
        assert_eq!(VincentyProjector.project(LAMONT, f64::NAN, 100.0), None);
        assert_eq!(VincentyProjector.project(LAMONT, 90.0, f64::NAN), None);
    }
}
