//! Geodesic Projector
//!
//! Forward ("direct") geodesic: from an origin, a bearing and a distance to
//! the destination coordinate. Used to locate the upwind footprint point
//! that is sent to the land-cover classifier.
//!
//! - `vincenty`: Vincenty's direct solution on the WGS-84 ellipsoid (default)
//! - `spherical`: great-circle destination on a mean-radius sphere
//! - `albers`: CONUS Albers equal-area projection used to address CropScape
//!
//! Every implementation returns `None` instead of a NaN-laden coordinate when
//! its inputs are degenerate.

pub mod albers;
pub mod spherical;
pub mod vincenty;

pub use albers::{to_conus_albers, AlbersPoint};
pub use spherical::SphericalProjector;
pub use vincenty::VincentyProjector;

use serde::{Deserialize, Serialize};

use crate::types::Coordinate;

/// Forward geodesic capability.
pub trait GeodesicProjector: Send + Sync {
    /// Destination reached from `origin` after `distance_m` metres along
    /// `bearing_deg` (clockwise from true north).
    ///
    /// Returns `None` when the bearing is not a finite value in `[0, 360)`,
    /// the distance is negative or non-finite, or the origin is invalid.
    fn project(&self, origin: Coordinate, bearing_deg: f64, distance_m: f64) -> Option<Coordinate>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Which projector the pipeline uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMethod {
    #[default]
    Vincenty,
    Spherical,
}

impl ProjectionMethod {
    pub fn projector(self) -> Box<dyn GeodesicProjector> {
        match self {
            Self::Vincenty => Box::new(VincentyProjector),
            Self::Spherical => Box::new(SphericalProjector),
        }
    }
}

/// Shared input screening for all projectors.
fn accepts(origin: Coordinate, bearing_deg: f64, distance_m: f64) -> bool {
    bearing_deg.is_finite()
        && (0.0..360.0).contains(&bearing_deg)
        && distance_m.is_finite()
        && distance_m >= 0.0
        && origin.is_valid()
}

/// Wrap a longitude in degrees into `[-180, 180]`.
fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_bearing_range() {
        let origin = Coordinate::new(36.6, -97.5);
        assert!(accepts(origin, 0.0, 100.0));
        assert!(accepts(origin, 359.999, 100.0));
        assert!(!accepts(origin, 360.0, 100.0));
        assert!(!accepts(origin, -0.1, 100.0));
        assert!(!accepts(origin, f64::NAN, 100.0));
        assert!(!accepts(origin, f64::INFINITY, 100.0));
        assert!(!accepts(origin, 90.0, -1.0));
        assert!(!accepts(Coordinate::new(f64::NAN, 0.0), 90.0, 100.0));
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(-97.5), -97.5);
        assert!((wrap_longitude(181.0) - -179.0).abs() < 1e-12);
        assert!((wrap_longitude(-181.0) - 179.0).abs() < 1e-12);
        assert_eq!(wrap_longitude(180.0), 180.0);
    }

    #[test]
    fn test_method_selects_projector() {
        assert_eq!(ProjectionMethod::Vincenty.projector().name(), "vincenty");
        assert_eq!(ProjectionMethod::Spherical.projector().name(), "spherical");
        assert_eq!(ProjectionMethod::default(), ProjectionMethod::Vincenty);
    }
}
