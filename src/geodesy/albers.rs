//! Albers equal-area conic projection (ellipsoidal forward form).
//!
//! The CropScape service addresses its rasters in CONUS Albers
//! (EPSG:5070: NAD83 / GRS 80, standard parallels 29.5° and 45.5°,
//! latitude of origin 23°N, central meridian 96°W, no false easting or
//! northing). Formulas follow Snyder, *Map Projections: A Working Manual*
//! (USGS PP 1395), §14.

use serde::Serialize;

use crate::types::Coordinate;

/// GRS 80 semi-major axis (m)
const GRS80_A: f64 = 6_378_137.0;
/// GRS 80 flattening
const GRS80_F: f64 = 1.0 / 298.257_222_101;

/// Projected easting/northing in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlbersPoint {
    pub x: f64,
    pub y: f64,
}

/// Precomputed constants for one Albers parameterisation.
#[derive(Debug, Clone, Copy)]
struct AlbersConic {
    a: f64,
    e: f64,
    e_sq: f64,
    lon0: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl AlbersConic {
    /// Parallels and origin in degrees.
    fn new(a: f64, e_sq: f64, lat1: f64, lat2: f64, lat0: f64, lon0: f64) -> Self {
        let e = e_sq.sqrt();
        let q = |lat: f64| authalic_q(lat.to_radians(), e, e_sq);
        let m = |lat: f64| {
            let (sin, cos) = lat.to_radians().sin_cos();
            cos / (1.0 - e_sq * sin * sin).sqrt()
        };

        let (m1, m2) = (m(lat1), m(lat2));
        let (q1, q2, q0) = (q(lat1), q(lat2), q(lat0));
        let n = (m1 * m1 - m2 * m2) / (q2 - q1);
        let c = m1 * m1 + n * q1;
        let rho0 = a * (c - n * q0).sqrt() / n;

        Self {
            a,
            e,
            e_sq,
            lon0,
            n,
            c,
            rho0,
        }
    }

    fn conus() -> Self {
        let e_sq = 2.0 * GRS80_F - GRS80_F * GRS80_F;
        Self::new(GRS80_A, e_sq, 29.5, 45.5, 23.0, -96.0)
    }

    fn forward(&self, coord: Coordinate) -> AlbersPoint {
        let q = authalic_q(coord.latitude.to_radians(), self.e, self.e_sq);
        let rho = self.a * (self.c - self.n * q).sqrt() / self.n;
        let theta = self.n * (coord.longitude - self.lon0).to_radians();
        AlbersPoint {
            x: rho * theta.sin(),
            y: self.rho0 - rho * theta.cos(),
        }
    }
}

/// Snyder eq. 3-12.
fn authalic_q(phi: f64, e: f64, e_sq: f64) -> f64 {
    let sin = phi.sin();
    (1.0 - e_sq)
        * (sin / (1.0 - e_sq * sin * sin)
            - (1.0 / (2.0 * e)) * ((1.0 - e * sin) / (1.0 + e * sin)).ln())
}

/// Project a geographic coordinate into CONUS Albers metres.
///
/// Returns `None` for invalid coordinates.
pub fn to_conus_albers(coord: Coordinate) -> Option<AlbersPoint> {
    if !coord.is_valid() {
        return None;
    }
    let point = AlbersConic::conus().forward(coord);
    (point.x.is_finite() && point.y.is_finite()).then_some(point)
}
