//! Fetch QC Evaluator
//!
//! A bearing has good fetch when it lies inside at least one of the site's
//! sectors. Intervals are compared as stored, inclusive on both ends, with
//! no wrap-around arithmetic: a site that is good "from 352° through 85°"
//! lists `[352, 360]` and `[0, 85]`.
//!
//! Undefined bearings and empty sector lists are never good.

use crate::sectors::Sector;
use crate::types::FetchQc;

/// True when `bearing` falls inside at least one sector.
pub fn in_good_fetch(bearing: Option<f64>, sectors: &[Sector]) -> bool {
    match bearing {
        Some(b) if !b.is_nan() => sectors.iter().any(|s| s.contains(b)),
        _ => false,
    }
}

impl FetchQc {
    /// Flag a bearing against a site's sector list.
    pub fn evaluate(bearing: Option<f64>, sectors: &[Sector]) -> Self {
        if in_good_fetch(bearing, sectors) {
            Self::Sufficient
        } else {
            Self::Insufficient
        }
    }
}
