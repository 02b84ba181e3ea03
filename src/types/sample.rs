//! Measurement epochs entering the attribution pipeline

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Coordinate;

/// Upstream instrument/VAP quality assessment carried by a sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum UpstreamAssessment {
    #[default]
    Good,
    Indeterminate,
    Bad,
}

impl UpstreamAssessment {
    /// Interpret an upstream QC cell.
    ///
    /// Text assessments are matched case-insensitively. Integer flags follow
    /// the bit-packed convention where 0 means no test tripped; any other
    /// value is treated as bad.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("bad") {
            return Self::Bad;
        }
        if raw.eq_ignore_ascii_case("indeterminate") {
            return Self::Indeterminate;
        }
        match raw.parse::<f64>() {
            Ok(v) if v != 0.0 => Self::Bad,
            _ => Self::Good,
        }
    }
}

/// One measurement epoch.
///
/// Created by the acquisition layer and never mutated once it enters the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Instrument location
    pub origin: Coordinate,
    /// Wind direction in compass degrees; `None` or NaN when not measured
    pub wind_direction: Option<f64>,
    #[serde(default)]
    pub upstream: UpstreamAssessment,
    /// Other numeric fields measured at this epoch (fluxes, met variables)
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, origin: Coordinate, wind_direction: Option<f64>) -> Self {
        Self {
            timestamp,
            origin,
            wind_direction,
            upstream: UpstreamAssessment::Good,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: &str, value: f64) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    pub fn with_upstream(mut self, upstream: UpstreamAssessment) -> Self {
        self.upstream = upstream;
        self
    }

    /// Wind direction with NaN folded into `None`.
    pub fn bearing(&self) -> Option<f64> {
        self.wind_direction.filter(|b| !b.is_nan())
    }

    /// Calendar year used to pick the land-cover layer.
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    pub fn variable(&self, name: &str) -> Option<f64> {
        self.variables.get(name).copied()
    }
}
