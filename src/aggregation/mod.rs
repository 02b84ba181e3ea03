//! Aggregation/Filter Layer
//!
//! Derived, read-only views over an `AttributedSeries`: crop-conditioned
//! and QC-conditioned subsets, descriptive statistics of a named variable,
//! and the share of samples per crop. Nothing here mutates the input.
//!
//! Label matching is exact and case-sensitive. Undefined samples never
//! belong to a label subset but stay in the `all` view.

use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Median, Min};
use std::collections::{BTreeMap, HashMap};

use crate::types::{AttributedSample, AttributedSeries, CropLabel};

// ============================================================================
// Subsets
// ============================================================================

fn filtered(series: &AttributedSeries, keep: impl Fn(&AttributedSample) -> bool) -> AttributedSeries {
    let entries = series.iter().filter(|e| keep(*e)).cloned().collect();
    AttributedSeries::new(series.site().clone(), entries)
}

/// Samples classified exactly as `label`.
pub fn subset(series: &AttributedSeries, label: &str) -> AttributedSeries {
    filtered(series, |e| e.classification.matches(label))
}

/// Every sample, undefined classifications included.
pub fn all(series: &AttributedSeries) -> AttributedSeries {
    series.clone()
}

/// Samples whose bearing lies in a good-fetch sector.
pub fn good_fetch(series: &AttributedSeries) -> AttributedSeries {
    filtered(series, |e| e.fetch_qc.is_sufficient())
}

// ============================================================================
// Descriptive statistics
// ============================================================================

/// Summary of one numeric variable over a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Description {
    pub variable: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; `None` with fewer than two values
    pub std_dev: Option<f64>,
}

/// Describe `variable` over the finite values present in `series`.
///
/// Returns `None` when no sample carries a finite value for it.
pub fn describe(series: &AttributedSeries, variable: &str) -> Option<Description> {
    let values: Vec<f64> = series
        .iter()
        .filter_map(|e| e.sample.variable(variable))
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let data = Data::new(values);
    let mean = Distribution::mean(&data)?;
    let std_dev = if count > 1 {
        Distribution::std_dev(&data).filter(|s| s.is_finite())
    } else {
        None
    };

    Some(Description {
        variable: variable.to_string(),
        count,
        min: Min::min(&data),
        max: Max::max(&data),
        mean,
        median: Median::median(&data),
        std_dev,
    })
}

/// `describe` applied to each defined crop's subset.
pub fn describe_by_crop(series: &AttributedSeries, variable: &str) -> BTreeMap<String, Description> {
    let mut labels: Vec<&str> = series
        .iter()
        .filter_map(|e| match &e.classification {
            CropLabel::Known(label) => Some(label.as_str()),
            CropLabel::Undefined => None,
        })
        .collect();
    labels.sort_unstable();
    labels.dedup();

    labels
        .into_iter()
        .filter_map(|label| {
            describe(&subset(series, label), variable).map(|d| (label.to_string(), d))
        })
        .collect()
}

// ============================================================================
// Crop breakdown
// ============================================================================

/// Number and fraction of samples carrying one label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropShare {
    pub label: String,
    pub count: usize,
    pub fraction: f64,
}

/// Samples per crop label, with undefined counted on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropBreakdown {
    pub total: usize,
    pub undefined: usize,
    /// Defined labels, most frequent first
    pub crops: Vec<CropShare>,
}

impl CropBreakdown {
    pub fn share(&self, label: &str) -> Option<&CropShare> {
        self.crops.iter().find(|c| c.label == label)
    }
}

pub fn crop_breakdown(series: &AttributedSeries) -> CropBreakdown {
    let total = series.len();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut undefined = 0;
    for entry in series {
        match &entry.classification {
            CropLabel::Known(label) => *counts.entry(label.as_str()).or_default() += 1,
            CropLabel::Undefined => undefined += 1,
        }
    }

    let fraction = |count: usize| if total == 0 { 0.0 } else { count as f64 / total as f64 };
    let mut crops: Vec<CropShare> = counts
        .into_iter()
        .map(|(label, count)| CropShare {
            label: label.to_string(),
            count,
            fraction: fraction(count),
        })
        .collect();
    crops.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));

    CropBreakdown { total, undefined, crops }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinate, FetchQc, Sample, SiteKey};
    use chrono::{TimeZone, Utc};

    fn entry(label: Option<&str>, qc: FetchQc, flux: Option<f64>) -> AttributedSample {
        let t = Utc.with_ymd_and_hms(2018, 7, 1, 0, 0, 0).unwrap();
        let mut sample = Sample::new(t, Coordinate::new(36.6, -97.5), Some(45.0));
        if let Some(v) = flux {
            sample = sample.with_variable("co2_flux", v);
        }
        AttributedSample {
            sample,
            destination: None,
            classification: label.map_or(CropLabel::Undefined, CropLabel::known),
            fetch_qc: qc,
            gateway_failed: false,
        }
    }

    fn series() -> AttributedSeries {
        use FetchQc::*;
        AttributedSeries::new(
            SiteKey::new("sgp", "E14"),
            vec![
                entry(Some("Alfalfa"), Sufficient, Some(1.0)),
                entry(Some("Winter Wheat"), Insufficient, Some(10.0)),
                entry(Some("Alfalfa"), Sufficient, Some(3.0)),
                entry(None, Sufficient, Some(100.0)),
                entry(Some("Alfalfa"), Insufficient, Some(f64::NAN)),
                entry(Some("alfalfa"), Sufficient, Some(7.0)),
            ],
        )
    }

    #[test]
    fn test_subset_is_exact_and_case_sensitive() {
        let s = series();
        assert_eq!(subset(&s, "Alfalfa").len(), 3);
        assert_eq!(subset(&s, "alfalfa").len(), 1);
        assert_eq!(subset(&s, "Wheat").len(), 0);
        assert_eq!(subset(&s, "Alfalfa").site(), s.site());
    }

    #[test]
    fn test_undefined_only_in_all_view() {
        let s = series();
        assert!(subset(&s, "undefined").is_empty());
        let everything = all(&s);
        assert_eq!(everything.len(), 6);
        assert_eq!(everything.entries()[3].classification, CropLabel::Undefined);
    }

    #[test]
    fn test_good_fetch_subset() {
        let good = good_fetch(&series());
        assert_eq!(good.len(), 4);
        assert!(good.iter().all(|e| e.fetch_qc == FetchQc::Sufficient));
    }

    #[test]
    fn test_describe_skips_non_finite() {
        let d = describe(&subset(&series(), "Alfalfa"), "co2_flux").unwrap();
        assert_eq!(d.count, 2);
        assert_eq!(d.min, 1.0);
        assert_eq!(d.max, 3.0);
        assert_eq!(d.mean, 2.0);
        assert_eq!(d.median, 2.0);
        assert!((d.std_dev.unwrap() - std::f64::consts::SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn test_describe_all_includes_undefined() {
        let d = describe(&all(&series()), "co2_flux").unwrap();
        assert_eq!(d.count, 5);
        assert_eq!(d.max, 100.0);
        assert_eq!(d.median, 7.0);
    }

    #[test]
    fn test_describe_missing_variable() {
        assert!(describe(&series(), "latent_heat").is_none());
        let single = describe(&subset(&series(), "Winter Wheat"), "co2_flux").unwrap();
        assert_eq!(single.count, 1);
        assert_eq!(single.std_dev, None);
    }

    #[test]
    fn test_describe_does_not_mutate() {
        let s = series();
        let labels = |s: &AttributedSeries| -> Vec<CropLabel> {
            s.iter().map(|e| e.classification.clone()).collect()
        };
        let before = labels(&s);
        let _ = describe(&s, "co2_flux");
        let _ = subset(&s, "Alfalfa");
        assert_eq!(s.len(), 6);
        assert_eq!(labels(&s), before);
    }

    #[test]
    fn test_describe_by_crop() {
        let by_crop = describe_by_crop(&series(), "co2_flux");
        let keys: Vec<&str> = by_crop.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Alfalfa", "Winter Wheat", "alfalfa"]);
        assert_eq!(by_crop["Alfalfa"].count, 2);
        assert_eq!(by_crop["Winter Wheat"].mean, 10.0);
    }

    #[test]
    fn test_crop_breakdown() {
        let b = crop_breakdown(&series());
        assert_eq!(b.total, 6);
        assert_eq!(b.undefined, 1);
        assert_eq!(b.crops[0].label, "Alfalfa");
        assert_eq!(b.crops[0].count, 3);
        assert!((b.crops[0].fraction - 0.5).abs() < 1e-12);
        assert_eq!(b.share("Winter Wheat").map(|c| c.count), Some(1));
        assert!(b.share("Corn").is_none());
    }

    #[test]
    fn test_crop_breakdown_empty_series() {
        let empty = AttributedSeries::new(SiteKey::new("sgp", "E14"), Vec::new());
        let b = crop_breakdown(&empty);
        assert_eq!(b.total, 0);
        assert!(b.crops.is_empty());
    }
}
