//! Per-sample outcomes and the attributed series

use serde::{Deserialize, Serialize};

use super::{Coordinate, Sample, SiteKey};

/// Text used wherever an undefined classification is rendered.
pub const UNDEFINED_LABEL: &str = "undefined";

// ============================================================================
// Classification
// ============================================================================

/// Land-cover label for the upwind surface, or undefined when the bearing,
/// projection or classifier could not produce one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CropLabel {
    Known(String),
    #[default]
    Undefined,
}

impl CropLabel {
    /// Wrap a label returned by a classifier, kept verbatim. Blank text is
    /// undefined.
    pub fn known(label: &str) -> Self {
        if label.trim().is_empty() {
            Self::Undefined
        } else {
            Self::Known(label.to_string())
        }
    }

    pub const fn is_defined(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(label) => label,
            Self::Undefined => UNDEFINED_LABEL,
        }
    }

    /// Exact, case-sensitive match against a defined label.
    pub fn matches(&self, label: &str) -> bool {
        matches!(self, Self::Known(l) if l == label)
    }
}

impl std::fmt::Display for CropLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for CropLabel {
    fn from(s: String) -> Self {
        if s == UNDEFINED_LABEL {
            Self::Undefined
        } else {
            Self::known(&s)
        }
    }
}

impl From<CropLabel> for String {
    fn from(label: CropLabel) -> Self {
        match label {
            CropLabel::Known(l) => l,
            CropLabel::Undefined => UNDEFINED_LABEL.to_string(),
        }
    }
}

// ============================================================================
// Fetch QC flag
// ============================================================================

/// Binary fetch quality indicator.
///
/// Derived only from the bearing and the site's sectors; independent of
/// whether classification succeeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FetchQc {
    /// Bearing inside a known-good sector (flag 0)
    Sufficient,
    /// Bearing outside every sector, undefined, or no sectors known (flag 1)
    Insufficient,
}

impl FetchQc {
    pub const fn as_flag(self) -> u8 {
        match self {
            Self::Sufficient => 0,
            Self::Insufficient => 1,
        }
    }

    pub const fn is_sufficient(self) -> bool {
        matches!(self, Self::Sufficient)
    }
}

impl std::fmt::Display for FetchQc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sufficient => write!(f, "sufficient fetch"),
            Self::Insufficient => write!(f, "insufficient fetch"),
        }
    }
}

// ============================================================================
// Attributed output
// ============================================================================

/// A sample together with its classification and QC outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedSample {
    pub sample: Sample,
    /// Upwind point that was classified; `None` when the projection failed
    pub destination: Option<Coordinate>,
    pub classification: CropLabel,
    pub fetch_qc: FetchQc,
    /// The classifier errored or timed out for this sample
    pub gateway_failed: bool,
}

/// Ordered pipeline output for one site.
///
/// Entries keep the order of the input samples. Built once by the pipeline
/// (or derived by the aggregation layer) and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedSeries {
    site: SiteKey,
    entries: Vec<AttributedSample>,
}

impl AttributedSeries {
    pub fn new(site: SiteKey, entries: Vec<AttributedSample>) -> Self {
        Self { site, entries }
    }

    pub fn site(&self) -> &SiteKey {
        &self.site
    }

    pub fn entries(&self) -> &[AttributedSample] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttributedSample> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<AttributedSample> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a AttributedSeries {
    type Item = &'a AttributedSample;
    type IntoIter = std::slice::Iter<'a, AttributedSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
