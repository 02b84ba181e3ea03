//! Crop Classifier Gateway
//!
//! The land-cover lookup is an external collaborator: given a coordinate
//! and a year it answers with a crop label. Missing coverage is an answer
//! (`CropLabel::Undefined`), not an error. Transport problems are errors,
//! and the pipeline degrades them to `Undefined` per sample.
//!
//! ## Implementations
//!
//! - `CropScapeClient`: USDA NASS Cropland Data Layer over HTTP
//! - `CachedClassifier`: memoises any classifier by (rounded coordinate, year)
//! - `Unclassified`: always `Undefined`, for QC-only runs

pub mod cache;
pub mod cropscape;

pub use cache::CachedClassifier;
pub use cropscape::CropScapeClient;

use async_trait::async_trait;

use crate::types::{Coordinate, CropLabel};

/// Classifier gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Classifier request timed out")]
    Timeout,
    #[error("Classifier rate limit reached")]
    RateLimited,
    #[error("Classifier returned status {0}")]
    Status(u16),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Classifier client error: {0}")]
    Client(String),
}

impl GatewayError {
    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited => true,
            Self::Status(code) => *code >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Client(_) => false,
        }
    }
}

/// Land-cover classification capability.
///
/// Implementations must be idempotent: identical `(coord, year)` inputs
/// yield the same label.
#[async_trait]
pub trait CropClassifier: Send + Sync {
    async fn classify(&self, coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Classifier that never produces a label.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unclassified;

#[async_trait]
impl CropClassifier for Unclassified {
    async fn classify(&self, _coord: Coordinate, _year: i32) -> Result<CropLabel, GatewayError> {
        Ok(CropLabel::Undefined)
    }

    fn name(&self) -> &str {
        "unclassified"
    }
}
