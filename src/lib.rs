//! fluxfetch: fetch-direction QC and crop attribution for flux observations
//!
//! For every measurement epoch of an eddy-covariance site, decide whether
//! the wind came over the surface the instrument is meant to sample and
//! which crop grows upwind.
//!
//! ## Architecture
//!
//! - **Sector Table** (`sectors`): per-site list of good-fetch azimuth intervals
//! - **Geodesic Projector** (`geodesy`): bearing + distance → upwind coordinate
//! - **Crop Classifier Gateway** (`classifier`): coordinate + year → crop label
//! - **Fetch QC Evaluator** (`qc`): bearing vs. sectors → sufficient/insufficient
//! - **Attribution Pipeline** (`pipeline`): orchestrates the above over a batch
//! - **Aggregation** (`aggregation`): crop/QC subsets and descriptive statistics

pub mod config;
pub mod types;
pub mod sectors;
pub mod geodesy;
pub mod classifier;
pub mod qc;
pub mod pipeline;
pub mod aggregation;
pub mod ingest;
pub mod report;

// Re-export run configuration
pub use config::FetchConfig;

// Re-export commonly used types
pub use types::{
    AttributedSample, AttributedSeries, Coordinate, CropLabel, FetchQc, Sample, SiteKey,
    UpstreamAssessment,
};

// Re-export the pipeline components
pub use sectors::{Sector, SectorError, SectorTable};
pub use geodesy::{GeodesicProjector, ProjectionMethod, SphericalProjector, VincentyProjector};
pub use classifier::{CachedClassifier, CropClassifier, CropScapeClient, GatewayError, Unclassified};
pub use qc::in_good_fetch;
pub use pipeline::{
    exclude_upstream_bad, AttributionPipeline, BatchOutcome, BatchStats, FailureCounter,
    PipelineSettings, Termination,
};
pub use aggregation::{crop_breakdown, describe, describe_by_crop, good_fetch, subset, Description};
