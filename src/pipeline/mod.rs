//! Sample Attribution Pipeline
//!
//! ```text
//! samples ──► exclude_upstream_bad ──► AttributionPipeline::run
//!                                         │
//!                     PHASE 1 (rayon):    project bearing → destination
//!                                         evaluate fetch QC on raw bearing
//!                                         │
//!                     PHASE 2 (tokio):    classify destinations, bounded
//!                                         concurrency, per-call timeout
//!                                         │
//!                     PHASE 3:            re-assemble in input order
//!                                         ▼
//!                                    BatchOutcome { series, stats, termination }
//! ```
//!
//! A failed or timed-out classification never aborts the batch: the sample
//! is recorded as `Undefined` and the shared `FailureCounter` is bumped.
//! Cancellation, the batch deadline or the optional consecutive-failure
//! limit stop the batch early; the series returned is then the ordered
//! prefix processed so far.

mod attribution;

pub use attribution::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::FetchConfig;
use crate::types::{Sample, UpstreamAssessment};

// ============================================================================
// Settings
// ============================================================================

/// Execution policy for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Upwind footprint distance (m)
    pub distance_m: f64,
    /// Upper bound on one classifier call, retries included
    pub call_timeout: Duration,
    /// Upper bound on the whole batch
    pub batch_deadline: Option<Duration>,
    /// Classifier calls in flight at once
    pub max_concurrency: usize,
    /// Stop after this many consecutive classifier failures
    pub max_consecutive_failures: Option<u32>,
}

impl PipelineSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        let gateway = &config.gateway;

        // One request per attempt plus the doubling backoff between attempts
        let attempts = u64::from(gateway.retries.saturating_add(1));
        let backoff_total = gateway
            .retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(gateway.retries).saturating_sub(1));
        let call_ms = gateway
            .timeout_ms
            .saturating_mul(attempts)
            .saturating_add(backoff_total);

        Self {
            distance_m: config.projection.distance_m,
            call_timeout: Duration::from_millis(call_ms),
            batch_deadline: config.pipeline.batch_deadline_secs.map(Duration::from_secs),
            max_concurrency: config.pipeline.max_concurrency.max(1),
            max_consecutive_failures: config.pipeline.max_consecutive_failures,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

// ============================================================================
// Failure Counter
// ============================================================================

/// Cumulative count of classifier failures and timeouts.
///
/// Cloning yields another handle to the same count, so callers can keep one
/// while the pipeline runs.
#[derive(Debug, Clone, Default)]
pub struct FailureCounter(Arc<AtomicU64>);

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Upstream QC pass-through
// ============================================================================

/// Drop samples that upstream instrument QC already marked bad.
pub fn exclude_upstream_bad(samples: Vec<Sample>) -> Vec<Sample> {
    let before = samples.len();
    let kept: Vec<Sample> = samples
        .into_iter()
        .filter(|s| s.upstream != UpstreamAssessment::Bad)
        .collect();
    let dropped = before - kept.len();
    if dropped > 0 {
        info!(dropped, kept = kept.len(), "Excluded samples flagged bad by upstream QC");
    }
    kept
}
