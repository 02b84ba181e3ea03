//! Attribution pipeline: projection, fetch QC and classification per sample.

use futures::StreamExt;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FailureCounter, PipelineSettings};
use crate::classifier::CropClassifier;
use crate::geodesy::GeodesicProjector;
use crate::sectors::{Sector, SectorTable};
use crate::types::{
    AttributedSample, AttributedSeries, Coordinate, CropLabel, FetchQc, Sample, SiteKey,
};

// ============================================================================
// Outcome types
// ============================================================================

/// Why a batch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// Every sample was processed
    Completed,
    /// The cancellation token fired
    Cancelled,
    /// The batch deadline elapsed
    DeadlineExceeded,
    /// Too many classifier failures in a row
    FailureThreshold { consecutive: u32 },
}

impl Termination {
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "batch deadline exceeded"),
            Self::FailureThreshold { consecutive } => {
                write!(f, "stopped after {consecutive} consecutive classifier failures")
            }
        }
    }
}

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Samples handed to `run`
    pub submitted: usize,
    /// Samples present in the output series
    pub samples: usize,
    /// Samples with a defined crop label
    pub classified: usize,
    /// Samples whose label is undefined, for any reason
    pub undefined: usize,
    /// Classifier errors and timeouts
    pub gateway_failures: usize,
    /// Samples whose bearing was missing or could not be projected
    pub invalid_bearings: usize,
    /// Samples flagged insufficient fetch
    pub insufficient_fetch: usize,
}

impl BatchStats {
    fn record(&mut self, entry: &AttributedSample) {
        self.samples += 1;
        if entry.classification.is_defined() {
            self.classified += 1;
        } else {
            self.undefined += 1;
        }
        if entry.gateway_failed {
            self.gateway_failures += 1;
        }
        if entry.destination.is_none() {
            self.invalid_bearings += 1;
        }
        if !entry.fetch_qc.is_sufficient() {
            self.insufficient_fetch += 1;
        }
    }
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} samples, {} classified, {} undefined ({} gateway failures, {} invalid bearings), {} insufficient fetch",
            self.samples,
            self.submitted,
            self.classified,
            self.undefined,
            self.gateway_failures,
            self.invalid_bearings,
            self.insufficient_fetch
        )
    }
}

/// Result of `AttributionPipeline::run`.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Attributed samples in input order; a prefix when the batch stopped early
    pub series: AttributedSeries,
    pub stats: BatchStats,
    pub termination: Termination,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Phase-1 output for one sample.
struct Prepared {
    sample: Sample,
    destination: Option<Coordinate>,
    fetch_qc: FetchQc,
}

/// Attributes samples of one site.
///
/// The sector list is resolved once at construction; projector and
/// classifier are shared capabilities so either can be swapped in tests.
pub struct AttributionPipeline {
    site: SiteKey,
    sectors: Vec<Sector>,
    projector: Arc<dyn GeodesicProjector>,
    classifier: Arc<dyn CropClassifier>,
    settings: PipelineSettings,
    failures: FailureCounter,
}

impl AttributionPipeline {
    pub fn new(
        site: SiteKey,
        table: &SectorTable,
        projector: Arc<dyn GeodesicProjector>,
        classifier: Arc<dyn CropClassifier>,
        settings: PipelineSettings,
    ) -> Self {
        let sectors = table.get(&site).to_vec();
        if sectors.is_empty() {
            warn!(
                site = %site,
                "No fetch sectors configured for site, every sample will be flagged insufficient"
            );
        }
        Self {
            site,
            sectors,
            projector,
            classifier,
            settings,
            failures: FailureCounter::new(),
        }
    }

    pub fn site(&self) -> &SiteKey {
        &self.site
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Handle to the cumulative classifier failure count.
    pub fn failures(&self) -> FailureCounter {
        self.failures.clone()
    }

    /// Attribute `samples`, stopping early on cancellation, the batch
    /// deadline or the consecutive-failure limit.
    pub async fn run(&self, samples: Vec<Sample>, cancel: &CancellationToken) -> BatchOutcome {
        let submitted = samples.len();
        info!(
            site = %self.site,
            samples = submitted,
            sectors = self.sectors.len(),
            projector = self.projector.name(),
            classifier = self.classifier.name(),
            distance_m = self.settings.distance_m,
            "Starting attribution batch"
        );

        let prepared = self.prepare(samples, cancel).await;

        let results = futures::stream::iter(prepared.into_iter().map(|p| {
            attribute(
                Arc::clone(&self.classifier),
                self.failures.clone(),
                self.settings.call_timeout,
                p,
            )
        }))
        .buffered(self.settings.max_concurrency.max(1));
        tokio::pin!(results);

        let deadline = self.settings.batch_deadline;
        let deadline_elapsed = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_elapsed);

        let mut entries = Vec::with_capacity(submitted);
        let mut stats = BatchStats { submitted, ..BatchStats::default() };
        let mut consecutive = 0u32;

        let termination = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Termination::Cancelled,
                _ = &mut deadline_elapsed => break Termination::DeadlineExceeded,
                next = results.next() => {
                    let Some(entry) = next else {
                        break Termination::Completed;
                    };

                    if entry.gateway_failed {
                        consecutive += 1;
                    } else if entry.destination.is_some() {
                        consecutive = 0;
                    }
                    stats.record(&entry);
                    entries.push(entry);

                    if let Some(limit) = self.settings.max_consecutive_failures {
                        if consecutive >= limit {
                            break Termination::FailureThreshold { consecutive };
                        }
                    }
                }
            }
        };

        if termination.is_complete() {
            info!(site = %self.site, %stats, "Attribution batch complete");
        } else {
            warn!(
                site = %self.site,
                reason = %termination,
                processed = stats.samples,
                submitted,
                "Attribution batch stopped early, keeping processed prefix"
            );
        }

        BatchOutcome {
            series: AttributedSeries::new(self.site.clone(), entries),
            stats,
            termination,
        }
    }

    /// Phase 1: destination and fetch QC for every sample, data-parallel.
    ///
    /// Runs on the blocking pool; a cancellation during the pre-pass
    /// yields nothing to classify.
    async fn prepare(&self, samples: Vec<Sample>, cancel: &CancellationToken) -> Vec<Prepared> {
        let projector = Arc::clone(&self.projector);
        let sectors = self.sectors.clone();
        let distance_m = self.settings.distance_m;
        let task = tokio::task::spawn_blocking(move || {
            prepare_all(samples, &*projector, &sectors, distance_m)
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(site = %self.site, "Cancelled during projection pre-pass");
                Vec::new()
            }
            joined = task => match joined {
                Ok(prepared) => prepared,
                Err(e) => match e.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(e) => {
                        warn!(site = %self.site, error = %e, "Projection pre-pass did not finish");
                        Vec::new()
                    }
                },
            },
        }
    }
}

/// Destination and fetch QC for each sample, in input order.
///
/// QC uses the raw bearing, so it is evaluated even when the projection
/// fails.
fn prepare_all(
    samples: Vec<Sample>,
    projector: &dyn GeodesicProjector,
    sectors: &[Sector],
    distance_m: f64,
) -> Vec<Prepared> {
    samples
        .into_par_iter()
        .map(|sample| {
            let bearing = sample.bearing();
            let destination = bearing.and_then(|b| projector.project(sample.origin, b, distance_m));
            let fetch_qc = FetchQc::evaluate(bearing, sectors);
            Prepared { sample, destination, fetch_qc }
        })
        .collect()
}

/// Phase 2 for one sample: classify the destination, degrading any error
/// or timeout to `Undefined`.
async fn attribute(
    classifier: Arc<dyn CropClassifier>,
    failures: FailureCounter,
    call_timeout: Duration,
    prepared: Prepared,
) -> AttributedSample {
    let Prepared { sample, destination, fetch_qc } = prepared;

    let (classification, gateway_failed) = match destination {
        None => {
            debug!(time = %sample.timestamp, "No destination, skipping classification");
            (CropLabel::Undefined, false)
        }
        Some(dest) => {
            match tokio::time::timeout(call_timeout, classifier.classify(dest, sample.year())).await
            {
                Ok(Ok(label)) => (label, false),
                Ok(Err(e)) => {
                    let total = failures.increment();
                    warn!(
                        time = %sample.timestamp,
                        destination = %dest,
                        error = %e,
                        total_failures = total,
                        "Classification failed, recording undefined"
                    );
                    (CropLabel::Undefined, true)
                }
                Err(_) => {
                    let total = failures.increment();
                    warn!(
                        time = %sample.timestamp,
                        destination = %dest,
                        timeout_ms = call_timeout.as_millis() as u64,
                        total_failures = total,
                        "Classification timed out, recording undefined"
                    );
                    (CropLabel::Undefined, true)
                }
            }
        }
    };

    AttributedSample {
        sample,
        destination,
        classification,
        fetch_qc,
        gateway_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{GatewayError, Unclassified};
    use crate::geodesy::VincentyProjector;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    const LAMONT: Coordinate = Coordinate::new(36.605_8, -97.488_8);

    /// Answers by year: 2017 hangs, 2016 fails, other years get `label`.
    struct ByYear {
        label: &'static str,
    }

    #[async_trait]
    impl CropClassifier for ByYear {
        async fn classify(&self, _coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError> {
            match year {
                2017 => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(CropLabel::known("late"))
                }
                2016 => Err(GatewayError::Status(503)),
                _ => Ok(CropLabel::known(self.label)),
            }
        }

        fn name(&self) -> &str {
            "by-year"
        }
    }

    /// Earlier years answer later, so completions arrive out of order.
    struct Staggered;

    #[async_trait]
    impl CropClassifier for Staggered {
        async fn classify(&self, _coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError> {
            let delay = (2030 - year).max(0) as u64 * 10;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(CropLabel::known(&format!("crop-{year}")))
        }

        fn name(&self) -> &str {
            "staggered"
        }
    }

    fn sample(year: i32, bearing: Option<f64>) -> Sample {
        let t = Utc.with_ymd_and_hms(year, 7, 1, 12, 0, 0).unwrap();
        Sample::new(t, LAMONT, bearing)
    }

    fn pipeline(facility: &str, classifier: Arc<dyn CropClassifier>, settings: PipelineSettings) -> AttributionPipeline {
        AttributionPipeline::new(
            SiteKey::new("sgp", facility),
            &SectorTable::builtin().unwrap(),
            Arc::new(VincentyProjector),
            classifier,
            settings,
        )
    }

    fn quick_settings() -> PipelineSettings {
        PipelineSettings {
            call_timeout: Duration::from_millis(100),
            ..PipelineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_e14_bearings() {
        let p = pipeline("E14", Arc::new(ByYear { label: "Alfalfa" }), quick_settings());
        let samples = vec![
            sample(2018, Some(40.0)),
            sample(2018, Some(100.0)),
            sample(2018, Some(360.0)),
            sample(2018, None),
            sample(2018, Some(f64::NAN)),
        ];
        let outcome = p.run(samples, &CancellationToken::new()).await;
        let entries = outcome.series.entries();

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(entries.len(), 5);

        assert_eq!(entries[0].fetch_qc, FetchQc::Sufficient);
        assert_eq!(entries[0].classification, CropLabel::known("Alfalfa"));
        assert_eq!(entries[1].fetch_qc, FetchQc::Insufficient);
        assert_eq!(entries[1].classification, CropLabel::known("Alfalfa"));

        // 360 is inside [352, 360] but cannot be projected
        assert_eq!(entries[2].fetch_qc, FetchQc::Sufficient);
        assert_eq!(entries[2].destination, None);
        assert_eq!(entries[2].classification, CropLabel::Undefined);
        assert!(!entries[2].gateway_failed);

        for e in &entries[3..] {
            assert_eq!(e.fetch_qc, FetchQc::Insufficient);
            assert_eq!(e.classification, CropLabel::Undefined);
        }

        assert_eq!(outcome.stats.classified, 2);
        assert_eq!(outcome.stats.undefined, 3);
        assert_eq!(outcome.stats.invalid_bearings, 3);
        assert_eq!(outcome.stats.insufficient_fetch, 3);
        assert_eq!(outcome.stats.gateway_failures, 0);
    }

    #[tokio::test]
    async fn test_destination_is_upwind_point() {
        let p = pipeline("E14", Arc::new(Unclassified), quick_settings());
        let outcome = p.run(vec![sample(2018, Some(0.0))], &CancellationToken::new()).await;
        let dest = outcome.series.entries()[0].destination.unwrap();
        assert!(dest.latitude > LAMONT.latitude);
        assert!((dest.longitude - LAMONT.longitude).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_site_flags_everything_insufficient() {
        let p = pipeline("E99", Arc::new(ByYear { label: "Alfalfa" }), quick_settings());
        assert!(p.sectors().is_empty());
        let outcome = p
            .run(vec![sample(2018, Some(40.0)), sample(2018, Some(200.0))], &CancellationToken::new())
            .await;
        for e in outcome.series.iter() {
            assert_eq!(e.fetch_qc, FetchQc::Insufficient);
            assert_eq!(e.classification, CropLabel::known("Alfalfa"));
        }
    }

    #[tokio::test]
    async fn test_timeout_degrades_only_that_sample() {
        let p = pipeline("E14", Arc::new(ByYear { label: "Alfalfa" }), quick_settings());
        let failures = p.failures();
        let samples = vec![
            sample(2018, Some(40.0)),
            sample(2017, Some(40.0)),
            sample(2019, Some(40.0)),
        ];
        let outcome = p.run(samples, &CancellationToken::new()).await;
        let labels: Vec<_> = outcome.series.iter().map(|e| e.classification.clone()).collect();

        assert_eq!(
            labels,
            vec![CropLabel::known("Alfalfa"), CropLabel::Undefined, CropLabel::known("Alfalfa")]
        );
        assert!(outcome.series.entries()[1].gateway_failed);
        assert_eq!(failures.get(), 1);
        assert_eq!(outcome.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn test_gateway_error_degrades_to_undefined() {
        let p = pipeline("E14", Arc::new(ByYear { label: "Corn" }), quick_settings());
        let outcome = p
            .run(vec![sample(2016, Some(200.0)), sample(2018, Some(200.0))], &CancellationToken::new())
            .await;
        assert_eq!(outcome.series.entries()[0].classification, CropLabel::Undefined);
        assert_eq!(outcome.series.entries()[1].classification, CropLabel::known("Corn"));
        assert_eq!(outcome.stats.gateway_failures, 1);
        assert_eq!(p.failures().get(), 1);
    }

    #[tokio::test]
    async fn test_output_keeps_input_order() {
        let settings = PipelineSettings {
            call_timeout: Duration::from_secs(5),
            max_concurrency: 8,
            ..PipelineSettings::default()
        };
        let p = pipeline("E14", Arc::new(Staggered), settings);
        let years = [2010, 2015, 2020, 2011, 2025];
        let samples = years.iter().map(|&y| sample(y, Some(45.0))).collect();
        let outcome = p.run(samples, &CancellationToken::new()).await;

        let labels: Vec<String> = outcome.series.iter().map(|e| e.classification.to_string()).collect();
        let expected: Vec<String> = years.iter().map(|y| format!("crop-{y}")).collect();
        assert_eq!(labels, expected);
        let got_years: Vec<i32> = outcome.series.iter().map(|e| e.sample.year()).collect();
        assert_eq!(got_years, years);
    }

    #[tokio::test]
    async fn test_reordered_input_resorts_to_identical_series() {
        let settings = PipelineSettings {
            call_timeout: Duration::from_secs(5),
            max_concurrency: 8,
            ..PipelineSettings::default()
        };
        let p = pipeline("E14", Arc::new(Staggered), settings);
        let forward: Vec<Sample> = (0..24)
            .map(|i| sample(2000 + i, Some(f64::from(i) * 15.0)))
            .collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let in_order = p.run(forward, &CancellationToken::new()).await;
        let mut resorted = p.run(reversed, &CancellationToken::new()).await.series.into_entries();
        resorted.sort_by_key(|e| e.sample.timestamp);

        assert_eq!(in_order.series.into_entries(), resorted);
    }

    #[tokio::test]
    async fn test_classifier_answers_are_repeatable() {
        let dest = VincentyProjector.project(LAMONT, 100.0, 100.0).unwrap();
        for classifier in [&Staggered as &dyn CropClassifier, &ByYear { label: "Alfalfa" }] {
            let first = classifier.classify(dest, 2018).await.unwrap();
            let second = classifier.classify(dest, 2018).await.unwrap();
            assert_eq!(first, second, "{} changed its answer", classifier.name());
        }
    }

    /// Blocks its thread for `delay` on every projection.
    struct SlowProjector {
        delay: Duration,
    }

    impl GeodesicProjector for SlowProjector {
        fn project(&self, origin: Coordinate, bearing_deg: f64, distance_m: f64) -> Option<Coordinate> {
            std::thread::sleep(self.delay);
            VincentyProjector.project(origin, bearing_deg, distance_m)
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_cancel_observed_during_projection() {
        let p = AttributionPipeline::new(
            SiteKey::new("sgp", "E14"),
            &SectorTable::builtin().unwrap(),
            Arc::new(SlowProjector { delay: Duration::from_millis(600) }),
            Arc::new(Unclassified),
            quick_settings(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = p.run(vec![sample(2018, Some(100.0))], &cancel).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(outcome.series.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_yields_empty_prefix() {
        let p = pipeline("E14", Arc::new(Unclassified), quick_settings());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = p.run(vec![sample(2018, Some(40.0))], &cancel).await;
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(outcome.series.is_empty());
        assert_eq!(outcome.stats.submitted, 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_prefix() {
        let settings = PipelineSettings {
            call_timeout: Duration::from_secs(60),
            max_concurrency: 1,
            ..PipelineSettings::default()
        };
        let p = pipeline("E14", Arc::new(ByYear { label: "Alfalfa" }), settings);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let samples = vec![sample(2018, Some(40.0)), sample(2017, Some(40.0)), sample(2018, Some(40.0))];
        let outcome = p.run(samples, &cancel).await;
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.series.len(), 1);
        assert_eq!(outcome.series.entries()[0].classification, CropLabel::known("Alfalfa"));
    }

    #[tokio::test]
    async fn test_batch_deadline() {
        let settings = PipelineSettings {
            call_timeout: Duration::from_secs(60),
            batch_deadline: Some(Duration::from_millis(50)),
            ..PipelineSettings::default()
        };
        let p = pipeline("E14", Arc::new(ByYear { label: "Alfalfa" }), settings);
        let outcome = p
            .run(vec![sample(2018, Some(40.0)), sample(2017, Some(40.0))], &CancellationToken::new())
            .await;
        assert_eq!(outcome.termination, Termination::DeadlineExceeded);
        assert_eq!(outcome.series.len(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_failure_threshold() {
        let settings = PipelineSettings {
            max_consecutive_failures: Some(2),
            max_concurrency: 1,
            ..quick_settings()
        };
        let p = pipeline("E14", Arc::new(ByYear { label: "Alfalfa" }), settings);
        let samples = vec![
            sample(2016, Some(40.0)),
            sample(2018, Some(40.0)),
            sample(2016, Some(40.0)),
            sample(2016, Some(40.0)),
            sample(2018, Some(40.0)),
        ];
        let outcome = p.run(samples, &CancellationToken::new()).await;
        assert_eq!(outcome.termination, Termination::FailureThreshold { consecutive: 2 });
        assert_eq!(outcome.series.len(), 4);
        assert_eq!(outcome.stats.gateway_failures, 3);
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(Termination::Completed.to_string(), "completed");
        assert_eq!(
            Termination::FailureThreshold { consecutive: 3 }.to_string(),
            "stopped after 3 consecutive classifier failures"
        );
    }
}
