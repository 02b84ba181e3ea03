//! Pipeline Regression Tests
//!
//! Runs sample files through ingestion, attribution, aggregation and report
//! output with a stub classifier standing in for the CropScape service.

use async_trait::async_trait;
use fluxfetch::aggregation::{crop_breakdown, describe, good_fetch, subset};
use fluxfetch::classifier::{CachedClassifier, CropClassifier, GatewayError};
use fluxfetch::config::InputConfig;
use fluxfetch::ingest::load_samples;
use fluxfetch::pipeline::{exclude_upstream_bad, AttributionPipeline, PipelineSettings, Termination};
use fluxfetch::report::{write_series_csv, BatchSummary};
use fluxfetch::sectors::SectorTable;
use fluxfetch::types::{Coordinate, CropLabel, FetchQc, SiteKey};
use fluxfetch::{SphericalProjector, VincentyProjector};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LAMONT: Coordinate = Coordinate::new(36.605_8, -97.488_8);

/// Alfalfa east of the tower, pasture west of it; no coverage before 2008.
struct EastWest {
    calls: AtomicUsize,
}

#[async_trait]
impl CropClassifier for EastWest {
    async fn classify(&self, coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if year < 2008 {
            return Ok(CropLabel::Undefined);
        }
        if coord.longitude > LAMONT.longitude {
            Ok(CropLabel::known("Alfalfa"))
        } else {
            Ok(CropLabel::known("Grassland/Pasture"))
        }
    }

    fn name(&self) -> &str {
        "east-west"
    }
}

fn write_samples(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("sgp30ecorE14.csv");
    std::fs::write(
        &path,
        "time,wind_dir,co2_flux,qc_wind_dir\n\
         2018-06-01 00:00:00,40.0,-4.0,0\n\
         2018-06-01 00:30:00,100.0,-2.0,0\n\
         2018-06-01 01:00:00,200.0,1.0,0\n\
         2018-06-01 01:30:00,300.0,3.0,0\n\
         2018-06-01 02:00:00,355.0,-6.0,0\n\
         2018-06-01 02:30:00,-9999,0.5,0\n\
         2018-06-01 03:00:00,60.0,99.0,1\n\
         2007-06-01 00:00:00,60.0,-1.0,0\n",
    )
    .unwrap();
    path
}

fn input_config() -> InputConfig {
    InputConfig {
        upstream_qc_column: Some("qc_wind_dir".to_string()),
        ..InputConfig::default()
    }
}

#[tokio::test]
async fn e14_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_samples(&dir);

    let loaded = load_samples(&path, &input_config(), Some(LAMONT)).unwrap();
    assert_eq!(loaded.samples.len(), 8);
    let samples = exclude_upstream_bad(loaded.samples);
    assert_eq!(samples.len(), 7);

    let classifier = Arc::new(EastWest { calls: AtomicUsize::new(0) });
    let pipeline = AttributionPipeline::new(
        SiteKey::new("SGP", "e14"),
        &SectorTable::builtin().unwrap(),
        Arc::new(VincentyProjector),
        classifier.clone(),
        PipelineSettings::default(),
    );
    let outcome = pipeline.run(samples, &CancellationToken::new()).await;
    assert_eq!(outcome.termination, Termination::Completed);

    let flags: Vec<u8> = outcome.series.iter().map(|e| e.fetch_qc.as_flag()).collect();
    assert_eq!(flags, vec![0, 1, 0, 1, 0, 1, 0]);

    let labels: Vec<String> = outcome.series.iter().map(|e| e.classification.to_string()).collect();
    assert_eq!(
        labels,
        vec![
            "Alfalfa",
            "Alfalfa",
            "Grassland/Pasture",
            "Grassland/Pasture",
            "Grassland/Pasture",
            "undefined",
            "undefined",
        ]
    );
    // Missing bearing never reaches the classifier
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 6);
    assert_eq!(outcome.stats.invalid_bearings, 1);
    assert_eq!(pipeline.failures().get(), 0);

    let alfalfa = describe(&subset(&outcome.series, "Alfalfa"), "co2_flux").unwrap();
    assert_eq!(alfalfa.count, 2);
    assert_eq!(alfalfa.mean, -3.0);

    let good = describe(&good_fetch(&outcome.series), "co2_flux").unwrap();
    assert_eq!(good.count, 4);
    assert_eq!(good.min, -6.0);

    let breakdown = crop_breakdown(&outcome.series);
    assert_eq!(breakdown.undefined, 2);
    assert_eq!(breakdown.crops[0].label, "Grassland/Pasture");

    let out = dir.path().join("attributed.csv");
    write_series_csv(&out, &outcome.series, &["co2_flux".to_string()]).unwrap();
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written.lines().count(), 8);

    let summary = BatchSummary::build(&outcome, &["co2_flux".to_string()]);
    let json = summary.to_json().unwrap();
    assert!(json.contains("\"site\": \"sgp/E14\""));
}

#[tokio::test]
async fn unknown_site_flags_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_samples(&write_samples(&dir), &input_config(), Some(LAMONT)).unwrap();

    let pipeline = AttributionPipeline::new(
        SiteKey::new("sgp", "E99"),
        &SectorTable::builtin().unwrap(),
        Arc::new(SphericalProjector),
        Arc::new(EastWest { calls: AtomicUsize::new(0) }),
        PipelineSettings::default(),
    );
    let outcome = pipeline.run(loaded.samples, &CancellationToken::new()).await;
    assert!(outcome.series.iter().all(|e| e.fetch_qc == FetchQc::Insufficient));
    assert!(good_fetch(&outcome.series).is_empty());
    assert_eq!(outcome.stats.insufficient_fetch, outcome.stats.samples);
}

#[tokio::test]
async fn cache_collapses_repeated_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_samples(&write_samples(&dir), &input_config(), Some(LAMONT)).unwrap();
    let mut samples = loaded.samples;
    let repeat = samples.clone();
    samples.extend(repeat);

    let cached = Arc::new(CachedClassifier::new(EastWest { calls: AtomicUsize::new(0) }, 4));
    let settings = PipelineSettings { max_concurrency: 1, ..PipelineSettings::default() };
    let pipeline = AttributionPipeline::new(
        SiteKey::new("sgp", "E14"),
        &SectorTable::builtin().unwrap(),
        Arc::new(VincentyProjector),
        cached.clone(),
        settings,
    );
    let outcome = pipeline.run(samples, &CancellationToken::new()).await;
    assert_eq!(outcome.series.len(), 16);

    let stats = cached.stats().await;
    assert_eq!(stats.misses, 7);
    assert_eq!(stats.hits, 7);
    assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 7);
}
