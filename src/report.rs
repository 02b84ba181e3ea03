//! Batch output: attributed series as CSV and a JSON run summary.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregation::{self, CropBreakdown, Description};
use crate::classifier::cache::CacheStats;
use crate::pipeline::{BatchOutcome, BatchStats, Termination};
use crate::types::{AttributedSeries, Coordinate};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Series CSV
// ============================================================================

const SERIES_HEADER: [&str; 9] = [
    "time",
    "wind_direction",
    "latitude",
    "longitude",
    "fetch_latitude",
    "fetch_longitude",
    "crop",
    "fetch_qc",
    "gateway_failed",
];

/// Write one row per attributed sample, followed by the requested variables.
///
/// Missing values are written as empty fields.
pub fn write_series_csv(
    path: &Path,
    series: &AttributedSeries,
    variables: &[String],
) -> Result<(), ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);

    let header: Vec<String> = SERIES_HEADER
        .iter()
        .map(|h| (*h).to_string())
        .chain(variables.iter().map(|v| csv_escape(v)))
        .collect();
    writeln!(out, "{}", header.join(",")).map_err(io_err)?;

    for entry in series {
        let (fetch_lat, fetch_lon) = split_coordinate(entry.destination);
        let mut row = vec![
            entry.sample.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            optional(entry.sample.bearing()),
            entry.sample.origin.latitude.to_string(),
            entry.sample.origin.longitude.to_string(),
            fetch_lat,
            fetch_lon,
            csv_escape(entry.classification.as_str()),
            entry.fetch_qc.as_flag().to_string(),
            u8::from(entry.gateway_failed).to_string(),
        ];
        row.extend(variables.iter().map(|v| optional(entry.sample.variable(v))));
        writeln!(out, "{}", row.join(",")).map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;

    info!(file = %path.display(), rows = series.len(), "Attributed series written");
    Ok(())
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn split_coordinate(coord: Option<Coordinate>) -> (String, String) {
    match coord {
        Some(c) => (format!("{:.6}", c.latitude), format!("{:.6}", c.longitude)),
        None => (String::new(), String::new()),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ============================================================================
// JSON summary
// ============================================================================

/// Descriptions of one variable over the whole series, the good-fetch
/// subset and each defined crop.
#[derive(Debug, Clone, Serialize)]
pub struct VariableSummary {
    pub all: Option<Description>,
    pub good_fetch: Option<Description>,
    pub by_crop: BTreeMap<String, Description>,
}

/// Machine-readable summary of one attribution run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub site: String,
    pub generated_at: DateTime<Utc>,
    pub termination: Termination,
    pub stats: BatchStats,
    pub crops: CropBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub variables: BTreeMap<String, VariableSummary>,
}

impl BatchSummary {
    pub fn build(outcome: &BatchOutcome, variables: &[String]) -> Self {
        let series = &outcome.series;
        let good = aggregation::good_fetch(series);
        let variables = variables
            .iter()
            .map(|name| {
                let summary = VariableSummary {
                    all: aggregation::describe(series, name),
                    good_fetch: aggregation::describe(&good, name),
                    by_crop: aggregation::describe_by_crop(series, name),
                };
                (name.clone(), summary)
            })
            .collect();

        Self {
            site: series.site().to_string(),
            generated_at: Utc::now(),
            termination: outcome.termination,
            stats: outcome.stats,
            crops: aggregation::crop_breakdown(series),
            cache: None,
            variables,
        }
    }

    pub fn with_cache(mut self, cache: CacheStats) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(file = %path.display(), "Batch summary written");
        Ok(())
    }
}
