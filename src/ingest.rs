//! Sample ingestion from delimited text files
//!
//! Reads a header-led CSV (one row per measurement epoch) into `Sample`s.
//! Column names come from `InputConfig`; every other numeric column is kept
//! as a named variable for later description.
//!
//! ## Values
//!
//! Empty fields, `nan`/`null`/`-` and the configured missing-value sentinel
//! are treated as missing. A missing bearing leaves the sample's wind
//! direction undefined; a missing latitude/longitude falls back to the
//! site coordinate.
//!
//! ## Times
//!
//! RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]` (UTC
//! assumed) or epoch seconds. Rows whose time cannot be parsed are counted
//! and skipped.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::InputConfig;
use crate::types::{Coordinate, Sample, UpstreamAssessment};

/// Rows reported individually before warnings are suppressed.
const MAX_ROW_WARNINGS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is empty")]
    EmptyFile(PathBuf),
    #[error("{path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },
    #[error("{0} has no latitude/longitude columns and no site coordinate is configured")]
    NoOrigin(PathBuf),
}

/// Samples read from one file.
#[derive(Debug, Clone)]
pub struct LoadedSamples {
    pub source: PathBuf,
    pub samples: Vec<Sample>,
    /// Rows dropped for an unparseable time or unknown origin
    pub skipped_rows: usize,
}

/// Column positions resolved from the header.
#[derive(Debug)]
struct ColumnMap {
    time: usize,
    bearing: usize,
    latitude: Option<usize>,
    longitude: Option<usize>,
    upstream: Option<usize>,
    /// (index, name) of every other column
    variables: Vec<(usize, String)>,
}

impl ColumnMap {
    fn from_header(header: &str, config: &InputConfig, path: &Path) -> Result<Self, IngestError> {
        let names: Vec<String> = csv_split(header)
            .into_iter()
            .map(|n| n.trim().trim_start_matches('\u{feff}').to_string())
            .collect();
        let find = |column: &str| names.iter().position(|n| n.eq_ignore_ascii_case(column));
        let require = |column: &str| {
            find(column).ok_or_else(|| IngestError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            })
        };

        let time = require(&config.time_column)?;
        let bearing = require(&config.bearing_column)?;
        let latitude = find(&config.latitude_column);
        let longitude = find(&config.longitude_column);
        let upstream = match &config.upstream_qc_column {
            Some(column) => Some(require(column)?),
            None => None,
        };

        let reserved = [Some(time), Some(bearing), latitude, longitude, upstream];
        let variables = names
            .iter()
            .enumerate()
            .filter(|(i, n)| !n.is_empty() && !reserved.contains(&Some(*i)))
            .map(|(i, n)| (i, n.clone()))
            .collect();

        Ok(Self {
            time,
            bearing,
            latitude,
            longitude,
            upstream,
            variables,
        })
    }
}

/// Load samples from `path`.
///
/// `fallback_origin` is used for rows (or whole files) without a usable
/// latitude/longitude.
pub fn load_samples(
    path: &Path,
    config: &InputConfig,
    fallback_origin: Option<Coordinate>,
) -> Result<LoadedSamples, IngestError> {
    let io_err = |source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next()
        .ok_or_else(|| IngestError::EmptyFile(path.to_path_buf()))?
        .map_err(io_err)?;
    let columns = ColumnMap::from_header(&header, config, path)?;

    if (columns.latitude.is_none() || columns.longitude.is_none()) && fallback_origin.is_none() {
        return Err(IngestError::NoOrigin(path.to_path_buf()));
    }

    let mut samples = Vec::new();
    let mut skipped = 0usize;

    for (idx, line) in lines.enumerate() {
        let line_num = idx + 2;
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_row(&line, &columns, config, fallback_origin) {
            Ok(sample) => samples.push(sample),
            Err(reason) => {
                if skipped < MAX_ROW_WARNINGS {
                    warn!(file = %path.display(), line = line_num, reason = %reason, "Skipping row");
                }
                skipped += 1;
            }
        }
    }

    info!(
        file = %path.display(),
        samples = samples.len(),
        skipped,
        variables = columns.variables.len(),
        "Samples loaded"
    );

    Ok(LoadedSamples {
        source: path.to_path_buf(),
        samples,
        skipped_rows: skipped,
    })
}

fn parse_row(
    line: &str,
    columns: &ColumnMap,
    config: &InputConfig,
    fallback_origin: Option<Coordinate>,
) -> Result<Sample, String> {
    let fields = csv_split(line);
    let field = |idx: usize| fields.get(idx).map_or("", |s| s.as_str());
    let value = |idx: Option<usize>| idx.and_then(|i| parse_value(field(i), config.missing_value));

    let timestamp = parse_time(field(columns.time))?;

    let origin = match (value(columns.latitude), value(columns.longitude)) {
        (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
        _ => fallback_origin.ok_or_else(|| "no latitude/longitude".to_string())?,
    };

    let upstream = columns
        .upstream
        .map(|i| field(i).trim())
        .filter(|s| !s.is_empty())
        .map_or(UpstreamAssessment::Good, UpstreamAssessment::parse);

    let variables: BTreeMap<String, f64> = columns
        .variables
        .iter()
        .filter_map(|(i, name)| {
            parse_value(field(*i), config.missing_value).map(|v| (name.clone(), v))
        })
        .collect();

    Ok(Sample {
        timestamp,
        origin,
        wind_direction: value(Some(columns.bearing)),
        upstream,
        variables,
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Split a CSV line respecting double-quoted fields.
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Numeric field, or `None` when missing, non-numeric or the sentinel.
fn parse_value(raw: &str, missing_value: f64) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null") {
        return None;
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v != missing_value)
}

/// Parse the supported time formats into UTC.
fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Err("empty timestamp".to_string());
    }

    // Epoch seconds (milliseconds when implausibly large)
    if let Ok(epoch) = s.parse::<f64>() {
        if !epoch.is_finite() {
            return Err(format!("cannot parse timestamp: '{s}'"));
        }
        let secs = if epoch.abs() > 10_000_000_000.0 { epoch / 1000.0 } else { epoch };
        let whole = secs.floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (whole, nanos) = (whole as i64, ((secs - whole) * 1e9).round().min(999_999_999.0) as u32);
        return DateTime::from_timestamp(whole, nanos)
            .ok_or_else(|| format!("timestamp out of range: '{s}'"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    // Without timezone (assume UTC)
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc());
        }
    }

    Err(format!("cannot parse timestamp: '{s}'"))
}
