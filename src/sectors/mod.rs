//! Sector Table
//!
//! Maps a site (network, facility) to the azimuth sectors over which its
//! fetch is considered valid. Sector sets are data, loaded from a TOML
//! mapping file and validated once at startup:
//!
//! ```toml
//! [[site]]
//! network = "sgp"
//! facility = "E14"
//! sectors = [[129.0, 265.0], [352.0, 360.0], [0.0, 85.0]]
//! ```
//!
//! Intervals never wrap. Coverage through north is two intervals that meet
//! at 0/360. Overlap between intervals is allowed.
//!
//! ## Usage
//!
//! ```ignore
//! sectors::init_registry(SectorTable::load(path)?);
//! let e14 = sectors::sectors_for("sgp", "E14");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::types::SiteKey;

/// Built-in sector table, compiled into the binary.
const BUILTIN_SECTORS: &str = include_str!("../../config/sectors.toml");

// ============================================================================
// Sector
// ============================================================================

/// Closed azimuth interval `[start, end]` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub start: f64,
    pub end: f64,
}

impl Sector {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// The whole compass, `[0, 360]`.
    pub const fn full() -> Self {
        Self::new(0.0, 360.0)
    }

    /// Inclusive on both ends, no modular arithmetic.
    pub fn contains(&self, bearing: f64) -> bool {
        self.start <= bearing && bearing <= self.end
    }

    /// Why this interval is not usable, if it isn't.
    fn defect(&self) -> Option<&'static str> {
        if !self.start.is_finite() || !self.end.is_finite() {
            Some("bounds must be finite")
        } else if self.start < 0.0 || self.end > 360.0 {
            Some("bounds must lie within [0, 360]")
        } else if self.start > self.end {
            Some("start must not exceed end")
        } else {
            None
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SectorError {
    #[error("Sector table I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Sector table parse error ({origin}): {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Malformed sector #{index} {sector} for site {site}: {reason}")]
    Malformed {
        site: SiteKey,
        index: usize,
        sector: Sector,
        reason: &'static str,
    },
    #[error("Site {0} is listed more than once")]
    DuplicateSite(SiteKey),
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SectorFile {
    #[serde(default)]
    site: Vec<SiteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SiteEntry {
    network: String,
    facility: String,
    sectors: Vec<[f64; 2]>,
}

// ============================================================================
// Table
// ============================================================================

/// Read-only registry of valid fetch sectors, keyed by site.
#[derive(Debug, Clone, Default)]
pub struct SectorTable {
    sites: HashMap<SiteKey, Vec<Sector>>,
}

impl SectorTable {
    /// Parse and validate a sector table. `origin` names the source in errors.
    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, SectorError> {
        let file: SectorFile = toml::from_str(contents).map_err(|source| SectorError::Parse {
            origin: origin.to_string(),
            source,
        })?;

        let mut sites = HashMap::with_capacity(file.site.len());
        for entry in file.site {
            let key = SiteKey::new(&entry.network, &entry.facility);
            let mut sectors = Vec::with_capacity(entry.sectors.len());
            for (index, [start, end]) in entry.sectors.into_iter().enumerate() {
                let sector = Sector::new(start, end);
                if let Some(reason) = sector.defect() {
                    return Err(SectorError::Malformed {
                        site: key,
                        index,
                        sector,
                        reason,
                    });
                }
                sectors.push(sector);
            }
            if sites.contains_key(&key) {
                return Err(SectorError::DuplicateSite(key));
            }
            sites.insert(key, sectors);
        }

        Ok(Self { sites })
    }

    /// Load a sector table from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SectorError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SectorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_toml_str(&contents, &path.display().to_string())?;
        info!(path = %path.display(), sites = table.len(), "Loaded sector table");
        Ok(table)
    }

    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self, SectorError> {
        Self::from_toml_str(BUILTIN_SECTORS, "builtin")
    }

    /// Sectors for a site; empty when the site is unknown.
    pub fn get(&self, key: &SiteKey) -> &[Sector] {
        self.sites.get(key).map_or(&[], Vec::as_slice)
    }

    /// Ordered sector list for `(network, facility)`; empty when unknown.
    pub fn sectors_for(&self, network: &str, facility: &str) -> Vec<Sector> {
        self.get(&SiteKey::new(network, facility)).to_vec()
    }

    pub fn contains_site(&self, key: &SiteKey) -> bool {
        self.sites.contains_key(key)
    }

    /// All sites, sorted by key.
    pub fn sites(&self) -> Vec<(&SiteKey, &[Sector])> {
        let mut sites: Vec<_> = self
            .sites
            .iter()
            .map(|(k, v)| (k, v.as_slice()))
            .collect();
        sites.sort_by(|a, b| a.0.cmp(b.0));
        sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

// ============================================================================
// Process-wide registry
// ============================================================================

static REGISTRY: OnceLock<SectorTable> = OnceLock::new();

/// Install the process-wide sector table.
///
/// Only the first call takes effect; returns `false` for later calls.
pub fn init_registry(table: SectorTable) -> bool {
    if REGISTRY.set(table).is_err() {
        warn!("sectors::init_registry() called more than once, ignoring");
        return false;
    }
    true
}

/// The process-wide sector table, falling back to the built-in one.
pub fn registry() -> &'static SectorTable {
    REGISTRY.get_or_init(|| {
        SectorTable::builtin().unwrap_or_else(|e| {
            error!(error = %e, "Built-in sector table is invalid, using an empty table");
            SectorTable::default()
        })
    })
}

/// Look up a site in the process-wide registry.
pub fn sectors_for(network: &str, facility: &str) -> Vec<Sector> {
    registry().sectors_for(network, facility)
}

// ============================================================================
// Tests
// ============================================================================
