//! Checks on a `fluxfetch.toml` that go beyond deserialization.
//!
//! Keys under `[site]`, `[projection]`, `[gateway]`, `[pipeline]` and
//! `[input]` are compared with the fields `FetchConfig` knows. A misspelt
//! key is otherwise dropped silently by the serde defaults, so each unknown
//! one is reported with the closest known name. Implausible values (a
//! footprint distance of several kilometres, say) are warnings. Only
//! impossible ones, such as a non-finite missing-value sentinel, are errors.

use std::collections::HashSet;

use super::defaults::SUSPICIOUS_FETCH_DISTANCE_M;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for FetchConfig.
///
/// Maintained by hand to match the struct hierarchy in fetch_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [site]
        "site",
        "site.network",
        "site.facility",
        "site.latitude",
        "site.longitude",
        "site.sector_file",
        // [projection]
        "projection",
        "projection.distance_m",
        "projection.method",
        // [gateway]
        "gateway",
        "gateway.base_url",
        "gateway.timeout_ms",
        "gateway.retries",
        "gateway.retry_backoff_ms",
        "gateway.cache_precision",
        // [pipeline]
        "pipeline",
        "pipeline.max_concurrency",
        "pipeline.batch_deadline_secs",
        "pipeline.max_consecutive_failures",
        // [input]
        "input",
        "input.time_column",
        "input.bearing_column",
        "input.latitude_column",
        "input.longitude_column",
        "input.upstream_qc_column",
        "input.missing_value",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Never fails on unknown keys, only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| {
            let suggestion = suggest_correction(&key, &known);
            ValidationWarning {
                message: format!("Unknown config key '{key}'"),
                field: key,
                suggestion,
            }
        })
        .collect()
}

// ============================================================================
// Physical Range Validation
// ============================================================================

/// Validate physical ranges on a parsed FetchConfig.
///
/// Returns (errors, warnings). Errors are impossible values that must
/// prevent a run; warnings are suspicious but not fatal.
pub fn validate_physical_ranges(
    config: &super::FetchConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // The sentinel is compared for equality; NaN would never match
    if !config.input.missing_value.is_finite() {
        errors.push(format!(
            "input.missing_value = {} must be a finite number",
            config.input.missing_value
        ));
    }

    let d = config.projection.distance_m;
    if d.is_finite() && d > SUSPICIOUS_FETCH_DISTANCE_M {
        warnings.push(ValidationWarning {
            field: "projection.distance_m".to_string(),
            message: format!(
                "projection.distance_m = {d:.0} m is far beyond a typical flux footprint (> {SUSPICIOUS_FETCH_DISTANCE_M:.0} m)"
            ),
            suggestion: None,
        });
    }
    if d == 0.0 {
        warnings.push(ValidationWarning {
            field: "projection.distance_m".to_string(),
            message: "projection.distance_m = 0 classifies the tower location itself".to_string(),
            suggestion: None,
        });
    }

    let timeout = config.gateway.timeout_ms;
    if timeout > 0 && timeout < 100 {
        warnings.push(ValidationWarning {
            field: "gateway.timeout_ms".to_string(),
            message: format!("gateway.timeout_ms = {timeout} is shorter than a typical round trip"),
            suggestion: None,
        });
    }

    if config.gateway.retries > 10 {
        warnings.push(ValidationWarning {
            field: "gateway.retries".to_string(),
            message: format!(
                "gateway.retries = {} will hammer an unhealthy service",
                config.gateway.retries
            ),
            suggestion: None,
        });
    }

    if config.pipeline.max_concurrency > 64 {
        warnings.push(ValidationWarning {
            field: "pipeline.max_concurrency".to_string(),
            message: format!(
                "pipeline.max_concurrency = {} is likely to trip the service rate limit",
                config.pipeline.max_concurrency
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
