//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Projection
// ============================================================================

/// Assumed upwind footprint distance sampled by the instrument (metres).
pub const DEFAULT_FETCH_DISTANCE_M: f64 = 100.0;

/// Footprint distances above this are accepted but flagged as suspicious.
pub const SUSPICIOUS_FETCH_DISTANCE_M: f64 = 10_000.0;

// ============================================================================
// Classifier gateway
// ============================================================================

/// CropScape `GetCDLValue` endpoint.
pub const CROPSCAPE_URL: &str =
    "https://nassgeodata.gmu.edu/axis2/services/CDLService/GetCDLValue";

/// Per-request timeout for classifier calls (ms).
pub const GATEWAY_TIMEOUT_MS: u64 = 5_000;

/// Extra attempts for retryable classifier failures.
pub const GATEWAY_RETRIES: u32 = 2;

/// Base backoff between retries (ms); doubles per attempt.
pub const GATEWAY_RETRY_BACKOFF_MS: u64 = 500;

/// Decimal places of the coordinate kept in the classification cache key.
///
/// 4 places ≈ 11 m, well inside a 30 m CDL cell.
pub const CACHE_PRECISION_DECIMALS: u32 = 4;

// ============================================================================
// Pipeline
// ============================================================================

/// Classifier calls in flight at once.
pub const MAX_CONCURRENT_CLASSIFICATIONS: usize = 8;

// ============================================================================
// Input
// ============================================================================

/// Missing-value sentinel used by ARM-style datasets.
pub const MISSING_VALUE: f64 = -9999.0;
