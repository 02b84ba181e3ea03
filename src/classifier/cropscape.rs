//! CropScape client: USDA NASS Cropland Data Layer lookups over HTTP
//!
//! `GetCDLValue?year=Y&x=X&y=Y` answers with the CDL cell under a CONUS
//! Albers (EPSG:5070) point, e.g.
//!
//! ```text
//! <Result>{x: -131939.96, y: 1507624.18, value: 36, category: "Alfalfa", color: "#FFA5E2"}</Result>
//! ```
//!
//! Years or places the layer does not cover come back without a category
//! and are reported as `CropLabel::Undefined`.

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CropClassifier, GatewayError};
use crate::config::GatewayConfig;
use crate::geodesy::to_conus_albers;
use crate::types::{Coordinate, CropLabel};

/// CDL category used for cells outside the mapped area.
const BACKGROUND_CATEGORY: &str = "Background";

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn category_pattern() -> Result<Regex, regex::Error> {
    Regex::new(r#"category:\s*(?:"([^"]*)"|([^,}<]*))"#)
}

/// HTTP client for the CropScape `GetCDLValue` service.
#[derive(Clone)]
pub struct CropScapeClient {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
    backoff: Duration,
    category_re: Regex,
}

impl CropScapeClient {
    /// Build a client. `timeout` bounds each HTTP request; `retries` is the
    /// number of extra attempts for retryable failures.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retries: u32,
        backoff: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Client(format!("failed to build HTTP client: {e}")))?;
        let category_re = category_pattern()
            .map_err(|e| GatewayError::Client(format!("invalid category pattern: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retries,
            backoff,
            category_re,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::new(
            &config.base_url,
            Duration::from_millis(config.timeout_ms),
            config.retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_once(&self, coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError> {
        let point = to_conus_albers(coord)
            .ok_or_else(|| GatewayError::Client(format!("cannot project {coord} to CONUS Albers")))?;

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("year", year.to_string()),
                ("x", format!("{:.3}", point.x)),
                ("y", format!("{:.3}", point.y)),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Http(e)
                }
            })?;

        match resp.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(GatewayError::RateLimited),
            status if !status.is_success() => Err(GatewayError::Status(status.as_u16())),
            _ => {
                let body = resp.text().await?;
                Ok(parse_category(&self.category_re, &body))
            }
        }
    }

    /// Backoff before attempt `attempt + 1`: base × 2^attempt, capped.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

#[async_trait]
impl CropClassifier for CropScapeClient {
    async fn classify(&self, coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(coord, year).await {
                Ok(label) => return Ok(label),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    let delay = self.backoff_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "CropScape request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(%coord, year, attempts = attempt + 1, error = %e, "CropScape request failed");
                    return Err(e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "cropscape"
    }
}

/// Pull the category out of a `GetCDLValue` response body.
fn parse_category(pattern: &Regex, body: &str) -> CropLabel {
    let Some(caps) = pattern.captures(body) else {
        return CropLabel::Undefined;
    };
    // Quoted categories are taken as-is. Unquoted ones run up to the next
    // delimiter and may carry trailing whitespace.
    let raw = match (caps.get(1), caps.get(2)) {
        (Some(quoted), _) => quoted.as_str(),
        (None, Some(bare)) => bare.as_str().trim(),
        (None, None) => "",
    };
    match CropLabel::known(raw) {
        CropLabel::Known(label) if label == BACKGROUND_CATEGORY => CropLabel::Undefined,
        label => label,
    }
}
