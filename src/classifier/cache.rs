//! Memoising classifier wrapper
//!
//! Footprint points of a fixed tower land on a handful of cells, so a batch
//! of thousands of samples asks the same few questions over and over. The
//! cache keys on the coordinate rounded to `precision` decimal places
//! (4 places ≈ 11 m) plus the year. Only successful answers are stored.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CropClassifier, GatewayError};
use crate::types::{Coordinate, CropLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    lat: i64,
    lon: i64,
    year: i32,
}

/// Hit/miss counters for a `CachedClassifier`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Caches the answers of an inner classifier by (rounded coordinate, year).
pub struct CachedClassifier<C> {
    inner: C,
    scale: f64,
    entries: RwLock<HashMap<CacheKey, CropLabel>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<C: CropClassifier> CachedClassifier<C> {
    /// `precision` is the number of decimal places kept in the key (max 9).
    pub fn new(inner: C, precision: u32) -> Self {
        Self {
            inner,
            scale: 10f64.powi(precision.min(9) as i32),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn key(&self, coord: Coordinate, year: i32) -> CacheKey {
        CacheKey {
            lat: (coord.latitude * self.scale).round() as i64,
            lon: (coord.longitude * self.scale).round() as i64,
            year,
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().await.len(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CropClassifier> CropClassifier for CachedClassifier<C> {
    async fn classify(&self, coord: Coordinate, year: i32) -> Result<CropLabel, GatewayError> {
        let key = self.key(coord, year);
        if let Some(label) = self.entries.read().await.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(label.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let label = self.inner.classify(coord, year).await?;
        debug!(%coord, year, label = %label, "Caching classification");
        self.entries.write().await.insert(key, label.clone());
        Ok(label)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
