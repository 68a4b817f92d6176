//! In-memory store of measured compression performance
//!
//! Samples are grouped per `(route, encoding, level)`. Each group is a small
//! bag behind its own lock, so readers and writers of different keys never
//! contend; the outer map is sharded.

use crate::compressor::CompressionLevel;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Width of the dedup band as a factor of the sample size
const SIZE_BAND_FACTOR: u64 = 2;

/// One measurement of a codec on a response body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionMetric {
    /// Content coding name
    pub encoding: String,
    /// Route template the body was produced by
    pub route: String,
    /// Level the body was compressed at
    pub level: CompressionLevel,
    /// Uncompressed size in bytes
    pub data_size: u64,
    /// compressed size / uncompressed size
    pub ratio: f64,
    /// Compression throughput in bytes per millisecond
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricsKey {
    route: String,
    encoding: String,
    level: CompressionLevel,
}

impl MetricsKey {
    fn new(route: &str, encoding: &str, level: CompressionLevel) -> Self {
        Self {
            route: route.to_string(),
            encoding: encoding.to_ascii_lowercase(),
            level,
        }
    }
}

type MetricsBag = Arc<RwLock<Vec<CompressionMetric>>>;

/// Whether `existing` lies strictly inside `(size / 2, size * 2)`
pub fn in_size_band(existing: u64, size: u64) -> bool {
    existing < size.saturating_mul(SIZE_BAND_FACTOR) && existing > size / SIZE_BAND_FACTOR
}

/// Concurrent metrics store
#[derive(Debug, Default)]
pub struct MetricsStore {
    metrics: DashMap<MetricsKey, MetricsBag>,
}

impl MetricsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sample of `data_size` would add information for the key
    pub fn should_add(&self, route: &str, encoding: &str, level: CompressionLevel, data_size: u64) -> bool {
        let key = MetricsKey::new(route, encoding, level);
        match self.metrics.get(&key) {
            Some(bag) => Self::fills_gap(&bag.read(), data_size),
            None => true,
        }
    }

    fn fills_gap(samples: &[CompressionMetric], data_size: u64) -> bool {
        !samples.iter().any(|m| in_size_band(m.data_size, data_size))
    }

    /// Insert a sample unless its size band is already covered.
    ///
    /// The band check is repeated under the bag's write lock, so two racing
    /// writers cannot both insert into the same band. Returns whether the
    /// sample was stored.
    pub fn upsert(&self, metric: CompressionMetric) -> bool {
        let key = MetricsKey::new(&metric.route, &metric.encoding, metric.level);
        let bag = Arc::clone(self.metrics.entry(key).or_default().value());

        let mut samples = bag.write();
        if !Self::fills_gap(&samples, metric.data_size) {
            trace!(
                route = %metric.route,
                encoding = %metric.encoding,
                level = %metric.level,
                size = metric.data_size,
                "Metric size band already covered"
            );
            return false;
        }
        samples.push(metric);
        true
    }

    /// Sample whose size is closest to `data_size`; the first stored wins ties
    pub fn closest(
        &self,
        route: &str,
        encoding: &str,
        level: CompressionLevel,
        data_size: u64,
    ) -> Option<CompressionMetric> {
        let key = MetricsKey::new(route, encoding, level);
        let bag = self.metrics.get(&key)?;
        let samples = bag.read();

        let mut closest: Option<&CompressionMetric> = None;
        let mut closest_diff = u64::MAX;
        for metric in samples.iter() {
            let diff = metric.data_size.abs_diff(data_size);
            if diff < closest_diff {
                closest = Some(metric);
                closest_diff = diff;
            }
        }
        closest.cloned()
    }

    /// Samples stored under one key
    pub fn samples(&self, route: &str, encoding: &str, level: CompressionLevel) -> Vec<CompressionMetric> {
        self.metrics
            .get(&MetricsKey::new(route, encoding, level))
            .map(|bag| bag.read().clone())
            .unwrap_or_default()
    }

    /// Total number of samples across all keys
    pub fn len(&self) -> usize {
        self.metrics.iter().map(|entry| entry.value().read().len()).sum()
    }

    /// Whether the store holds no sample
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every sample
    pub fn clear(&self) {
        self.metrics.clear();
    }
}
