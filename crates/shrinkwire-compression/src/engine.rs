//! Compression decision engine
//!
//! Estimates, for every candidate `(encoding, level)`, the time to compress a
//! body and push it through the client's advertised bandwidth, and picks the
//! cheapest option, including sending the body uncompressed.

use crate::compressor::{CompressionLevel, ProviderRegistry};
use crate::metrics_store::MetricsStore;
use shrinkwire_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Verdict for one response
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionDecision {
    /// Chosen content coding, `None` for no compression
    pub encoding: Option<String>,
    /// Chosen level, `None` for no compression
    pub level: Option<CompressionLevel>,
    /// Estimated transfer time in milliseconds, if any metric was available
    pub expected_time: Option<f64>,
}

impl CompressionDecision {
    /// Send the body as is
    pub fn uncompressed(expected_time: Option<f64>) -> Self {
        Self {
            encoding: None,
            level: None,
            expected_time,
        }
    }

    /// Compress with `encoding` at `level`
    pub fn compressed(encoding: impl Into<String>, level: CompressionLevel, expected_time: Option<f64>) -> Self {
        Self {
            encoding: Some(encoding.into()),
            level: Some(level),
            expected_time,
        }
    }

    /// Whether the body should be compressed
    pub fn is_compressed(&self) -> bool {
        self.encoding.is_some()
    }
}

/// `size * ratio / bandwidth + size / speed`, in milliseconds
pub fn expected_processing_time(size: u64, bandwidth: f64, ratio: f64, speed: f64) -> f64 {
    let size = size as f64;
    size * ratio / bandwidth + size / speed
}

/// Picks encoding and level from stored metrics
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    registry: Arc<ProviderRegistry>,
    store: Arc<MetricsStore>,
    levels: Vec<CompressionLevel>,
}

impl DecisionEngine {
    /// Create an engine over the given providers, metrics and candidate levels
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<MetricsStore>, levels: Vec<CompressionLevel>) -> Self {
        Self { registry, store, levels }
    }

    /// Decide how to send a body of `size` bytes.
    ///
    /// `bandwidth` is the advertised client bandwidth in bytes per
    /// millisecond. Never fails: internal errors degrade to the fallback
    /// verdict (first accepted provider at [`CompressionLevel::Fastest`]).
    pub fn decide(&self, bandwidth: f64, route: &str, size: u64, accepted: &[String]) -> CompressionDecision {
        match self.decide_internal(bandwidth, route, size, accepted) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(route = %route, size, error = %e, "Compression decision failed, using default");
                self.fallback(accepted)
            }
        }
    }

    fn decide_internal(&self, bandwidth: f64, route: &str, size: u64, accepted: &[String]) -> Result<CompressionDecision> {
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(Error::invalid_header(format!("bandwidth must be positive, got {}", bandwidth)));
        }

        let mut best: Option<(&str, CompressionLevel, f64)> = None;

        for provider in self.registry.iter() {
            let encoding = provider.encoding_name();
            if !accepted.iter().any(|a| a.eq_ignore_ascii_case(encoding)) {
                continue;
            }

            for level in &self.levels {
                let Some(metric) = self.store.closest(route, encoding, *level, size) else {
                    continue;
                };

                if !metric.speed.is_finite() || metric.speed <= 0.0 {
                    return Err(Error::Internal(format!(
                        "invalid speed {} for {} at {}",
                        metric.speed, encoding, level
                    )));
                }
                if !metric.ratio.is_finite() || metric.ratio < 0.0 {
                    return Err(Error::Internal(format!(
                        "invalid ratio {} for {} at {}",
                        metric.ratio, encoding, level
                    )));
                }

                let time = expected_processing_time(size, bandwidth, metric.ratio, metric.speed);
                if best.map_or(true, |(_, _, best_time)| time < best_time) {
                    best = Some((encoding, *level, time));
                }
            }
        }

        let Some((encoding, level, best_time)) = best else {
            debug!(route = %route, size, "No compression metrics yet, using default");
            return Ok(self.fallback(accepted));
        };

        let uncompressed_time = size as f64 / bandwidth;
        if uncompressed_time <= best_time {
            debug!(
                route = %route,
                size,
                uncompressed_time,
                best_time,
                "Uncompressed transfer is faster"
            );
            return Ok(CompressionDecision::uncompressed(Some(uncompressed_time)));
        }

        debug!(
            route = %route,
            size,
            encoding = %encoding,
            level = %level,
            expected_time = best_time,
            "Compression decision made"
        );
        Ok(CompressionDecision::compressed(encoding, level, Some(best_time)))
    }

    /// First accepted provider in registry order at the fastest level
    pub fn fallback(&self, accepted: &[String]) -> CompressionDecision {
        self.registry
            .iter()
            .find(|provider| {
                accepted
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(provider.encoding_name()))
            })
            .map(|provider| CompressionDecision::compressed(provider.encoding_name(), CompressionLevel::Fastest, None))
            .unwrap_or_else(|| CompressionDecision::uncompressed(None))
    }
}
