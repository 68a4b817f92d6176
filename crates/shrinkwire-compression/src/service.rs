//! Applies compression verdicts to captured response bodies

use crate::compressor::{CompressionLevel, ProviderRegistry};
use crate::engine::{CompressionDecision, DecisionEngine};
use crate::queue::{ComputeTask, ComputeTaskScheduler};
use bytes::Bytes;
use http::HeaderMap;
use shrinkwire_core::headers::init_compression_headers;
use shrinkwire_core::middleware::full;
use shrinkwire_core::{Body, Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decision engine, codecs and refresh scheduling for the adaptive path
#[derive(Debug, Clone)]
pub struct CompressionService {
    registry: Arc<ProviderRegistry>,
    engine: DecisionEngine,
    scheduler: ComputeTaskScheduler,
}

impl CompressionService {
    /// Create a service
    pub fn new(registry: Arc<ProviderRegistry>, engine: DecisionEngine, scheduler: ComputeTaskScheduler) -> Self {
        Self {
            registry,
            engine,
            scheduler,
        }
    }

    /// Decision engine
    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Decide, encode and write the captured `data`, then schedule a metrics
    /// refresh that takes ownership of it.
    ///
    /// `headers` are the response headers and are updated to match the body
    /// returned. Codec failures fall back to the raw body.
    pub fn apply(
        &self,
        headers: &mut HeaderMap,
        data: Bytes,
        bandwidth: f64,
        route: &str,
        accepted: Vec<String>,
    ) -> (CompressionDecision, Body) {
        let decision = self.engine.decide(bandwidth, route, data.len() as u64, &accepted);

        let body = match (&decision.encoding, decision.level) {
            (Some(encoding), Some(level)) => match self.encode(headers, &data, encoding, level) {
                Ok(compressed) => {
                    debug!(
                        route = %route,
                        encoding = %encoding,
                        level = %level,
                        original = data.len(),
                        compressed = compressed.len(),
                        "Response compressed"
                    );
                    full(compressed)
                }
                Err(e) => {
                    warn!(route = %route, encoding = %encoding, error = %e, "Compression failed, sending uncompressed");
                    full(data.clone())
                }
            },
            _ => full(data.clone()),
        };

        self.schedule_refresh(route, accepted, data);
        (decision, body)
    }

    fn encode(&self, headers: &mut HeaderMap, data: &[u8], encoding: &str, level: CompressionLevel) -> Result<Bytes> {
        let provider = self
            .registry
            .get(encoding)
            .ok_or_else(|| Error::UnknownEncoding(encoding.to_string()))?;

        let compressed = provider
            .compress(data, level)
            .map_err(|e| Error::Compression(e.to_string()))?;

        init_compression_headers(headers, provider.encoding_name())?;
        Ok(compressed)
    }

    fn schedule_refresh(&self, route: &str, accepted: Vec<String>, data: Bytes) {
        if accepted.is_empty() || data.is_empty() {
            return;
        }
        self.scheduler.schedule(ComputeTask::new(route, accepted, data));
    }
}
