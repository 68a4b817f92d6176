//! Compression middleware
//!
//! Routes annotated [`CompressionMethod::Adaptive`] whose client advertises
//! a bandwidth below the configured threshold go through the decision
//! engine; everything else gets standard content negotiation at a fixed
//! level.

use crate::body::{intercept, Intercepted};
use crate::compressor::{CompressionLevel, CompressionProvider, ProviderRegistry};
use crate::config::AdaptiveCompressionConfig;
use crate::engine::DecisionEngine;
use crate::memory::{MemoryProfiler, SystemMemoryProfiler};
use crate::metrics_store::MetricsStore;
use crate::mime::MimeFilter;
use crate::negotiate::{accepts_compression, compatible_encodings, select_provider};
use crate::queue::{ComputeTaskScheduler, MetricsComputeTaskQueue};
use crate::service::CompressionService;
use crate::worker::{BackgroundMetricsComputer, WorkerHandle};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::uri::Scheme;
use http::{HeaderName, HeaderValue, Request, Response};
use http_body_util::BodyExt;
use shrinkwire_core::headers::{advertised_bandwidth, init_compression_headers};
use shrinkwire_core::middleware::{empty, full, Body, Middleware, Next};
use shrinkwire_core::{CompressionMethod, Error, MatchedRoute, Result};
use std::sync::Arc;
use tracing::{debug, trace, warn};

const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Adaptive compression middleware
#[derive(Debug)]
pub struct AdaptiveCompressionMiddleware {
    config: Arc<AdaptiveCompressionConfig>,
    registry: Arc<ProviderRegistry>,
    filter: Arc<MimeFilter>,
    store: Arc<MetricsStore>,
    queue: Arc<MetricsComputeTaskQueue>,
    service: CompressionService,
    memory: Arc<dyn MemoryProfiler>,
}

impl AdaptiveCompressionMiddleware {
    /// Create the middleware with the configured providers and the system
    /// memory profiler
    pub fn new(config: AdaptiveCompressionConfig) -> Result<Self> {
        config.validate()?;
        let registry = ProviderRegistry::from_names(&config.providers)?;
        Ok(Self::with_components(
            config,
            registry,
            Arc::new(SystemMemoryProfiler::new()),
        ))
    }

    /// Create the middleware from explicit parts
    pub fn with_components(
        config: AdaptiveCompressionConfig,
        registry: ProviderRegistry,
        memory: Arc<dyn MemoryProfiler>,
    ) -> Self {
        let levels = config.unique_levels();
        let registry = Arc::new(registry);
        let filter = Arc::new(MimeFilter::new(&config.mime_types, &config.excluded_mime_types));
        let store = Arc::new(MetricsStore::new());
        let queue = Arc::new(MetricsComputeTaskQueue::new(config.queue_capacity));

        let engine = DecisionEngine::new(Arc::clone(&registry), Arc::clone(&store), levels.clone());
        let scheduler = ComputeTaskScheduler::new(Arc::clone(&queue), Arc::clone(&store), levels);
        let service = CompressionService::new(Arc::clone(&registry), engine, scheduler);

        Self {
            config: Arc::new(config),
            registry,
            filter,
            store,
            queue,
            service,
            memory,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &AdaptiveCompressionConfig {
        &self.config
    }

    /// Registered providers
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Shared metrics store
    pub fn metrics_store(&self) -> &Arc<MetricsStore> {
        &self.store
    }

    /// Shared compute queue
    pub fn task_queue(&self) -> &Arc<MetricsComputeTaskQueue> {
        &self.queue
    }

    /// Background computer wired to this middleware's queue and store
    pub fn metrics_computer(&self) -> BackgroundMetricsComputer {
        BackgroundMetricsComputer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            &self.config.levels,
        )
        .with_idle_delay(self.config.idle_delay)
    }

    /// Spawn [`Self::metrics_computer`] on the current runtime
    pub fn spawn_metrics_computer(&self) -> WorkerHandle {
        self.metrics_computer().spawn()
    }

    fn adaptive_allowed(&self, bandwidth: f64) -> bool {
        let max_bandwidth = self.config.max_bandwidth_bytes_per_ms();
        if bandwidth > max_bandwidth {
            trace!(bandwidth, max_bandwidth, "Bandwidth above adaptive threshold");
            return false;
        }

        let memory = self.memory.memory_usage_percent();
        if memory > self.config.max_memory_percent {
            debug!(memory, max = self.config.max_memory_percent, "Memory pressure, using standard compression");
            return false;
        }

        true
    }

    async fn adaptive(&self, req: Request<Body>, next: Next, route: &str, bandwidth: f64) -> Result<Response<Body>> {
        let accepted = compatible_encodings(req.headers(), &self.registry);
        if accepted.is_empty() {
            trace!(route = %route, "No compatible encodings");
            return next.run(req).await;
        }

        let response = next.run(req).await?;
        let (mut parts, body) = response.into_parts();

        let body = match intercept(Arc::clone(&self.filter), &parts.headers, body).await? {
            Intercepted::Passthrough(body) => body,
            Intercepted::Empty => empty(),
            Intercepted::Captured(data) => {
                let (decision, body) = self
                    .service
                    .apply(&mut parts.headers, data, bandwidth, route, accepted);
                debug!(
                    route = %route,
                    bandwidth,
                    encoding = ?decision.encoding,
                    level = ?decision.level,
                    expected_time = ?decision.expected_time,
                    "Adaptive compression applied"
                );
                body
            }
        };

        Ok(Response::from_parts(parts, body))
    }

    async fn standard(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
        let Some(provider) = select_provider(req.headers(), &self.registry) else {
            return next.run(req).await;
        };

        let response = next.run(req).await?;
        if !self.filter.should_compress_response(response.headers()) {
            return Ok(response);
        }

        compress_response(response, provider.as_ref(), self.config.standard_level).await
    }
}

fn is_https<B>(req: &Request<B>) -> bool {
    req.uri().scheme() == Some(&Scheme::HTTPS)
        || req
            .headers()
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

#[async_trait]
impl Middleware for AdaptiveCompressionMiddleware {
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
        if !self.config.enabled {
            return next.run(req).await;
        }

        if is_https(&req) && !self.config.enable_for_https {
            return next.run(req).await;
        }

        if !accepts_compression(req.headers()) {
            return next.run(req).await;
        }

        let Some(route) = req.extensions().get::<MatchedRoute>().cloned() else {
            return next.run(req).await;
        };

        let method = route.compression_method();
        if method == CompressionMethod::None {
            return next.run(req).await;
        }

        // Malformed bandwidth fails the request on every compressing route
        let bandwidth = advertised_bandwidth(req.headers())?;

        if method == CompressionMethod::Adaptive {
            if let Some(bandwidth) = bandwidth.filter(|bw| self.adaptive_allowed(*bw)) {
                return self.adaptive(req, next, &route.pattern, bandwidth).await;
            }
        }

        self.standard(req, next).await
    }
}

/// Compress a complete response with `provider`, keeping the original body
/// if compression does not make it smaller
async fn compress_response(
    response: Response<Body>,
    provider: &dyn CompressionProvider,
    level: CompressionLevel,
) -> Result<Response<Body>> {
    let (mut parts, body) = response.into_parts();

    let body_bytes = body.collect().await?.to_bytes();
    let original_size = body_bytes.len();

    let final_body: Bytes = match provider.compress(&body_bytes, level) {
        Ok(compressed) if compressed.len() < original_size => {
            init_compression_headers(&mut parts.headers, provider.encoding_name())?;
            debug!(
                encoding = provider.encoding_name(),
                original = original_size,
                compressed = compressed.len(),
                "Response compressed"
            );
            compressed
        }
        Ok(_) => {
            debug!("Compressed size not smaller, using original");
            body_bytes
        }
        Err(e) => {
            warn!(encoding = provider.encoding_name(), error = %e, "Failed to compress response, returning uncompressed");
            body_bytes
        }
    };

    parts.headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&final_body.len().to_string())
            .map_err(|e| Error::Internal(format!("Invalid content length: {}", e)))?,
    );
    parts.headers.remove(TRANSFER_ENCODING);

    Ok(Response::from_parts(parts, full(final_body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticMemoryProfiler;
    use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, VARY};
    use shrinkwire_core::headers::X_BANDWIDTH;

    fn text() -> String {
        "The quick brown fox jumps over the lazy dog. ".repeat(100)
    }

    fn middleware(config: AdaptiveCompressionConfig, memory: f64) -> AdaptiveCompressionMiddleware {
        let registry = ProviderRegistry::from_names(&config.providers).unwrap();
        AdaptiveCompressionMiddleware::with_components(config, registry, Arc::new(StaticMemoryProfiler(memory)))
    }

    fn next() -> Next {
        Next::handler(Box::new(|_req| {
            Box::pin(async {
                let mut response = Response::new(full(text()));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
                Ok(response)
            })
        }))
    }

    fn request(route: Option<MatchedRoute>, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/items/1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(empty()).unwrap();
        if let Some(route) = route {
            req.extensions_mut().insert(route);
        }
        req
    }

    fn adaptive_route() -> MatchedRoute {
        MatchedRoute::new("/api/items/{id}").with_compression(CompressionMethod::Adaptive)
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let config = AdaptiveCompressionConfig {
            enabled: false,
            ..Default::default()
        };
        let mw = middleware(config, 0.0);
        let req = request(Some(MatchedRoute::new("/")), &[("accept-encoding", "gzip")]);

        let response = mw.call(req, next()).await.unwrap();
        assert!(!response.headers().contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn test_standard_route_uses_negotiated_provider() {
        let mw = middleware(AdaptiveCompressionConfig::default(), 0.0);
        let req = request(
            Some(MatchedRoute::new("/api/items/{id}")),
            &[("accept-encoding", "br;q=0.5, gzip;q=1.0")],
        );

        let response = mw.call(req, next()).await.unwrap();
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(VARY).unwrap(), "Accept-Encoding");

        let length: usize = response.headers().get(CONTENT_LENGTH).unwrap().to_str().unwrap().parse().unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), length);
        assert!(body.len() < text().len());
    }

    #[tokio::test]
    async fn test_none_route_and_missing_route_skip_compression() {
        let mw = middleware(AdaptiveCompressionConfig::default(), 0.0);

        let none = MatchedRoute::new("/raw").with_compression(CompressionMethod::None);
        let response = mw.call(request(Some(none), &[("accept-encoding", "gzip")]), next()).await.unwrap();
        assert!(!response.headers().contains_key(CONTENT_ENCODING));

        let response = mw.call(request(None, &[("accept-encoding", "gzip")]), next()).await.unwrap();
        assert!(!response.headers().contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn test_https_gate() {
        let mw = middleware(AdaptiveCompressionConfig::default(), 0.0);
        let req = request(
            Some(MatchedRoute::new("/")),
            &[("accept-encoding", "gzip"), ("x-forwarded-proto", "https")],
        );
        let response = mw.call(req, next()).await.unwrap();
        assert!(!response.headers().contains_key(CONTENT_ENCODING));

        let config = AdaptiveCompressionConfig {
            enable_for_https: true,
            ..Default::default()
        };
        let mw = middleware(config, 0.0);
        let req = request(
            Some(MatchedRoute::new("/")),
            &[("accept-encoding", "gzip"), ("x-forwarded-proto", "https")],
        );
        let response = mw.call(req, next()).await.unwrap();
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
    }

    #[tokio::test]
    async fn test_adaptive_route_schedules_metrics() {
        let mw = middleware(AdaptiveCompressionConfig::default(), 0.0);
        let req = request(
            Some(adaptive_route()),
            &[("accept-encoding", "gzip, deflate"), ("x-bandwidth", "50")],
        );

        let response = mw.call(req, next()).await.unwrap();
        // Cold store: first accepted provider in registration order
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(!response.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(mw.task_queue().len(), 1);
    }

    #[tokio::test]
    async fn test_adaptive_deferred_on_memory_pressure() {
        let config = AdaptiveCompressionConfig {
            max_memory_percent: 50.0,
            ..Default::default()
        };
        let mw = middleware(config, 75.0);
        let req = request(
            Some(adaptive_route()),
            &[("accept-encoding", "gzip"), ("x-bandwidth", "50")],
        );

        let response = mw.call(req, next()).await.unwrap();
        // Standard path sets the final length and queues nothing
        assert!(response.headers().contains_key(CONTENT_LENGTH));
        assert!(mw.task_queue().is_empty());
    }

    #[tokio::test]
    async fn test_adaptive_deferred_above_bandwidth_threshold() {
        let mw = middleware(AdaptiveCompressionConfig::default(), 0.0);
        let req = request(
            Some(adaptive_route()),
            &[("accept-encoding", "gzip"), ("x-bandwidth", "5000")],
        );

        let response = mw.call(req, next()).await.unwrap();
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(mw.task_queue().is_empty());
    }

    #[tokio::test]
    async fn test_non_positive_bandwidth_rejected() {
        let mw = middleware(AdaptiveCompressionConfig::default(), 0.0);
        for value in ["0", "-3", "fast"] {
            let req = request(
                Some(adaptive_route()),
                &[(ACCEPT_ENCODING.as_str(), "gzip"), (X_BANDWIDTH.as_str(), value)],
            );
            let err = mw.call(req, next()).await.unwrap_err();
            assert!(err.is_protocol_error());
            assert_eq!(err.to_status_code(), http::StatusCode::BAD_REQUEST);
        }
        assert!(mw.task_queue().is_empty());
    }

    #[tokio::test]
    async fn test_excluded_mime_type_not_compressed() {
        let config = AdaptiveCompressionConfig {
            excluded_mime_types: vec!["text/plain".to_string()],
            ..Default::default()
        };
        let mw = middleware(config, 0.0);
        let req = request(
            Some(adaptive_route()),
            &[("accept-encoding", "gzip"), ("x-bandwidth", "50")],
        );

        let response = mw.call(req, next()).await.unwrap();
        assert!(!response.headers().contains_key(CONTENT_ENCODING));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from(text()));
        assert!(mw.task_queue().is_empty());
    }
}
