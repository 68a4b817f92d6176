//! Bandwidth echo responder
//!
//! Answers requests carrying `X-Bandwidth-Estimation` with an uncompressed,
//! uncacheable stream of zeros sized so that a client at the configured
//! maximum bandwidth needs the whole accuracy tier to receive it.

use crate::config::AdaptiveCompressionConfig;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use shrinkwire_core::headers::{init_bandwidth_estimation_headers, requested_accuracy};
use shrinkwire_core::middleware::{Body, Middleware, Next};
use shrinkwire_core::{BandwidthAccuracy, Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Size of each streamed chunk
pub const ECHO_CHUNK_SIZE: usize = 4096;

/// Request extension signalled when the client goes away.
///
/// Servers that can detect disconnects insert it so the echo stream stops
/// writing as soon as the client is gone.
#[derive(Debug, Clone, Default)]
pub struct RequestAborted(pub CancellationToken);

/// Middleware serving bandwidth probes
#[derive(Debug, Clone)]
pub struct BandwidthEstimationMiddleware {
    max_bandwidth: f64,
    chunk_size: usize,
}

impl BandwidthEstimationMiddleware {
    /// Create a responder for clients up to `max_bandwidth` bytes per millisecond
    pub fn new(max_bandwidth: f64) -> Self {
        Self {
            max_bandwidth,
            chunk_size: ECHO_CHUNK_SIZE,
        }
    }

    /// Create a responder from the compression configuration threshold
    pub fn from_config(config: &AdaptiveCompressionConfig) -> Self {
        Self::new(config.max_bandwidth_bytes_per_ms())
    }

    /// Override the chunk size (minimum 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Bytes streamed for `accuracy`
    pub fn payload_size(&self, accuracy: BandwidthAccuracy) -> u64 {
        (self.max_bandwidth * accuracy.seconds() as f64 * 1000.0) as u64
    }

    fn respond(&self, accuracy: BandwidthAccuracy, abort: Option<CancellationToken>) -> Result<Response<Body>> {
        let total = self.payload_size(accuracy);
        debug!(accuracy = %accuracy, bytes = total, "Serving bandwidth estimation payload");

        let mut response = Response::new(zero_stream(total, self.chunk_size, abort));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        init_bandwidth_estimation_headers(headers)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        Ok(response)
    }
}

#[async_trait]
impl Middleware for BandwidthEstimationMiddleware {
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
        let Some(accuracy) = requested_accuracy(req.headers())? else {
            return next.run(req).await;
        };

        let abort = req.extensions().get::<RequestAborted>().map(|a| a.0.clone());
        self.respond(accuracy, abort)
    }
}

fn zero_stream(total: u64, chunk_size: usize, abort: Option<CancellationToken>) -> Body {
    let chunk = Bytes::from(vec![0u8; chunk_size]);

    let stream = futures::stream::unfold(total, move |remaining| {
        let chunk = chunk.clone();
        let abort = abort.clone();
        async move {
            if remaining == 0 {
                return None;
            }
            if abort.as_ref().is_some_and(CancellationToken::is_cancelled) {
                debug!(remaining, "Client disconnected, stopping bandwidth estimation payload");
                return None;
            }

            let len = remaining.min(chunk.len() as u64) as usize;
            Some((Ok::<_, Error>(Frame::data(chunk.slice(..len))), remaining - len as u64))
        }
    });

    StreamBody::new(stream).boxed_unsync()
}
