//! Bandwidth probe
//!
//! Downloads the echo payload of a Shrinkwire server for at most one
//! accuracy tier and derives the throughput from the bytes that arrived.
//! Hitting the deadline is not an error: whatever was received by then is
//! the measurement.

use crate::config::ProbeConfig;
use bytes::Bytes;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use shrinkwire_core::headers::{insert_no_cache, sent_timestamp, X_BANDWIDTH_ESTIMATION};
use shrinkwire_core::types::unix_millis_now;
use shrinkwire_core::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Request body type used by the client crate
pub type ClientBody = Full<Bytes>;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthMeasurement {
    /// Payload bytes received
    pub bytes_received: u64,
    /// Latency window the bytes were received in, in milliseconds
    pub elapsed_ms: f64,
    /// Estimated bandwidth in bytes per millisecond
    pub bytes_per_ms: f64,
    /// Whether the deadline cut the transfer short
    pub truncated: bool,
}

/// `bytes / elapsed_ms`; zero bytes or a non-positive window is a failure
pub fn estimate_bandwidth(bytes_received: u64, elapsed_ms: f64) -> Result<f64> {
    if bytes_received == 0 {
        return Err(Error::ProbeFailed("no payload bytes received".to_string()));
    }
    if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 {
        return Err(Error::ProbeFailed(format!(
            "invalid measurement window of {elapsed_ms} ms"
        )));
    }
    Ok(bytes_received as f64 / elapsed_ms)
}

/// Timed download against a bandwidth echo endpoint
#[derive(Debug, Clone)]
pub struct BandwidthProbe {
    client: Client<HttpConnector, ClientBody>,
    config: ProbeConfig,
}

impl BandwidthProbe {
    /// Create a probe
    pub fn new(config: ProbeConfig) -> Self {
        let connector = HttpConnector::new();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, config }
    }

    /// Probe configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Hard deadline of one probe
    pub fn deadline(&self) -> Duration {
        self.config.accuracy.duration()
    }

    /// Run one probe against `url`
    pub async fn measure(&self, url: &str) -> Result<BandwidthMeasurement> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::Config(format!("Invalid probe URL '{url}': {e}")))?;

        let mut req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(X_BANDWIDTH_ESTIMATION, self.config.accuracy.code().to_string())
            .body(Full::new(Bytes::new()))?;
        insert_no_cache(req.headers_mut());

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.deadline();

        debug!(url = %url, accuracy = %self.config.accuracy, "Starting bandwidth probe");

        let response = match tokio::time::timeout_at(deadline, self.client.request(req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Error::Connection(format!("{url}: {e}"))),
            Err(_) => {
                return Err(Error::ProbeFailed(
                    "no response before the probe deadline".to_string(),
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnsuccessfulStatus(status));
        }

        let sent_at = if self.config.use_response_sent_time {
            Some(sent_timestamp(response.headers())?)
        } else {
            None
        };

        let mut body = response.into_body();
        let mut bytes_received: u64 = 0;
        let mut truncated = false;

        loop {
            match tokio::time::timeout_at(deadline, body.frame()).await {
                Ok(Some(Ok(frame))) => {
                    if let Some(data) = frame.data_ref() {
                        bytes_received += data.len() as u64;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, bytes_received, "Probe payload interrupted");
                    truncated = true;
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(bytes_received, "Probe deadline reached");
                    truncated = true;
                    break;
                }
            }
        }
        drop(body);

        let elapsed_ms = match sent_at {
            Some(sent_at) => unix_millis_now() - sent_at,
            None => started.elapsed().as_secs_f64() * 1000.0,
        };

        let bytes_per_ms = estimate_bandwidth(bytes_received, elapsed_ms)?;

        info!(
            url = %url,
            bytes_received,
            elapsed_ms,
            bytes_per_ms,
            truncated,
            "Bandwidth probe completed"
        );

        Ok(BandwidthMeasurement {
            bytes_received,
            elapsed_ms,
            bytes_per_ms,
            truncated,
        })
    }
}

impl Default for BandwidthProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}
