//! HTTP client advertising the stored bandwidth to the server

use crate::probe::ClientBody;
use crate::store::{BandwidthStore, HostKey};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use shrinkwire_core::headers::{bandwidth_value, X_BANDWIDTH};
use shrinkwire_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Client that attaches `X-Bandwidth` when an estimate for the target host
/// is known
#[derive(Debug, Clone)]
pub struct AdaptiveCompressionClient {
    client: Client<HttpConnector, ClientBody>,
    store: Arc<dyn BandwidthStore>,
    timeout: Duration,
}

impl AdaptiveCompressionClient {
    /// Create a client reading from `store`
    pub fn new(store: Arc<dyn BandwidthStore>) -> Self {
        Self::with_timeout(store, Duration::from_secs(30))
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(store: Arc<dyn BandwidthStore>, timeout: Duration) -> Self {
        let connector = HttpConnector::new();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            store,
            timeout,
        }
    }

    /// Get the configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Add `X-Bandwidth` to `req` if its host has a stored estimate.
    ///
    /// A header already set by the caller is left alone.
    pub fn advertise(&self, req: &mut Request<ClientBody>) -> Result<()> {
        if req.headers().contains_key(X_BANDWIDTH) {
            return Ok(());
        }

        let host = match HostKey::from_uri(req.uri()) {
            Ok(host) => host,
            Err(e) => {
                trace!(uri = %req.uri(), error = %e, "No host key for request, sending unmodified");
                return Ok(());
            }
        };

        if let Some(sample) = self.store.get(&host) {
            req.headers_mut().insert(X_BANDWIDTH, bandwidth_value(sample.bytes_per_ms)?);
        }
        Ok(())
    }

    /// Send a request
    pub async fn send(&self, mut req: Request<ClientBody>) -> Result<Response<Incoming>> {
        self.advertise(&mut req)?;

        let timeout = tokio::time::timeout(self.timeout, self.client.request(req));

        match timeout.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(Error::Connection(e.to_string())),
            Err(_) => Err(Error::Connection(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
